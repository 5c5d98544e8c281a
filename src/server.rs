//! ==============================================================================
//! server.rs - web server (presentation layer)
//! ==============================================================================
//!
//! purpose:
//!     serves the dashboard page and the json api the pages are composed from:
//!     sensor readings, comment board, account/guest identity, bulletin board.
//!
//! sessions:
//!     POST /api/session hands out an id; session-scoped calls send it back in
//!     the `x-session-id` header. each session owns its identity, its series
//!     cache and its bulletin login (session.rs).
//!
//!     sessions idle past `sessions.idle_minutes` are dropped, and the registry
//!     never holds more than `sessions.max_sessions`; DELETE /api/session ends
//!     one explicitly.
//!
//! shared state:
//!     - snapshot: latest refresh-loop view, read by GET / and /api/dashboard
//!     - page cache: series cache behind the html page; cleared on every
//!       refresh tick and by the page's refresh button
//!     - bulletin + members: process-local, one mutex each
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Form, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthProvider;
use crate::bulletin::{Board, BulletinBoard, Member, MemberDirectory, Post};
use crate::cache::SeriesCache;
use crate::comments::CommentStore;
use crate::config::DashboardConfig;
use crate::dashboard::{load_view, DashboardView};
use crate::domain::{Comment, CommentCategory, RANGE_OPTIONS};
use crate::error::{AuthError, BulletinError, GatewayError, ValidationError, WriteError};
use crate::gateway::DataGateway;
use crate::render::{dashboard_page, PageOptions};
use crate::session::{Channel, SessionContext, SessionRegistry, SharedContext};

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn DataGateway>,
    pub auth: Arc<dyn AuthProvider>,
    pub comments: CommentStore,
    pub sessions: Arc<StdMutex<SessionRegistry>>,
    pub bulletin: Arc<StdMutex<BulletinBoard>>,
    pub members: Arc<StdMutex<MemberDirectory>>,
    pub snapshot: Arc<RwLock<DashboardView>>,
    pub page_cache: Arc<Mutex<SeriesCache>>,
    pub config: Arc<DashboardConfig>,
}

impl AppState {
    pub fn new(gateway: Arc<dyn DataGateway>, auth: Arc<dyn AuthProvider>, config: DashboardConfig) -> Self {
        let mut members = MemberDirectory::new();
        for staff in &config.bulletin.staff {
            members.insert(&staff.email, &staff.name, &staff.password, crate::bulletin::Role::Teacher);
        }
        Self {
            comments: CommentStore::new(gateway.clone()),
            gateway,
            auth,
            sessions: Arc::new(StdMutex::new(SessionRegistry::new(
                config.session_idle(),
                config.sessions.max_sessions,
            ))),
            bulletin: Arc::new(StdMutex::new(BulletinBoard::new())),
            members: Arc::new(StdMutex::new(members)),
            snapshot: Arc::new(RwLock::new(DashboardView::default())),
            page_cache: Arc::new(Mutex::new(SeriesCache::new(config.cache_ttl()))),
            config: Arc::new(config),
        }
    }

    pub fn new_session(&self) -> SessionContext {
        SessionContext::new(SeriesCache::new(self.config.cache_ttl()))
    }

    /// one refresh cycle: drops every cached window, then reloads the
    /// default window into the shared snapshot
    pub async fn refresh_snapshot(&self) -> DashboardView {
        let hours = self.config.sensors.default_hours;
        let view = {
            let mut cache = self.page_cache.lock().await;
            cache.invalidate_all();
            let loaded = load_view(&mut cache, self.gateway.as_ref(), hours, self.config.sensors.row_limit, Utc::now()).await;
            loaded.unwrap_or_else(|e| DashboardView { hours, error: Some(e.to_string()), ..Default::default() })
        };
        *self.snapshot.write().await = view.clone();
        view
    }

    fn session(&self, headers: &HeaderMap) -> Result<SharedContext, ApiError> {
        let id = session_id(headers)?;
        lock(&self.sessions).get(&id).ok_or(ApiError::NoSession)
    }
}

fn session_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(ApiError::NoSession)
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Gateway(GatewayError),
    Auth(AuthError),
    NotFound(String),
    NoSession,
    LoginRequired,
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e)
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<WriteError> for ApiError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Validation(e) => ApiError::Validation(e),
            WriteError::Gateway(e) => ApiError::Gateway(e),
            WriteError::Auth(e) => ApiError::Auth(e),
        }
    }
}

impl From<BulletinError> for ApiError {
    fn from(e: BulletinError) -> Self {
        match e {
            BulletinError::Validation(e) => ApiError::Validation(e),
            BulletinError::Auth(e) => ApiError::Auth(e),
            BulletinError::PostNotFound(id) => ApiError::NotFound(format!("post {id} not found")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Gateway(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ApiError::Auth(AuthError::TransportFailure(m)) => (StatusCode::BAD_GATEWAY, m),
            ApiError::Auth(AuthError::EmailTaken) => (StatusCode::CONFLICT, AuthError::EmailTaken.to_string()),
            ApiError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::NoSession => (StatusCode::UNAUTHORIZED, "missing or unknown session".to_string()),
            ApiError::LoginRequired => (StatusCode::FORBIDDEN, "log in to the bulletin board first".to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ==============================================================================
// router
// ==============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/refresh", post(page_refresh))
        .route("/api/dashboard", get(snapshot_handler))
        .route("/api/session", post(create_session).get(session_status).delete(end_session))
        .route("/api/session/guest", put(set_guest).delete(reset_guest))
        .route("/api/readings", get(readings_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/comments", get(list_comments).post(add_comment))
        .route("/api/comments/:id/replies", get(list_replies).post(add_reply))
        .route("/api/bbs/boards", get(list_boards))
        .route("/api/bbs/register", post(bbs_register))
        .route("/api/bbs/login", post(bbs_login))
        .route("/api/bbs/logout", post(bbs_logout))
        .route("/api/bbs/boards/:board/posts", get(list_posts).post(create_post))
        .route("/api/bbs/posts/:id", get(get_post))
        .route("/api/bbs/posts/:id/replies", post(add_post_reply))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.server.bind.clone();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "dashboard listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ==============================================================================
// dashboard
// ==============================================================================

#[derive(Deserialize)]
struct ReadingsParams {
    hours: Option<u32>,
}

/// the default range comes from the refresh snapshot; other ranges load
/// through the page cache
async fn dashboard_handler(
    State(state): State<AppState>,
    Query(params): Query<ReadingsParams>,
) -> Result<Html<String>, ApiError> {
    let default_hours = state.config.sensors.default_hours;
    let hours = params.hours.unwrap_or(default_hours);
    let view = if hours == default_hours {
        state.snapshot.read().await.clone()
    } else {
        let mut cache = state.page_cache.lock().await;
        load_view(&mut cache, state.gateway.as_ref(), hours, state.config.sensors.row_limit, Utc::now()).await?
    };
    // a failed comment read only hides the comment section
    let comments = match state.comments.recent_comments(state.config.community.preview_limit).await {
        Ok(comments) => comments,
        Err(e) => {
            warn!(error = %e, "comment preview unavailable");
            Vec::new()
        }
    };
    let options = PageOptions {
        auto_refresh: state.config.polling.auto_refresh.then_some(state.config.polling.interval_seconds),
    };
    Ok(Html(dashboard_page(&view, &comments, &options)))
}

#[derive(Deserialize)]
struct RefreshForm {
    hours: Option<u32>,
}

/// the page's refresh button: reload now, then back to the same range
async fn page_refresh(State(state): State<AppState>, Form(form): Form<RefreshForm>) -> Result<Redirect, ApiError> {
    let hours = form.hours.unwrap_or(state.config.sensors.default_hours);
    if !RANGE_OPTIONS.contains(&hours) {
        return Err(ValidationError::UnsupportedRange(hours).into());
    }
    state.refresh_snapshot().await;
    info!(hours, "manual refresh");
    Ok(Redirect::to(&format!("/?hours={hours}")))
}

async fn snapshot_handler(State(state): State<AppState>) -> Json<DashboardView> {
    Json(state.snapshot.read().await.clone())
}

async fn readings_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ReadingsParams>,
) -> ApiResult<DashboardView> {
    let ctx = state.session(&headers)?;
    let mut ctx = ctx.lock().await;
    let hours = params.hours.unwrap_or(state.config.sensors.default_hours);
    let view = load_view(&mut ctx.cache, state.gateway.as_ref(), hours, state.config.sensors.row_limit, Utc::now()).await?;
    Ok(Json(view))
}

async fn refresh_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let ctx = state.session(&headers)?;
    let mut ctx = ctx.lock().await;
    debug!(entries = ctx.cache.len(), "series cache cleared");
    ctx.cache.invalidate_all();
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// session / identity
// ==============================================================================

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let id = lock(&state.sessions).open(state.new_session());
    debug!(session = %id, "session opened");
    (
        StatusCode::CREATED,
        Json(json!({ "session_id": id, "ranges": RANGE_OPTIONS })),
    )
}

async fn end_session(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let id = session_id(&headers)?;
    if !lock(&state.sessions).close(&id) {
        return Err(ApiError::NoSession);
    }
    debug!(session = %id, "session closed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct SessionStatus {
    state: crate::session::SessionState,
    guest_name: Option<String>,
    account: Option<crate::auth::AuthUser>,
    member: Option<Member>,
}

async fn session_status(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<SessionStatus> {
    let ctx = state.session(&headers)?;
    let ctx = ctx.lock().await;
    Ok(Json(SessionStatus {
        state: ctx.session.state(),
        guest_name: ctx.session.guest_name().map(str::to_string),
        account: ctx.session.account().cloned(),
        member: ctx.member.clone(),
    }))
}

#[derive(Deserialize)]
struct GuestForm {
    name: String,
}

async fn set_guest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<GuestForm>,
) -> ApiResult<serde_json::Value> {
    let ctx = state.session(&headers)?;
    let mut ctx = ctx.lock().await;
    ctx.session.set_guest_name(&form.name)?;
    Ok(Json(json!({ "guest_name": ctx.session.guest_name() })))
}

async fn reset_guest(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let ctx = state.session(&headers)?;
    ctx.lock().await.session.reset_guest_name();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SignUpForm {
    email: String,
    password: String,
    display_name: String,
}

async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<SignUpForm>,
) -> Result<(StatusCode, Json<crate::auth::AuthUser>), ApiError> {
    let ctx = state.session(&headers)?;
    let ctx = ctx.lock().await;
    let user = ctx
        .session
        .sign_up(state.auth.as_ref(), &form.email, &form.password, &form.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<Credentials>,
) -> ApiResult<crate::auth::AuthUser> {
    let ctx = state.session(&headers)?;
    let mut ctx = ctx.lock().await;
    let user = ctx.session.sign_in(state.auth.as_ref(), &form.email, &form.password).await?;
    Ok(Json(user.clone()))
}

async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let ctx = state.session(&headers)?;
    ctx.lock().await.session.sign_out(state.auth.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// comments
// ==============================================================================

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct CommentEntry {
    #[serde(flatten)]
    comment: Comment,
    reply_count: usize,
}

async fn list_comments(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<CommentEntry>> {
    let limit = params.limit.unwrap_or(state.config.community.comment_limit);
    let comments = state.comments.list_comments(limit).await?;
    let ids: Vec<i64> = comments.iter().map(|c| c.id).collect();
    // counts are decoration; a failed count read still returns the list
    let counts = state.comments.reply_counts(&ids).await.unwrap_or_else(|e| {
        warn!(error = %e, "reply counts unavailable");
        HashMap::new()
    });
    let entries = comments
        .into_iter()
        .map(|comment| CommentEntry { reply_count: counts.get(&comment.id).copied().unwrap_or(0), comment })
        .collect();
    Ok(Json(entries))
}

#[derive(Deserialize)]
struct CommentForm {
    content: String,
    category: CommentCategory,
    channel: Channel,
}

async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<CommentForm>,
) -> Result<StatusCode, ApiError> {
    let ctx = state.session(&headers)?;
    let identity = ctx.lock().await.session.identity(form.channel);
    state.comments.add_comment(&identity, &form.content, form.category).await?;
    Ok(StatusCode::CREATED)
}

async fn list_replies(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<serde_json::Value> {
    let replies = state.comments.list_replies(id).await?;
    Ok(Json(json!({ "count": replies.len(), "replies": replies })))
}

#[derive(Deserialize)]
struct ReplyForm {
    content: String,
    channel: Channel,
}

async fn add_reply(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(form): Json<ReplyForm>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let ctx = state.session(&headers)?;
    let identity = ctx.lock().await.session.identity(form.channel);
    state.comments.add_reply(id, &identity, &form.content).await?;
    let reply_count = state.comments.reply_count(id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "reply_count": reply_count }))))
}

// ==============================================================================
// bulletin board
// ==============================================================================

#[derive(Serialize)]
struct BoardInfo {
    key: &'static str,
    title: &'static str,
    description: &'static str,
    posts: usize,
}

async fn list_boards(State(state): State<AppState>) -> Json<Vec<BoardInfo>> {
    let bbs = lock(&state.bulletin);
    Json(
        Board::ALL
            .iter()
            .map(|b| BoardInfo {
                key: b.key(),
                title: b.title(),
                description: b.description(),
                posts: bbs.count(*b),
            })
            .collect(),
    )
}

#[derive(Deserialize)]
struct RegisterForm {
    name: String,
    email: String,
    password: String,
    confirm: String,
}

async fn bbs_register(
    State(state): State<AppState>,
    Json(form): Json<RegisterForm>,
) -> Result<(StatusCode, Json<Member>), ApiError> {
    let member = lock(&state.members).register(&form.name, &form.email, &form.password, &form.confirm)?;
    info!(email = %member.email, "bulletin member registered");
    Ok((StatusCode::CREATED, Json(member)))
}

async fn bbs_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<Credentials>,
) -> ApiResult<Member> {
    let ctx = state.session(&headers)?;
    let member = lock(&state.members).login(&form.email, &form.password)?;
    ctx.lock().await.member = Some(member.clone());
    Ok(Json(member))
}

async fn bbs_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let ctx = state.session(&headers)?;
    ctx.lock().await.member = None;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_member(state: &AppState, headers: &HeaderMap) -> Result<Member, ApiError> {
    let ctx = state.session(headers)?;
    let member = ctx.lock().await.member.clone();
    member.ok_or(ApiError::LoginRequired)
}

#[derive(Serialize)]
struct PostSummary {
    id: u64,
    title: String,
    preview: String,
    author: String,
    created_at: chrono::DateTime<Utc>,
    replies: usize,
}

impl From<&Post> for PostSummary {
    fn from(p: &Post) -> Self {
        Self {
            id: p.id,
            title: p.title.clone(),
            preview: p.preview(),
            author: p.author.clone(),
            created_at: p.created_at,
            replies: p.replies.len(),
        }
    }
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

async fn list_posts(
    State(state): State<AppState>,
    Path(board): Path<String>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<PostSummary>> {
    current_member(&state, &headers).await?;
    let board: Board = board.parse()?;
    let bbs = lock(&state.bulletin);
    let posts = match params.q.as_deref() {
        Some(term) => bbs.search(board, term),
        None => bbs.list(board),
    };
    Ok(Json(posts.into_iter().map(PostSummary::from).collect()))
}

#[derive(Deserialize)]
struct PostForm {
    title: String,
    content: String,
}

async fn create_post(
    State(state): State<AppState>,
    Path(board): Path<String>,
    headers: HeaderMap,
    Json(form): Json<PostForm>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let member = current_member(&state, &headers).await?;
    let board: Board = board.parse()?;
    let post = lock(&state.bulletin).create_post(board, &form.title, &form.content, &member.name)?;
    info!(post_id = post.id, %board, "bulletin post created");
    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(State(state): State<AppState>, Path(id): Path<u64>, headers: HeaderMap) -> ApiResult<Post> {
    current_member(&state, &headers).await?;
    let bbs = lock(&state.bulletin);
    let post = bbs.get(id).cloned().ok_or(BulletinError::PostNotFound(id))?;
    Ok(Json(post))
}

#[derive(Deserialize)]
struct BulletinReplyForm {
    content: String,
}

async fn add_post_reply(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(form): Json<BulletinReplyForm>,
) -> Result<(StatusCode, Json<crate::bulletin::BulletinReply>), ApiError> {
    let member = current_member(&state, &headers).await?;
    let reply = lock(&state.bulletin).add_bulletin_reply(id, &member.name, &form.content)?;
    Ok((StatusCode::CREATED, Json(reply)))
}
