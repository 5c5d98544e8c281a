//! ==============================================================================
//! bulletin.rs - login-gated multi-board bulletin board (in memory)
//! ==============================================================================
//!
//! purpose:
//!     a separate community space with four fixed boards, its own member
//!     directory and a post -> reply hierarchy. nothing is persisted; the
//!     store lives as long as the process.
//!
//! rules:
//!     - post ids are max-existing-id + 1 across all boards
//!     - replies append to the post in place
//!     - search is a case-insensitive substring match on title and content,
//!       recomputed per call
//!     - listings are newest first (descending id)
//!
//! the store is not safe for concurrent writers by itself; server.rs keeps it
//! behind a single mutex.
//!
//! ==============================================================================

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, BulletinError, ValidationError};

const PREVIEW_CHARS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Board {
    Learning,
    Free,
    Tech,
    Project,
}

impl Board {
    pub const ALL: [Board; 4] = [Board::Learning, Board::Free, Board::Tech, Board::Project];

    pub fn key(self) -> &'static str {
        match self {
            Board::Learning => "learning",
            Board::Free => "free",
            Board::Tech => "tech",
            Board::Project => "project",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Board::Learning => "Learning",
            Board::Free => "Free talk",
            Board::Tech => "Tech",
            Board::Project => "Projects",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Board::Learning => "assignments, shared material, Q&A",
            Board::Free => "daily chat, ideas, small talk",
            Board::Tech => "coding questions, troubleshooting, tips",
            Board::Project => "progress updates, results, collaboration",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Board {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Board::ALL
            .into_iter()
            .find(|b| b.key() == s)
            .ok_or_else(|| ValidationError::UnknownBoard(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BulletinReply {
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Post {
    pub id: u64,
    pub board: Board,
    pub title: String,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<BulletinReply>,
}

impl Post {
    /// first 100 characters of the body, with an ellipsis when cut
    pub fn preview(&self) -> String {
        if self.content.chars().count() > PREVIEW_CHARS {
            let head: String = self.content.chars().take(PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.content.clone()
        }
    }
}

#[derive(Debug, Default)]
pub struct BulletinBoard {
    posts: HashMap<Board, Vec<Post>>,
}

impl BulletinBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.posts.values().flatten().map(|p| p.id).max().unwrap_or(0) + 1
    }

    pub fn create_post(&mut self, board: Board, title: &str, content: &str, author: &str) -> Result<Post, BulletinError> {
        if title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle.into());
        }
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        let post = Post {
            id: self.next_id(),
            board,
            title: title.to_string(),
            content: content.to_string(),
            author: author.to_string(),
            created_at: Utc::now(),
            replies: Vec::new(),
        };
        self.posts.entry(board).or_default().push(post.clone());
        Ok(post)
    }

    pub fn add_bulletin_reply(&mut self, post_id: u64, author: &str, content: &str) -> Result<BulletinReply, BulletinError> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        let post = self
            .posts
            .values_mut()
            .flatten()
            .find(|p| p.id == post_id)
            .ok_or(BulletinError::PostNotFound(post_id))?;
        let reply = BulletinReply {
            author: author.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        post.replies.push(reply.clone());
        Ok(reply)
    }

    pub fn get(&self, post_id: u64) -> Option<&Post> {
        self.posts.values().flatten().find(|p| p.id == post_id)
    }

    /// whole board, newest first
    pub fn list(&self, board: Board) -> Vec<&Post> {
        self.search(board, "")
    }

    /// posts whose title or content contains `term`, ignoring case; an empty
    /// term matches everything
    pub fn search(&self, board: Board, term: &str) -> Vec<&Post> {
        let needle = term.trim().to_lowercase();
        let mut hits: Vec<&Post> = self
            .posts
            .get(&board)
            .map(|posts| {
                posts
                    .iter()
                    .filter(|p| {
                        needle.is_empty()
                            || p.title.to_lowercase().contains(&needle)
                            || p.content.to_lowercase().contains(&needle)
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.id.cmp(&a.id));
        hits
    }

    pub fn count(&self, board: Board) -> usize {
        self.posts.get(&board).map_or(0, Vec::len)
    }
}

// ==============================================================================
// member directory
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// a logged-in bulletin member as seen by the session
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Member {
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug)]
struct MemberRecord {
    name: String,
    password_digest: String,
    role: Role,
}

#[derive(Debug, Default)]
pub struct MemberDirectory {
    members: HashMap<String, MemberRecord>,
}

fn digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// adds an account directly; used to seed staff accounts
    pub fn insert(&mut self, email: &str, name: &str, password: &str, role: Role) {
        self.members.insert(
            email.to_string(),
            MemberRecord { name: name.to_string(), password_digest: digest(password), role },
        );
    }

    pub fn register(&mut self, name: &str, email: &str, password: &str, confirm: &str) -> Result<Member, BulletinError> {
        for (field, value) in [("name", name), ("email", email), ("password", password), ("password confirmation", confirm)] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field).into());
            }
        }
        if password != confirm {
            return Err(ValidationError::PasswordMismatch.into());
        }
        let email = email.trim();
        if self.members.contains_key(email) {
            return Err(AuthError::EmailTaken.into());
        }
        self.insert(email, name.trim(), password, Role::Student);
        Ok(Member { email: email.to_string(), name: name.trim().to_string(), role: Role::Student })
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Member, AuthError> {
        let email = email.trim();
        let record = self.members.get(email).ok_or(AuthError::UnknownEmail)?;
        if record.password_digest != digest(password) {
            return Err(AuthError::WrongPassword);
        }
        Ok(Member { email: email.to_string(), name: record.name.clone(), role: record.role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_keys_parse() {
        assert_eq!("tech".parse::<Board>().unwrap(), Board::Tech);
        assert_eq!(
            "games".parse::<Board>(),
            Err(ValidationError::UnknownBoard("games".to_string()))
        );
    }

    #[test]
    fn search_finds_post_by_title_substring() {
        let mut bbs = BulletinBoard::new();
        let post = bbs
            .create_post(Board::Tech, "Streamlit chart not showing", "line_chart renders nothing", "Kim")
            .unwrap();
        bbs.create_post(Board::Free, "Lunch?", "any chart recommendations", "Lee").unwrap();

        let hits = bbs.search(Board::Tech, "CHART NOT");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, post.id);
        assert!(bbs.search(Board::Tech, "lunch").is_empty());
        // content matches count too, but only within the board
        assert_eq!(bbs.search(Board::Free, "chart").len(), 1);
    }

    #[test]
    fn ids_are_global_and_increasing() {
        let mut bbs = BulletinBoard::new();
        let a = bbs.create_post(Board::Learning, "a", "a", "Kim").unwrap();
        let b = bbs.create_post(Board::Project, "b", "b", "Kim").unwrap();
        let c = bbs.create_post(Board::Learning, "c", "c", "Kim").unwrap();
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!((a.id, b.id, c.id), (1, 2, 3));
        assert_eq!(bbs.list(Board::Learning).iter().map(|p| p.id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn posts_need_title_and_content() {
        let mut bbs = BulletinBoard::new();
        assert_eq!(
            bbs.create_post(Board::Free, " ", "body", "Kim"),
            Err(BulletinError::Validation(ValidationError::EmptyTitle))
        );
        assert_eq!(
            bbs.create_post(Board::Free, "title", "", "Kim"),
            Err(BulletinError::Validation(ValidationError::EmptyContent))
        );
        assert_eq!(bbs.count(Board::Free), 0);
    }

    #[test]
    fn replies_append_in_place() {
        let mut bbs = BulletinBoard::new();
        let post = bbs.create_post(Board::Project, "smart farm", "stage one done", "Lee").unwrap();
        bbs.add_bulletin_reply(post.id, "Teacher", "great work").unwrap();
        bbs.add_bulletin_reply(post.id, "Kim", "share the code?").unwrap();

        let stored = bbs.get(post.id).unwrap();
        assert_eq!(stored.replies.len(), 2);
        assert_eq!(stored.replies[1].author, "Kim");
        assert_eq!(bbs.add_bulletin_reply(99, "Kim", "hi"), Err(BulletinError::PostNotFound(99)));
    }

    #[test]
    fn preview_cuts_long_bodies() {
        let mut bbs = BulletinBoard::new();
        let long = "x".repeat(150);
        let post = bbs.create_post(Board::Free, "long", &long, "Kim").unwrap();
        assert_eq!(post.preview().chars().count(), 103);
        let short = bbs.create_post(Board::Free, "short", "hi", "Kim").unwrap();
        assert_eq!(short.preview(), "hi");
    }

    #[test]
    fn register_and_login() {
        let mut members = MemberDirectory::new();
        let m = members.register("Kim", "kim@school.com", "student123", "student123").unwrap();
        assert_eq!(m.role, Role::Student);

        assert_eq!(
            members.register("Kim2", "kim@school.com", "x", "x"),
            Err(BulletinError::Auth(AuthError::EmailTaken))
        );
        assert_eq!(
            members.register("Lee", "lee@school.com", "a", "b"),
            Err(BulletinError::Validation(ValidationError::PasswordMismatch))
        );
        assert_eq!(
            members.register("", "x@school.com", "a", "a"),
            Err(BulletinError::Validation(ValidationError::MissingField("name")))
        );

        assert_eq!(members.login("kim@school.com", "student123").unwrap().name, "Kim");
        assert_eq!(members.login("kim@school.com", "nope"), Err(AuthError::WrongPassword));
        assert_eq!(members.login("who@school.com", "x"), Err(AuthError::UnknownEmail));
    }
}
