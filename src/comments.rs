//! ==============================================================================
//! comments.rs - comment / reply board on the remote store
//! ==============================================================================
//!
//! tables:
//!     user_comments    id, user_id?, username, content, type, created_at
//!     comment_replies  id, comment_id -> user_comments.id (cascade), user_id?,
//!                      username, content, created_at
//!
//! rows are append-only. counts are recomputed by re-querying, never cached.
//! empty content and anonymous writers are rejected before any network call.
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::domain::{Comment, CommentCategory, Reply, SortOrder};
use crate::error::{GatewayError, ValidationError, WriteError};
use crate::gateway::{DataGateway, Filter, TableQuery};
use crate::session::Identity;

pub const COMMENTS_TABLE: &str = "user_comments";
pub const REPLIES_TABLE: &str = "comment_replies";

pub const DEFAULT_COMMENT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct CommentStore {
    gateway: Arc<dyn DataGateway>,
}

impl CommentStore {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    pub async fn add_comment(
        &self,
        identity: &Identity,
        content: &str,
        category: CommentCategory,
    ) -> Result<(), WriteError> {
        let username = author(identity, content)?;
        let record = serde_json::json!({
            "user_id": identity.user_id(),
            "username": username,
            "content": content,
            "type": category,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.gateway.insert_record(COMMENTS_TABLE, record).await?;
        info!(username, category = category.label(), "comment added");
        Ok(())
    }

    /// newest first
    pub async fn list_comments(&self, limit: usize) -> Result<Vec<Comment>, GatewayError> {
        let query = TableQuery::default()
            .order("created_at", SortOrder::Descending)
            .limit(limit);
        let rows = self.gateway.query(COMMENTS_TABLE, &query).await?;
        decode(rows, COMMENTS_TABLE)
    }

    /// latest few comments for the page preview
    pub async fn recent_comments(&self, n: usize) -> Result<Vec<Comment>, GatewayError> {
        self.list_comments(n).await
    }

    pub async fn add_reply(&self, comment_id: i64, identity: &Identity, content: &str) -> Result<(), WriteError> {
        let username = author(identity, content)?;
        let record = serde_json::json!({
            "comment_id": comment_id,
            "user_id": identity.user_id(),
            "username": username,
            "content": content,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.gateway.insert_record(REPLIES_TABLE, record).await?;
        info!(comment_id, username, "reply added");
        Ok(())
    }

    /// oldest first, thread reading order
    pub async fn list_replies(&self, comment_id: i64) -> Result<Vec<Reply>, GatewayError> {
        let query = TableQuery::default()
            .filter(Filter::eq("comment_id", comment_id))
            .order("created_at", SortOrder::Ascending);
        let rows = self.gateway.query(REPLIES_TABLE, &query).await?;
        decode(rows, REPLIES_TABLE)
    }

    pub async fn reply_count(&self, comment_id: i64) -> Result<usize, GatewayError> {
        let query = TableQuery::default()
            .select("id")
            .filter(Filter::eq("comment_id", comment_id));
        Ok(self.gateway.query(REPLIES_TABLE, &query).await?.len())
    }

    /// reply counts for a page of comments in one read; ids without replies map to 0
    pub async fn reply_counts(&self, comment_ids: &[i64]) -> Result<HashMap<i64, usize>, GatewayError> {
        let mut counts: HashMap<i64, usize> = comment_ids.iter().map(|id| (*id, 0)).collect();
        if comment_ids.is_empty() {
            return Ok(counts);
        }
        let query = TableQuery::default()
            .select("comment_id")
            .filter(Filter::is_in("comment_id", comment_ids));
        for row in self.gateway.query(REPLIES_TABLE, &query).await? {
            if let Some(count) = row.get("comment_id").and_then(Value::as_i64).and_then(|id| counts.get_mut(&id)) {
                *count += 1;
            }
        }
        Ok(counts)
    }
}

fn author<'a>(identity: &'a Identity, content: &str) -> Result<&'a str, ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    identity.display_name().ok_or(ValidationError::IdentityRequired)
}

fn decode<T: serde::de::DeserializeOwned>(rows: Vec<Value>, table: &str) -> Result<Vec<T>, GatewayError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| GatewayError::MalformedPayload(format!("{table}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryGateway;

    fn guest() -> Identity {
        Identity::Guest { display_name: "Hong".to_string() }
    }

    fn store() -> (Arc<MemoryGateway>, CommentStore) {
        let gateway = Arc::new(MemoryGateway::new());
        (gateway.clone(), CommentStore::new(gateway))
    }

    #[tokio::test]
    async fn empty_comment_makes_no_call() {
        let (gateway, store) = store();
        let err = store.add_comment(&guest(), "  \n", CommentCategory::Question).await.unwrap_err();
        assert_eq!(err, WriteError::Validation(ValidationError::EmptyContent));
        assert_eq!(gateway.insert_count(), 0);
        assert_eq!(gateway.read_count(), 0);
    }

    #[tokio::test]
    async fn anonymous_cannot_write() {
        let (gateway, store) = store();
        let err = store.add_comment(&Identity::Anonymous, "hello", CommentCategory::Endorsement).await.unwrap_err();
        assert_eq!(err, WriteError::Validation(ValidationError::IdentityRequired));
        assert_eq!(gateway.insert_count(), 0);
    }

    #[tokio::test]
    async fn new_comment_heads_the_list() {
        let (gateway, store) = store();
        gateway
            .insert_record(
                COMMENTS_TABLE,
                serde_json::json!({
                    "user_id": null,
                    "username": "Lee",
                    "content": "older",
                    "type": "comment",
                    "created_at": "2024-03-15T12:00:00+00:00"
                }),
            )
            .await
            .unwrap();

        store.add_comment(&guest(), "hello", CommentCategory::Question).await.unwrap();

        let comments = store.list_comments(DEFAULT_COMMENT_LIMIT).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, "hello");
        assert_eq!(comments[0].category, CommentCategory::Question);
        assert_eq!(comments[0].username, "Hong");
        assert_eq!(comments[0].user_id, None);
    }

    #[tokio::test]
    async fn account_writes_carry_user_id() {
        let (gateway, store) = store();
        let identity = Identity::Authenticated { id: "u-1".to_string(), display_name: "Kim".to_string() };
        store.add_comment(&identity, "nice graph", CommentCategory::Endorsement).await.unwrap();
        let row = &gateway.rows(COMMENTS_TABLE)[0];
        assert_eq!(row["user_id"], "u-1");
        assert_eq!(row["type"], "comment");
    }

    #[tokio::test]
    async fn replies_read_oldest_first_per_comment() {
        let (gateway, store) = store();
        for (comment_id, content, at) in [
            (1, "second", "2024-03-15T12:10:00+00:00"),
            (1, "first", "2024-03-15T12:05:00+00:00"),
            (2, "other thread", "2024-03-15T12:00:00+00:00"),
        ] {
            gateway
                .insert_record(
                    REPLIES_TABLE,
                    serde_json::json!({
                        "comment_id": comment_id,
                        "username": "Lee",
                        "content": content,
                        "created_at": at
                    }),
                )
                .await
                .unwrap();
        }

        let replies = store.list_replies(1).await.unwrap();
        assert_eq!(replies.iter().map(|r| r.content.as_str()).collect::<Vec<_>>(), vec!["first", "second"]);
        assert_eq!(store.reply_count(1).await.unwrap(), 2);
        assert_eq!(store.reply_count(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reply_counts_use_a_single_read() {
        let (gateway, store) = store();
        for comment_id in [1, 1, 2, 9] {
            store.add_reply(comment_id, &guest(), "ok").await.unwrap();
        }

        let counts = store.reply_counts(&[1, 2, 3]).await.unwrap();
        assert_eq!(gateway.read_count(), 1);
        assert_eq!(counts[&1], 2);
        assert_eq!(counts[&2], 1);
        assert_eq!(counts[&3], 0);
        assert!(!counts.contains_key(&9));

        assert!(store.reply_counts(&[]).await.unwrap().is_empty());
        assert_eq!(gateway.read_count(), 1);
    }

    #[tokio::test]
    async fn add_reply_validates_then_inserts() {
        let (gateway, store) = store();
        assert!(store.add_reply(1, &guest(), "").await.is_err());
        store.add_reply(1, &guest(), "agreed").await.unwrap();
        assert_eq!(gateway.insert_count(), 1);
        assert_eq!(store.list_replies(1).await.unwrap()[0].content, "agreed");
    }
}
