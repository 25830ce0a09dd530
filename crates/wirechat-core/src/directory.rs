//! User directory collaborator
//!
//! The engine consumes a [`UserDirectory`] once at session start to seed
//! the chat list; it never depends on it for correctness. Applications
//! plug in whatever backs their roster (typically an HTTP endpoint);
//! [`StaticDirectory`] serves tests and the CLI.

use async_trait::async_trait;

use crate::error::ChatResult;
use crate::types::UserId;

/// A known user, as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// The user's id
    pub user_id: UserId,
    /// Display name for the chat list
    pub display_name: String,
}

impl UserInfo {
    /// Create a user entry.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            display_name: display_name.into(),
        }
    }
}

/// Supplies the full list of known users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// All known users.
    async fn list_users(&self) -> ChatResult<Vec<UserInfo>>;
}

/// Fixed in-memory roster.
pub struct StaticDirectory {
    users: Vec<UserInfo>,
}

impl StaticDirectory {
    /// Create a directory over a fixed user list.
    pub fn new(users: Vec<UserInfo>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn list_users(&self) -> ChatResult<Vec<UserInfo>> {
        Ok(self.users.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_lists_users() {
        let directory = StaticDirectory::new(vec![
            UserInfo::new("u2", "Bob"),
            UserInfo::new("u3", "Carol"),
        ]);

        let users = directory.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, UserId::new("u2"));
        assert_eq!(users[1].display_name, "Carol");
    }
}
