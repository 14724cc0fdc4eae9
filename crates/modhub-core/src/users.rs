//! User directory collaborator.
//!
//! The hub only reads users; account management lives elsewhere.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CollaboratorError;

/// One user account as the hub sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable numeric id.
    pub id: i64,
    /// Login name, unique.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Role name used for permission checks.
    pub role: String,
}

/// Read-only access to user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by login name.
    async fn lookup_by_name(&self, username: &str) -> Result<Option<UserRecord>, CollaboratorError>;

    /// Every user, ordered by username.
    async fn list_all(&self) -> Result<Vec<UserRecord>, CollaboratorError>;

    /// Role of the user with `id`.
    async fn get_role(&self, id: i64) -> Result<Option<String>, CollaboratorError>;
}

/// In-memory directory, optionally seeded from a JSON array of records.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: BTreeMap<String, UserRecord>,
}

impl StaticUserDirectory {
    /// Build from records. Later duplicates of a username replace earlier ones.
    pub fn new(users: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.username.clone(), user))
                .collect(),
        }
    }

    /// Load a JSON array of [`UserRecord`]s.
    pub fn from_json_file(path: &Path) -> Result<Self, CollaboratorError> {
        let raw = std::fs::read_to_string(path)?;
        let users: Vec<UserRecord> = serde_json::from_str(&raw)?;
        Ok(Self::new(users))
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the directory has no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn lookup_by_name(&self, username: &str) -> Result<Option<UserRecord>, CollaboratorError> {
        Ok(self.users.get(username).cloned())
    }

    async fn list_all(&self) -> Result<Vec<UserRecord>, CollaboratorError> {
        Ok(self.users.values().cloned().collect())
    }

    async fn get_role(&self, id: i64) -> Result<Option<String>, CollaboratorError> {
        Ok(self
            .users
            .values()
            .find(|user| user.id == id)
            .map(|user| user.role.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn user(id: i64, name: &str, role: &str) -> UserRecord {
        UserRecord {
            id,
            username: name.into(),
            email: format!("{name}@example.com"),
            role: role.into(),
        }
    }

    #[tokio::test]
    async fn lookup_known_and_unknown() {
        let dir = StaticUserDirectory::new([user(1, "ada", "admin")]);
        assert_eq!(dir.lookup_by_name("ada").await.unwrap().unwrap().id, 1);
        assert!(dir.lookup_by_name("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_sorted_by_username() {
        let dir = StaticUserDirectory::new([user(2, "zed", "user"), user(1, "ada", "admin")]);
        let names: Vec<_> = dir
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["ada", "zed"]);
    }

    #[tokio::test]
    async fn role_by_id() {
        let dir = StaticUserDirectory::new([user(7, "ada", "admin")]);
        assert_eq!(dir.get_role(7).await.unwrap().as_deref(), Some("admin"));
        assert!(dir.get_role(8).await.unwrap().is_none());
    }

    #[test]
    fn duplicate_username_keeps_last() {
        let dir = StaticUserDirectory::new([user(1, "ada", "user"), user(2, "ada", "admin")]);
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 3, "username": "eve", "email": "e@x", "role": "viewer"}}]"#
        )
        .unwrap();
        let dir = StaticUserDirectory::from_json_file(file.path()).unwrap();
        let eve = dir.lookup_by_name("eve").await.unwrap().unwrap();
        assert_eq!(eve.role, "viewer");
    }

    #[test]
    fn bad_json_file_is_data_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = StaticUserDirectory::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, CollaboratorError::Json(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StaticUserDirectory::from_json_file(Path::new("/nonexistent/users.json"))
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Io(_)));
    }
}
