mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Result of an insert that tolerates an existing row with the same key.
#[derive(Debug, Clone)]
pub enum InsertOutcome<T> {
    Created(T),
    Existing(T),
}

impl<T> InsertOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            InsertOutcome::Created(v) | InsertOutcome::Existing(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, InsertOutcome::Created(_))
    }
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &NewUser) -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>>;

    // Repository operations
    fn get_repository(&self, id: i64) -> Result<Option<Repository>>;
    fn get_repository_by_platform_id(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<Repository>>;
    /// Inserts unless (platform, platform_id) already exists, then returns the
    /// persisted row. Concurrent callers all observe the first writer's row.
    fn insert_repository(&self, repo: &NewRepository) -> Result<InsertOutcome<Repository>>;

    // Bookmark operations
    fn create_bookmark(&self, user_id: i64, repository_id: i64) -> Result<Bookmark>;
    fn get_bookmark(&self, user_id: i64, repository_id: i64) -> Result<Option<Bookmark>>;
    fn list_bookmarked_repositories(&self, user_id: i64) -> Result<Vec<Repository>>;
}
