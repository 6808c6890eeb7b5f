use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::schema::SCHEMA;
use super::{InsertOutcome, Store};
use crate::config::DatabaseUrl;
use crate::error::{Error, Result};
use crate::retry::{RetryDecision, RetryPolicy, retry};
use crate::types::*;

const REPOSITORY_COLUMNS: &str = "r.id, r.platform, r.platform_id, r.name, r.description, r.language,
     r.stars, r.forks, r.url, r.platform_data, r.ai_analysis, r.created_at";

const USER_COLUMNS: &str = "id, username, external_id, avatar, bio, created_at";

const BOOKMARK_COLUMNS: &str = "id, user_id, repository_id, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn open(url: &DatabaseUrl) -> Result<Self> {
        match url {
            DatabaseUrl::Memory => Self::in_memory(),
            DatabaseUrl::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Self::new(path)
            }
        }
    }

    /// Opens the database, retrying transient failures (busy or locked files,
    /// a volume that is not mounted yet) according to `policy`.
    pub async fn connect(url: &DatabaseUrl, policy: &RetryPolicy) -> Result<Self> {
        retry(policy, classify_open_error, |attempt| async move {
            let result = Self::open(url);
            if let Err(e) = &result {
                tracing::warn!("Failed to open database (attempt {}): {e}", attempt + 1);
            }
            result
        })
        .await
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // In-memory databases report "memory" and ignore WAL.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn classify_open_error(err: &Error) -> RetryDecision {
    match err {
        Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
            ) =>
        {
            RetryDecision::Backoff
        }
        Error::Io(_) => RetryDecision::Backoff,
        _ => RetryDecision::Stop,
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        external_id: row.get(2)?,
        avatar: row.get(3)?,
        bio: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn bookmark_from_row(row: &Row<'_>) -> rusqlite::Result<Bookmark> {
    Ok(Bookmark {
        id: row.get(0)?,
        user_id: row.get(1)?,
        repository_id: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let id: i64 = row.get(0)?;
    let platform: String = row.get(1)?;
    let platform = platform
        .parse::<Platform>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;

    let platform_data = row
        .get::<_, Option<String>>(9)?
        .and_then(|raw| match serde_json::from_str::<PlatformData>(&raw) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("Ignoring unreadable platform data for repository {id}: {e}");
                None
            }
        });

    let ai_analysis = row
        .get::<_, Option<String>>(10)?
        .and_then(|raw| match AiAnalysis::from_stored(&raw) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                tracing::warn!("Ignoring unreadable analysis for repository {id}: {e}");
                None
            }
        });

    Ok(Repository {
        id,
        platform,
        platform_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        language: row.get(5)?,
        stars: row.get(6)?,
        forks: row.get(7)?,
        url: row.get(8)?,
        platform_data,
        ai_analysis,
        created_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn is_constraint(err: &rusqlite::Error, extended_code: std::ffi::c_int) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == extended_code
    )
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &NewUser) -> Result<User> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO users (username, external_id, avatar, bio, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.username,
                user.external_id,
                user.avatar,
                user.bio,
                format_datetime(&Utc::now()),
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                return Err(Error::AlreadyExists);
            }
            Err(e) => return Err(Error::from(e)),
        }

        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .map_err(Error::from)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1"),
                params![external_id],
                user_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    // Repository operations

    fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        self.conn()
            .query_row(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories r WHERE r.id = ?1"),
                params![id],
                repository_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_repository_by_platform_id(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<Repository>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REPOSITORY_COLUMNS} FROM repositories r
                     WHERE r.platform = ?1 AND r.platform_id = ?2"
                ),
                params![platform.as_str(), platform_id],
                repository_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn insert_repository(&self, repo: &NewRepository) -> Result<InsertOutcome<Repository>> {
        let platform_data = repo
            .platform_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let ai_analysis = repo.ai_analysis.as_ref().map(AiAnalysis::to_stored).transpose()?;

        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO repositories
                 (platform, platform_id, name, description, language, stars, forks, url,
                  platform_data, ai_analysis, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(platform, platform_id) DO NOTHING",
            params![
                repo.platform.as_str(),
                repo.platform_id,
                repo.name,
                repo.description,
                repo.language,
                repo.stars,
                repo.forks,
                repo.url,
                platform_data,
                ai_analysis,
                format_datetime(&Utc::now()),
            ],
        )?;

        let stored = conn.query_row(
            &format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories r
                 WHERE r.platform = ?1 AND r.platform_id = ?2"
            ),
            params![repo.platform.as_str(), repo.platform_id],
            repository_from_row,
        )?;

        Ok(if inserted > 0 {
            InsertOutcome::Created(stored)
        } else {
            InsertOutcome::Existing(stored)
        })
    }

    // Bookmark operations

    fn create_bookmark(&self, user_id: i64, repository_id: i64) -> Result<Bookmark> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO bookmarks (user_id, repository_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, repository_id, format_datetime(&Utc::now())],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                return Err(Error::AlreadyExists);
            }
            Err(e) if is_constraint(&e, rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                return Err(Error::NotFound);
            }
            Err(e) => return Err(Error::from(e)),
        }

        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {BOOKMARK_COLUMNS} FROM bookmarks WHERE id = ?1"),
            params![id],
            bookmark_from_row,
        )
        .map_err(Error::from)
    }

    fn get_bookmark(&self, user_id: i64, repository_id: i64) -> Result<Option<Bookmark>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
                     WHERE user_id = ?1 AND repository_id = ?2"
                ),
                params![user_id, repository_id],
                bookmark_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_bookmarked_repositories(&self, user_id: i64) -> Result<Vec<Repository>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPOSITORY_COLUMNS}
             FROM bookmarks b
             JOIN repositories r ON r.id = b.repository_id
             WHERE b.user_id = ?1
             ORDER BY b.id"
        ))?;

        let rows = stmt.query_map(params![user_id], repository_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn new_repo(platform_id: &str, suggestion: &str) -> NewRepository {
        NewRepository {
            platform: Platform::Github,
            platform_id: platform_id.to_string(),
            name: "acme/demo".to_string(),
            description: Some("A demo".to_string()),
            language: Some("Rust".to_string()),
            stars: 1500,
            forks: 12,
            url: "https://github.com/acme/demo".to_string(),
            platform_data: Some(PlatformData::Github {
                owner: "acme".to_string(),
                repo: "demo".to_string(),
                topics: vec!["cli".to_string()],
                license: None,
            }),
            ai_analysis: Some(AiAnalysis {
                suggestions: vec![suggestion.to_string(), "b".to_string(), "c".to_string()],
                analyzed_at: Utc::now(),
                top_keywords: None,
                domain_category: Some(DomainCategory::DevOps),
                trending_score: Some(61),
                insights: None,
            }),
        }
    }

    fn new_user(name: &str, external_id: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            external_id: external_id.to_string(),
            avatar: None,
            bio: None,
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = test_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"repositories".to_string()));
        assert!(tables.contains(&"bookmarks".to_string()));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_temp, store) = test_store();
        store.initialize().unwrap();
    }

    #[test]
    fn test_insert_repository_keeps_first_writer() {
        let (_temp, store) = test_store();

        let first = store.insert_repository(&new_repo("42", "first")).unwrap();
        assert!(first.was_created());
        let first = first.into_inner();
        assert_eq!(first.platform_data, new_repo("42", "first").platform_data);

        let second = store.insert_repository(&new_repo("42", "second")).unwrap();
        assert!(!second.was_created());
        let second = second.into_inner();

        assert_eq!(first.id, second.id);
        assert_eq!(second.ai_analysis.unwrap().suggestions[0], "first");

        let by_key = store
            .get_repository_by_platform_id(Platform::Github, "42")
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, first.id);
        assert!(
            store
                .get_repository_by_platform_id(Platform::Gitlab, "42")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_same_platform_id_on_other_platform_is_distinct() {
        let (_temp, store) = test_store();

        let github = store.insert_repository(&new_repo("7", "a")).unwrap().into_inner();
        let mut gitlab = new_repo("7", "a");
        gitlab.platform = Platform::Gitlab;
        let gitlab = store.insert_repository(&gitlab).unwrap().into_inner();

        assert_ne!(github.id, gitlab.id);
    }

    #[test]
    fn test_legacy_analysis_rows_are_readable() {
        let (_temp, store) = test_store();
        let repo = store.insert_repository(&new_repo("1", "a")).unwrap().into_inner();

        store
            .conn()
            .execute(
                "UPDATE repositories SET ai_analysis = ?1 WHERE id = ?2",
                params![
                    r#"{"suggestions":["x","y","z"],"analyzedAt":"2024-05-01T00:00:00Z"}"#,
                    repo.id
                ],
            )
            .unwrap();

        let fetched = store.get_repository(repo.id).unwrap().unwrap();
        let analysis = fetched.ai_analysis.unwrap();
        assert_eq!(analysis.suggestions, vec!["x", "y", "z"]);
        assert!(analysis.domain_category.is_none());
    }

    #[test]
    fn test_unversioned_rich_analysis_rows_keep_their_fields() {
        let (_temp, store) = test_store();
        let repo = store.insert_repository(&new_repo("1", "a")).unwrap().into_inner();

        let raw = r#"{"suggestions":["a","b","c"],"analyzedAt":"2024-01-02T03:04:05.000Z","topKeywords":["rust"],"domainCategory":"Web Development","trendingScore":75,"insights":{"trendReason":"r","ecosystemImpact":"e","futureOutlook":"f"}}"#;
        store
            .conn()
            .execute(
                "UPDATE repositories SET ai_analysis = ?1 WHERE id = ?2",
                params![raw, repo.id],
            )
            .unwrap();

        let analysis = store
            .get_repository(repo.id)
            .unwrap()
            .unwrap()
            .ai_analysis
            .expect("unversioned analysis is migrated");
        assert_eq!(analysis.top_keywords, Some(vec!["rust".to_string()]));
        assert_eq!(analysis.domain_category, Some(DomainCategory::WebDevelopment));
        assert_eq!(analysis.trending_score, Some(75));
        assert_eq!(analysis.insights.unwrap().future_outlook, "f");
    }

    #[test]
    fn test_garbage_analysis_is_dropped_not_fatal() {
        let (_temp, store) = test_store();
        let repo = store.insert_repository(&new_repo("1", "a")).unwrap().into_inner();

        store
            .conn()
            .execute(
                "UPDATE repositories SET ai_analysis = '{\"unexpected\":true}' WHERE id = ?1",
                params![repo.id],
            )
            .unwrap();

        let fetched = store.get_repository(repo.id).unwrap().unwrap();
        assert!(fetched.ai_analysis.is_none());
    }

    #[test]
    fn test_user_crud() {
        let (_temp, store) = test_store();

        let user = store.create_user(&new_user("octo", "583231")).unwrap();
        assert_eq!(user.username, "octo");

        let fetched = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(fetched.external_id, "583231");

        let by_external = store.get_user_by_external_id("583231").unwrap().unwrap();
        assert_eq!(by_external.id, user.id);

        let dup = store.create_user(&new_user("someone-else", "583231"));
        assert!(matches!(dup, Err(Error::AlreadyExists)));

        assert!(store.get_user(999).unwrap().is_none());
    }

    #[test]
    fn test_bookmark_uniqueness() {
        let (_temp, store) = test_store();
        let user = store.create_user(&new_user("octo", "1")).unwrap();
        let repo = store.insert_repository(&new_repo("42", "a")).unwrap().into_inner();

        let bookmark = store.create_bookmark(user.id, repo.id).unwrap();
        assert_eq!(bookmark.user_id, user.id);
        assert_eq!(bookmark.repository_id, repo.id);

        let dup = store.create_bookmark(user.id, repo.id);
        assert!(matches!(dup, Err(Error::AlreadyExists)));

        assert!(store.get_bookmark(user.id, repo.id).unwrap().is_some());
        assert_eq!(store.list_bookmarked_repositories(user.id).unwrap().len(), 1);
    }

    #[test]
    fn test_bookmark_unknown_repository_is_not_found() {
        let (_temp, store) = test_store();
        let user = store.create_user(&new_user("octo", "1")).unwrap();

        let result = store.create_bookmark(user.id, 404);
        assert!(matches!(result, Err(Error::NotFound)));
        assert!(store.list_bookmarked_repositories(user.id).unwrap().is_empty());
    }

    #[test]
    fn test_bookmarks_listed_in_insertion_order() {
        let (_temp, store) = test_store();
        let user = store.create_user(&new_user("octo", "1")).unwrap();
        let a = store.insert_repository(&new_repo("1", "a")).unwrap().into_inner();
        let b = store.insert_repository(&new_repo("2", "b")).unwrap().into_inner();

        store.create_bookmark(user.id, b.id).unwrap();
        store.create_bookmark(user.id, a.id).unwrap();

        let ids: Vec<i64> = store
            .list_bookmarked_repositories(user.id)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn test_connect_creates_parent_directories() {
        let temp = TempDir::new().unwrap();
        let url = DatabaseUrl::File(temp.path().join("nested/dir/app.db"));

        let store = SqliteStore::connect(&url, &RetryPolicy::immediate(2)).await.unwrap();
        store.initialize().unwrap();
        assert!(temp.path().join("nested/dir/app.db").exists());
    }
}
