pub const SCHEMA: &str = r#"
-- Users are created on first OAuth login
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    external_id TEXT NOT NULL UNIQUE,   -- OAuth provider's user id
    avatar TEXT,
    bio TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Cached upstream repositories; enriched once, never refreshed
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    platform_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    language TEXT,
    stars INTEGER NOT NULL DEFAULT 0,
    forks INTEGER NOT NULL DEFAULT 0,
    url TEXT NOT NULL,
    platform_data TEXT,   -- JSON
    ai_analysis TEXT,     -- JSON, versioned
    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(platform, platform_id)
);

-- Bookmarks join users to repositories
CREATE TABLE IF NOT EXISTS bookmarks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(user_id, repository_id)
);

CREATE INDEX IF NOT EXISTS idx_bookmarks_user ON bookmarks(user_id);
"#;
