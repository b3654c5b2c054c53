use rusqlite::{Connection, Result as SqlResult};

// Schema definitions
pub const GAMES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    name                  TEXT NOT NULL UNIQUE,
    folder_name           TEXT NOT NULL UNIQUE,
    steam_app_id          INTEGER UNIQUE,
    cover_path            TEXT,
    is_public             BOOLEAN DEFAULT FALSE,

    -- Denormalized stats, recomputed after ingest batches
    screenshot_count      INTEGER DEFAULT 0,
    first_screenshot_date TEXT,
    last_screenshot_date  TEXT,

    created_at            TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at            TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

pub const SCREENSHOTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS screenshots (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id             INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    filename            TEXT NOT NULL,
    file_path           TEXT NOT NULL,
    thumb_sm_path       TEXT,
    thumb_md_path       TEXT,
    file_size           INTEGER,
    width               INTEGER,
    height              INTEGER,
    format              TEXT,
    taken_at            TEXT,
    uploaded_at         TEXT NOT NULL DEFAULT (datetime('now')),
    steam_screenshot_id TEXT,
    steam_description   TEXT,
    source              TEXT NOT NULL DEFAULT 'upload'
                        CHECK(source IN ('upload', 'steam_import', 'steam_local')),
    file_hash           TEXT NOT NULL CHECK(length(file_hash) = 64),
    exif_data           TEXT,
    is_favorite         BOOLEAN DEFAULT FALSE,
    view_count          INTEGER DEFAULT 0,
    created_at          TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at          TEXT NOT NULL DEFAULT (datetime('now')),

    -- Dedup identities: a screenshot is unique within its game by Steam id
    -- (when present) and by content hash.
    UNIQUE(game_id, steam_screenshot_id),
    UNIQUE(game_id, file_hash)
)
"#;

pub const IMPORT_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS import_sessions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    steam_user_id     TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'running'
                      CHECK(status IN ('running', 'completed', 'cancelled', 'failed')),
    total_games       INTEGER DEFAULT 0,
    total_screenshots INTEGER DEFAULT 0,
    completed         INTEGER DEFAULT 0,
    skipped           INTEGER DEFAULT 0,
    failed            INTEGER DEFAULT 0,
    last_error        TEXT,
    started_at        TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at       TEXT,
    created_at        TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

// Foreign-key collaborators of the import core. No handlers ship for these;
// the screenshot cascade and the FTS sync reference them.
pub const ANNOTATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS annotations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    screenshot_id INTEGER NOT NULL REFERENCES screenshots(id) ON DELETE CASCADE,
    content       TEXT NOT NULL,
    content_html  TEXT,
    created_at    TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

pub const SHARE_LINKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS share_links (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    screenshot_id INTEGER NOT NULL REFERENCES screenshots(id) ON DELETE CASCADE,
    token         TEXT NOT NULL UNIQUE,
    is_active     BOOLEAN DEFAULT TRUE,
    expires_at    TEXT,
    view_count    INTEGER DEFAULT 0,
    created_at    TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

pub const API_KEYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS api_keys (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    key_hash   TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_used  TEXT
)
"#;

// FTS5 search over screenshots. The content table mirrors the searchable
// fields; triggers keep the virtual table in sync.
pub const FTS_CONTENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS screenshots_fts_content (
    rowid             INTEGER PRIMARY KEY,
    game_name         TEXT,
    filename          TEXT,
    steam_description TEXT
)
"#;

pub const FTS_TABLE: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS screenshots_fts USING fts5(
    game_name,
    filename,
    steam_description,
    content=screenshots_fts_content,
    content_rowid=rowid,
    tokenize='porter unicode61'
)
"#;

pub const FTS_INSERT_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS screenshots_fts_ai AFTER INSERT ON screenshots_fts_content BEGIN
    INSERT INTO screenshots_fts(rowid, game_name, filename, steam_description)
    VALUES (new.rowid, new.game_name, new.filename, new.steam_description);
END
"#;

pub const FTS_DELETE_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS screenshots_fts_ad AFTER DELETE ON screenshots_fts_content BEGIN
    INSERT INTO screenshots_fts(screenshots_fts, rowid, game_name, filename, steam_description)
    VALUES ('delete', old.rowid, old.game_name, old.filename, old.steam_description);
END
"#;

pub const FTS_UPDATE_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS screenshots_fts_au AFTER UPDATE ON screenshots_fts_content BEGIN
    INSERT INTO screenshots_fts(screenshots_fts, rowid, game_name, filename, steam_description)
    VALUES ('delete', old.rowid, old.game_name, old.filename, old.steam_description);
    INSERT INTO screenshots_fts(rowid, game_name, filename, steam_description)
    VALUES (new.rowid, new.game_name, new.filename, new.steam_description);
END
"#;

pub const SCHEMA_SQL: &[&str] = &[
    GAMES_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_games_steam_app_id ON games(steam_app_id);",
    "CREATE INDEX IF NOT EXISTS idx_games_name ON games(name);",
    SCREENSHOTS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_screenshots_game_id ON screenshots(game_id);",
    "CREATE INDEX IF NOT EXISTS idx_screenshots_taken_at ON screenshots(taken_at);",
    "CREATE INDEX IF NOT EXISTS idx_screenshots_steam_id ON screenshots(steam_screenshot_id);",
    "CREATE INDEX IF NOT EXISTS idx_screenshots_hash ON screenshots(file_hash);",
    "CREATE INDEX IF NOT EXISTS idx_screenshots_source ON screenshots(source);",
    IMPORT_SESSIONS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_import_sessions_user ON import_sessions(steam_user_id);",
    ANNOTATIONS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_annotations_screenshot_id ON annotations(screenshot_id);",
    SHARE_LINKS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_share_links_token ON share_links(token);",
    API_KEYS_TABLE,
    FTS_CONTENT_TABLE,
    FTS_TABLE,
    FTS_INSERT_TRIGGER,
    FTS_DELETE_TRIGGER,
    FTS_UPDATE_TRIGGER,
];

pub fn initialize_schema(conn: &Connection) -> SqlResult<()> {
    for sql in SCHEMA_SQL {
        conn.execute_batch(sql)?;
    }
    Ok(())
}
