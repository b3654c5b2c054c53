use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

pub use crate::db_pool::{create_in_memory_pool, DbPool};

use crate::library;

/// Where a screenshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotSource {
    Upload,
    SteamImport,
    SteamLocal,
}

impl ScreenshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotSource::Upload => "upload",
            ScreenshotSource::SteamImport => "steam_import",
            ScreenshotSource::SteamLocal => "steam_local",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "steam_import" => ScreenshotSource::SteamImport,
            "steam_local" => ScreenshotSource::SteamLocal,
            _ => ScreenshotSource::Upload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    pub name: String,
    pub folder_name: String,
    pub steam_app_id: Option<i64>,
    pub cover_path: Option<String>,
    pub is_public: bool,
    pub screenshot_count: i64,
    pub first_screenshot_date: Option<String>,
    pub last_screenshot_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Game {
    pub fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(Game {
            id: row.get(0)?,
            name: row.get(1)?,
            folder_name: row.get(2)?,
            steam_app_id: row.get(3)?,
            cover_path: row.get(4)?,
            is_public: row.get(5)?,
            screenshot_count: row.get(6)?,
            first_screenshot_date: row.get(7)?,
            last_screenshot_date: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    pub fn find(pool: &DbPool, id: i64) -> Result<Option<Game>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let game = conn
            .query_row("SELECT * FROM games WHERE id = ?", [id], Game::from_row)
            .optional()?;
        Ok(game)
    }

    pub fn find_by_steam_app_id(
        pool: &DbPool,
        app_id: i64,
    ) -> Result<Option<Game>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let game = conn
            .query_row(
                "SELECT * FROM games WHERE steam_app_id = ?",
                [app_id],
                Game::from_row,
            )
            .optional()?;
        Ok(game)
    }

    pub fn find_by_name(
        pool: &DbPool,
        name: &str,
    ) -> Result<Option<Game>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let game = conn
            .query_row("SELECT * FROM games WHERE name = ?", [name], Game::from_row)
            .optional()?;
        Ok(game)
    }

    pub fn list(pool: &DbPool, sort: Option<&str>) -> Result<Vec<Game>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;

        let order_clause = match sort {
            Some("date") => "last_screenshot_date DESC",
            Some("count") => "screenshot_count DESC",
            _ => "name ASC",
        };

        let query = format!("SELECT * FROM games ORDER BY {}", order_clause);
        let mut stmt = conn.prepare(&query)?;
        let game_iter = stmt.query_map([], Game::from_row)?;

        let mut games = Vec::new();
        for game in game_iter {
            games.push(game?);
        }
        Ok(games)
    }

    /// Finds a game by Steam app id, then by name, creating it with a
    /// unique filesystem-safe folder name when neither matches.
    pub fn get_or_create(
        pool: &DbPool,
        name: &str,
        steam_app_id: Option<i64>,
    ) -> Result<Game, Box<dyn std::error::Error>> {
        if let Some(app_id) = steam_app_id {
            if let Some(game) = Game::find_by_steam_app_id(pool, app_id)? {
                return Ok(game);
            }
        }
        if let Some(game) = Game::find_by_name(pool, name)? {
            return Ok(game);
        }
        Game::create(pool, name, steam_app_id)
    }

    pub fn create(
        pool: &DbPool,
        name: &str,
        steam_app_id: Option<i64>,
    ) -> Result<Game, Box<dyn std::error::Error>> {
        let conn = pool.get()?;

        // Unique folder name: deterministic derivation, numeric suffix on
        // collision with an existing game.
        let base = library::derive_folder_name(name);
        let mut folder_name = base.clone();
        let mut counter = 2;
        while Self::folder_name_taken(&conn, &folder_name)? {
            folder_name = format!("{}-{}", base, counter);
            counter += 1;
        }

        conn.execute(
            "INSERT INTO games (name, folder_name, steam_app_id) VALUES (?, ?, ?)",
            params![name, folder_name, steam_app_id],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        Game::find(pool, id)?.ok_or_else(|| "game row missing after insert".into())
    }

    fn folder_name_taken(conn: &Connection, folder_name: &str) -> SqlResult<bool> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM games WHERE folder_name = ?",
                [folder_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(existing.is_some())
    }

    /// Deletes a game. Screenshot rows and their FTS entries go with it.
    pub fn delete(pool: &DbPool, id: i64) -> Result<bool, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        conn.execute(
            "DELETE FROM screenshots_fts_content WHERE rowid IN
               (SELECT id FROM screenshots WHERE game_id = ?)",
            [id],
        )?;
        let deleted = conn.execute("DELETE FROM games WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    /// Recomputes the denormalized per-game screenshot stats.
    pub fn update_screenshot_stats(
        pool: &DbPool,
        game_id: i64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        conn.execute(
            "UPDATE games SET
                screenshot_count = (SELECT COUNT(*) FROM screenshots WHERE game_id = ?1),
                first_screenshot_date = (SELECT MIN(taken_at) FROM screenshots WHERE game_id = ?1),
                last_screenshot_date = (SELECT MAX(taken_at) FROM screenshots WHERE game_id = ?1),
                updated_at = datetime('now')
             WHERE id = ?1",
            [game_id],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    pub id: i64,
    pub game_id: i64,
    pub filename: String,
    pub file_path: String,
    pub thumb_sm_path: Option<String>,
    pub thumb_md_path: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub uploaded_at: String,
    pub steam_screenshot_id: Option<String>,
    pub steam_description: Option<String>,
    pub source: ScreenshotSource,
    pub file_hash: String,
    pub exif_data: Option<String>,
    pub is_favorite: bool,
    pub view_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of a screenshot insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// Lost a race on one of the dedup identities.
    DuplicateRace,
}

/// Field set for inserting a new screenshot row.
#[derive(Debug, Clone)]
pub struct NewScreenshot {
    pub game_id: i64,
    pub filename: String,
    pub file_path: String,
    pub thumb_sm_path: Option<String>,
    pub thumb_md_path: Option<String>,
    pub file_size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub steam_screenshot_id: Option<String>,
    pub steam_description: Option<String>,
    pub source: ScreenshotSource,
    pub file_hash: String,
    pub exif_data: Option<String>,
}

impl Screenshot {
    pub fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(Screenshot {
            id: row.get(0)?,
            game_id: row.get(1)?,
            filename: row.get(2)?,
            file_path: row.get(3)?,
            thumb_sm_path: row.get(4)?,
            thumb_md_path: row.get(5)?,
            file_size: row.get(6)?,
            width: row.get(7)?,
            height: row.get(8)?,
            format: row.get(9)?,
            taken_at: row.get::<_, Option<String>>(10)?.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
            uploaded_at: row.get(11)?,
            steam_screenshot_id: row.get(12)?,
            steam_description: row.get(13)?,
            source: ScreenshotSource::from_str(&row.get::<_, String>(14)?),
            file_hash: row.get(15)?,
            exif_data: row.get(16)?,
            is_favorite: row.get(17)?,
            view_count: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }

    /// Inserts the row and syncs the FTS index.
    ///
    /// A `UNIQUE` violation on `(game_id, file_hash)` or
    /// `(game_id, steam_screenshot_id)` means another writer inserted an
    /// equivalent screenshot between the caller's dedup check and this
    /// insert; that is reported as `InsertOutcome::DuplicateRace`, not an
    /// error.
    pub fn create(
        pool: &DbPool,
        new: &NewScreenshot,
    ) -> Result<InsertOutcome, Box<dyn std::error::Error>> {
        let conn = pool.get()?;

        let inserted = conn.execute(
            r#"INSERT INTO screenshots (
                game_id, filename, file_path, thumb_sm_path, thumb_md_path,
                file_size, width, height, format, taken_at,
                steam_screenshot_id, steam_description, source, file_hash, exif_data
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                new.game_id,
                new.filename,
                new.file_path,
                new.thumb_sm_path,
                new.thumb_md_path,
                new.file_size,
                new.width,
                new.height,
                new.format,
                new.taken_at.map(|dt| dt.to_rfc3339()),
                new.steam_screenshot_id,
                new.steam_description,
                new.source.as_str(),
                new.file_hash,
                new.exif_data,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(ref e) if Self::is_unique_violation(e) => return Ok(InsertOutcome::DuplicateRace),
            Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();

        Self::sync_fts(&conn, id)?;
        Ok(InsertOutcome::Inserted(id))
    }

    fn sync_fts(conn: &Connection, screenshot_id: i64) -> Result<(), rusqlite::Error> {
        conn.execute(
            r#"INSERT INTO screenshots_fts_content (rowid, game_name, filename, steam_description)
               SELECT s.id, g.name, s.filename, COALESCE(s.steam_description, '')
               FROM screenshots s JOIN games g ON g.id = s.game_id
               WHERE s.id = ?
               ON CONFLICT(rowid) DO UPDATE SET
                   game_name = excluded.game_name,
                   filename = excluded.filename,
                   steam_description = excluded.steam_description"#,
            [screenshot_id],
        )?;
        Ok(())
    }

    pub fn find(pool: &DbPool, id: i64) -> Result<Option<Screenshot>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let shot = conn
            .query_row(
                "SELECT * FROM screenshots WHERE id = ?",
                [id],
                Screenshot::from_row,
            )
            .optional()?;
        Ok(shot)
    }

    pub fn list_for_game(
        pool: &DbPool,
        game_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Screenshot>, i64), Box<dyn std::error::Error>> {
        let conn = pool.get()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM screenshots WHERE game_id = ?",
            [game_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT * FROM screenshots WHERE game_id = ?
             ORDER BY taken_at DESC, id DESC LIMIT ? OFFSET ?",
        )?;
        let shot_iter = stmt.query_map(params![game_id, limit, offset], Screenshot::from_row)?;

        let mut shots = Vec::new();
        for shot in shot_iter {
            shots.push(shot?);
        }
        Ok((shots, total))
    }

    /// Dedup check by Steam screenshot id within a game.
    pub fn steam_id_exists(
        pool: &DbPool,
        game_id: i64,
        steam_screenshot_id: &str,
    ) -> Result<bool, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM screenshots WHERE game_id = ? AND steam_screenshot_id = ?",
                params![game_id, steam_screenshot_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(existing.is_some())
    }

    /// Dedup check by content hash within a game.
    pub fn find_by_hash(
        pool: &DbPool,
        game_id: i64,
        file_hash: &str,
    ) -> Result<Option<Screenshot>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let shot = conn
            .query_row(
                "SELECT * FROM screenshots WHERE game_id = ? AND file_hash = ?",
                params![game_id, file_hash],
                Screenshot::from_row,
            )
            .optional()?;
        Ok(shot)
    }

    pub fn delete(pool: &DbPool, id: i64) -> Result<bool, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        conn.execute("DELETE FROM screenshots_fts_content WHERE rowid = ?", [id])?;
        let deleted = conn.execute("DELETE FROM screenshots WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    /// Flips the favorite flag. Returns the new value.
    pub fn toggle_favorite(pool: &DbPool, id: i64) -> Result<Option<bool>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let current: Option<bool> = conn
            .query_row(
                "SELECT is_favorite FROM screenshots WHERE id = ?",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(None);
        };
        conn.execute(
            "UPDATE screenshots SET is_favorite = ?, updated_at = datetime('now') WHERE id = ?",
            params![!current, id],
        )?;
        Ok(Some(!current))
    }

    /// Whether an insert failure was a dedup-identity UNIQUE violation.
    pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Terminal and running states of an import session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "completed" => SessionStatus::Completed,
            "cancelled" => SessionStatus::Cancelled,
            "failed" => SessionStatus::Failed,
            _ => SessionStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSession {
    pub id: i64,
    pub steam_user_id: String,
    pub status: SessionStatus,
    pub total_games: i64,
    pub total_screenshots: i64,
    pub completed: i64,
    pub skipped: i64,
    pub failed: i64,
    pub last_error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub created_at: String,
}

impl ImportSession {
    pub fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(ImportSession {
            id: row.get(0)?,
            steam_user_id: row.get(1)?,
            status: SessionStatus::from_str(&row.get::<_, String>(2)?),
            total_games: row.get(3)?,
            total_screenshots: row.get(4)?,
            completed: row.get(5)?,
            skipped: row.get(6)?,
            failed: row.get(7)?,
            last_error: row.get(8)?,
            started_at: row.get(9)?,
            finished_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    pub fn create(pool: &DbPool, steam_user_id: &str) -> Result<i64, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        conn.execute(
            "INSERT INTO import_sessions (steam_user_id, status) VALUES (?, 'running')",
            [steam_user_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find(pool: &DbPool, id: i64) -> Result<Option<ImportSession>, Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        let session = conn
            .query_row(
                "SELECT * FROM import_sessions WHERE id = ?",
                [id],
                ImportSession::from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub fn set_totals(
        pool: &DbPool,
        id: i64,
        total_games: i64,
        total_screenshots: i64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        conn.execute(
            "UPDATE import_sessions SET total_games = ?, total_screenshots = ? WHERE id = ?",
            params![total_games, total_screenshots, id],
        )?;
        Ok(())
    }

    pub fn update_counters(
        pool: &DbPool,
        id: i64,
        completed: i64,
        skipped: i64,
        failed: i64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        conn.execute(
            "UPDATE import_sessions SET completed = ?, skipped = ?, failed = ? WHERE id = ?",
            params![completed, skipped, failed, id],
        )?;
        Ok(())
    }

    /// Writes the terminal status and final counters in one statement.
    /// Terminal states are write-once: a session that already left
    /// `running` is never updated again.
    pub fn finish(
        pool: &DbPool,
        id: i64,
        status: SessionStatus,
        completed: i64,
        skipped: i64,
        failed: i64,
        last_error: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let conn = pool.get()?;
        conn.execute(
            "UPDATE import_sessions SET
                status = ?, completed = ?, skipped = ?, failed = ?,
                last_error = ?, finished_at = datetime('now')
             WHERE id = ? AND status = 'running'",
            params![status.as_str(), completed, skipped, failed, last_error, id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(pool: &DbPool, new: &NewScreenshot) -> i64 {
        match Screenshot::create(pool, new).unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::DuplicateRace => panic!("unexpected duplicate"),
        }
    }

    fn new_shot(game_id: i64, filename: &str, hash: &str, steam_id: Option<&str>) -> NewScreenshot {
        NewScreenshot {
            game_id,
            filename: filename.to_string(),
            file_path: format!("folder/{}", filename),
            thumb_sm_path: None,
            thumb_md_path: None,
            file_size: 1024,
            width: Some(1920),
            height: Some(1080),
            format: Some("jpeg".to_string()),
            taken_at: None,
            steam_screenshot_id: steam_id.map(|s| s.to_string()),
            steam_description: None,
            source: ScreenshotSource::SteamImport,
            file_hash: hash.to_string(),
            exif_data: None,
        }
    }

    #[test]
    fn folder_names_are_unique_for_same_name_derivation() {
        let pool = create_in_memory_pool().unwrap();

        let a = Game::create(&pool, "Half-Life 2", Some(220)).unwrap();
        // Same derived folder, different display name.
        let b = Game::create(&pool, "Half Life 2", Some(221)).unwrap();

        assert_eq!(a.folder_name, "half-life-2");
        assert_eq!(b.folder_name, "half-life-2-2");
        assert_ne!(a.folder_name, b.folder_name);
    }

    #[test]
    fn get_or_create_matches_app_id_before_name() {
        let pool = create_in_memory_pool().unwrap();

        let created = Game::get_or_create(&pool, "Portal 2", Some(620)).unwrap();
        // Steam renamed the game; the app id still matches.
        let found = Game::get_or_create(&pool, "Portal 2 (2011)", Some(620)).unwrap();
        assert_eq!(created.id, found.id);

        let by_name = Game::get_or_create(&pool, "Portal 2", None).unwrap();
        assert_eq!(created.id, by_name.id);
    }

    #[test]
    fn duplicate_steam_id_within_game_is_rejected() {
        let pool = create_in_memory_pool().unwrap();
        let game = Game::create(&pool, "Test", Some(1)).unwrap();

        insert(&pool, &new_shot(game.id, "a.jpg", &"a".repeat(64), Some("s1")));
        let outcome =
            Screenshot::create(&pool, &new_shot(game.id, "b.jpg", &"b".repeat(64), Some("s1")))
                .unwrap();
        assert_eq!(outcome, InsertOutcome::DuplicateRace);
    }

    #[test]
    fn duplicate_hash_within_game_is_rejected() {
        let pool = create_in_memory_pool().unwrap();
        let game = Game::create(&pool, "Test", Some(1)).unwrap();

        insert(&pool, &new_shot(game.id, "a.jpg", &"c".repeat(64), None));
        let outcome = Screenshot::create(&pool, &new_shot(game.id, "b.jpg", &"c".repeat(64), None))
            .unwrap();
        assert_eq!(outcome, InsertOutcome::DuplicateRace);
    }

    #[test]
    fn same_hash_in_different_games_is_allowed() {
        let pool = create_in_memory_pool().unwrap();
        let g1 = Game::create(&pool, "One", Some(1)).unwrap();
        let g2 = Game::create(&pool, "Two", Some(2)).unwrap();

        insert(&pool, &new_shot(g1.id, "a.jpg", &"d".repeat(64), None));
        insert(&pool, &new_shot(g2.id, "a.jpg", &"d".repeat(64), None));
    }

    #[test]
    fn multiple_null_steam_ids_are_allowed() {
        let pool = create_in_memory_pool().unwrap();
        let game = Game::create(&pool, "Test", Some(1)).unwrap();

        insert(&pool, &new_shot(game.id, "a.jpg", &"e".repeat(64), None));
        insert(&pool, &new_shot(game.id, "b.jpg", &"f".repeat(64), None));
    }

    #[test]
    fn deleting_game_cascades_to_screenshots() {
        let pool = create_in_memory_pool().unwrap();
        let game = Game::create(&pool, "Test", Some(1)).unwrap();
        let id = insert(&pool, &new_shot(game.id, "a.jpg", &"1".repeat(64), None));

        assert!(Game::delete(&pool, game.id).unwrap());
        assert!(Screenshot::find(&pool, id).unwrap().is_none());
    }

    #[test]
    fn screenshot_stats_follow_inserts() {
        let pool = create_in_memory_pool().unwrap();
        let game = Game::create(&pool, "Test", Some(1)).unwrap();

        let mut shot = new_shot(game.id, "a.jpg", &"2".repeat(64), None);
        shot.taken_at = Some(Utc::now());
        insert(&pool, &shot);
        Game::update_screenshot_stats(&pool, game.id).unwrap();

        let game = Game::find(&pool, game.id).unwrap().unwrap();
        assert_eq!(game.screenshot_count, 1);
        assert!(game.first_screenshot_date.is_some());
    }

    #[test]
    fn session_terminal_status_is_write_once() {
        let pool = create_in_memory_pool().unwrap();
        let id = ImportSession::create(&pool, "76561198000000001").unwrap();

        ImportSession::finish(&pool, id, SessionStatus::Cancelled, 1, 2, 3, None).unwrap();
        // A second terminal write must not overwrite the first.
        ImportSession::finish(&pool, id, SessionStatus::Completed, 9, 9, 9, None).unwrap();

        let session = ImportSession::find(&pool, id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(session.completed, 1);
        assert_eq!(session.skipped, 2);
        assert_eq!(session.failed, 3);
        assert!(session.finished_at.is_some());
    }

    #[test]
    fn toggle_favorite_flips_value() {
        let pool = create_in_memory_pool().unwrap();
        let game = Game::create(&pool, "Test", Some(1)).unwrap();
        let id = insert(&pool, &new_shot(game.id, "a.jpg", &"3".repeat(64), None));

        assert_eq!(Screenshot::toggle_favorite(&pool, id).unwrap(), Some(true));
        assert_eq!(Screenshot::toggle_favorite(&pool, id).unwrap(), Some(false));
        assert_eq!(Screenshot::toggle_favorite(&pool, 9999).unwrap(), None);
    }
}
