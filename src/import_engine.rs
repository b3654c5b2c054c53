//! Steam import session orchestration.
//!
//! One engine per process. Each `start` call runs one session as a
//! background task: validate profile, discover games, then serially walk
//! each game's screenshots through download and ingest, publishing typed
//! progress events. One session per Steam user at a time; sessions for
//! distinct users run concurrently and share the global rate limiter.

use log::{error, info};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::{DbPool, Game, ImportSession, ScreenshotSource, SessionStatus};
use crate::error::ImportError;
use crate::ingest_worker::{IngestOutcome, IngestRequest, IngestWorker};
use crate::progress_bus::{BusEvent, ProgressBus, Subscription};
use crate::steam_scraper::{ScrapeError, ScreenshotRef, SteamSource};

// Worst-case wall clock for one ingest unit.
const INGEST_TIMEOUT: Duration = Duration::from_secs(30);
// Cancellation observation bound: one download plus one ingest, with slack.
const CANCEL_WAIT: Duration = Duration::from_secs(95);

/// Typed progress events for one import session, in the order a
/// subscriber may rely on: `games_discovered` before any `game_start`,
/// per-game events bracketed by `game_start`/`game_complete`, exactly one
/// terminal event, then `done`.
#[derive(Debug, Clone)]
pub enum ImportEvent {
    Status {
        message: String,
    },
    ProfileValidated {
        profile_name: Option<String>,
        avatar_url: Option<String>,
    },
    GamesDiscovered {
        total_games: i64,
        total_screenshots: i64,
    },
    GameStart {
        app_id: u32,
        name: String,
    },
    ScreenshotComplete {
        game_name: String,
        overall_progress: i64,
    },
    ScreenshotSkipped {
        game_name: String,
        reason: String,
    },
    ScreenshotFailed {
        game_name: String,
        error: String,
    },
    GameComplete {
        app_id: u32,
        completed: i64,
        skipped: i64,
        failed: i64,
        overall_completed: i64,
        overall_skipped: i64,
        overall_failed: i64,
    },
    GameError {
        app_id: u32,
        error: String,
    },
    ImportComplete {
        completed: i64,
        skipped: i64,
        failed: i64,
        total_games: i64,
    },
    ImportCancelled,
    ImportError {
        error: String,
    },
    Done,
}

impl BusEvent for ImportEvent {
    fn kind(&self) -> &'static str {
        match self {
            ImportEvent::Status { .. } => "status",
            ImportEvent::ProfileValidated { .. } => "profile_validated",
            ImportEvent::GamesDiscovered { .. } => "games_discovered",
            ImportEvent::GameStart { .. } => "game_start",
            ImportEvent::ScreenshotComplete { .. } => "screenshot_complete",
            ImportEvent::ScreenshotSkipped { .. } => "screenshot_skipped",
            ImportEvent::ScreenshotFailed { .. } => "screenshot_failed",
            ImportEvent::GameComplete { .. } => "game_complete",
            ImportEvent::GameError { .. } => "game_error",
            ImportEvent::ImportComplete { .. } => "import_complete",
            ImportEvent::ImportCancelled => "import_cancelled",
            ImportEvent::ImportError { .. } => "import_error",
            ImportEvent::Done => "done",
        }
    }

    fn payload_json(&self) -> String {
        let value = match self {
            ImportEvent::Status { message } => json!({ "message": message }),
            ImportEvent::ProfileValidated {
                profile_name,
                avatar_url,
            } => json!({ "profile_name": profile_name, "avatar_url": avatar_url }),
            ImportEvent::GamesDiscovered {
                total_games,
                total_screenshots,
            } => json!({ "total_games": total_games, "total_screenshots": total_screenshots }),
            ImportEvent::GameStart { app_id, name } => {
                json!({ "app_id": app_id, "name": name })
            }
            ImportEvent::ScreenshotComplete {
                game_name,
                overall_progress,
            } => json!({ "game_name": game_name, "overall_progress": overall_progress }),
            ImportEvent::ScreenshotSkipped { game_name, reason } => {
                json!({ "game_name": game_name, "reason": reason })
            }
            ImportEvent::ScreenshotFailed { game_name, error } => {
                json!({ "game_name": game_name, "error": error })
            }
            ImportEvent::GameComplete {
                app_id,
                completed,
                skipped,
                failed,
                overall_completed,
                overall_skipped,
                overall_failed,
            } => json!({
                "app_id": app_id,
                "completed": completed,
                "skipped": skipped,
                "failed": failed,
                "overall_completed": overall_completed,
                "overall_skipped": overall_skipped,
                "overall_failed": overall_failed,
            }),
            ImportEvent::GameError { app_id, error } => {
                json!({ "app_id": app_id, "error": error })
            }
            ImportEvent::ImportComplete {
                completed,
                skipped,
                failed,
                total_games,
            } => json!({
                "completed": completed,
                "skipped": skipped,
                "failed": failed,
                "total_games": total_games,
            }),
            ImportEvent::ImportCancelled => json!({}),
            ImportEvent::ImportError { error } => json!({ "error": error }),
            ImportEvent::Done => json!({}),
        };
        value.to_string()
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportEvent::ImportComplete { .. }
                | ImportEvent::ImportCancelled
                | ImportEvent::ImportError { .. }
                | ImportEvent::Done
        )
    }

    fn is_done(&self) -> bool {
        matches!(self, ImportEvent::Done)
    }

    fn lag_marker(dropped: u64) -> Self {
        ImportEvent::Status {
            message: format!("{} progress events dropped for slow subscriber", dropped),
        }
    }
}

struct SessionHandle {
    steam_user_id: String,
    cancel: CancellationToken,
    // Cancelled by the session task on exit; lets `cancel()` wait for the
    // running task to actually observe the flag.
    finished: CancellationToken,
}

#[derive(Default)]
struct Counters {
    completed: i64,
    skipped: i64,
    failed: i64,
    total_games: i64,
}

impl Counters {
    fn processed(&self) -> i64 {
        self.completed + self.skipped + self.failed
    }
}

pub struct ImportEngine {
    pool: DbPool,
    ingest: IngestWorker,
    bus: Arc<ProgressBus<ImportEvent>>,
    sessions: Mutex<HashMap<i64, Arc<SessionHandle>>>,
    running_users: Mutex<HashSet<String>>,
}

impl ImportEngine {
    pub fn new(pool: DbPool, ingest: IngestWorker, bus: Arc<ProgressBus<ImportEvent>>) -> Self {
        Self {
            pool,
            ingest,
            bus,
            sessions: Mutex::new(HashMap::new()),
            running_users: Mutex::new(HashSet::new()),
        }
    }

    /// Starts an asynchronous import session and returns its id.
    ///
    /// `make_source` receives the session's cancellation token so the
    /// scraper can abort rate-limit waits promptly. At most one session
    /// per Steam user may be running; a second `start` returns
    /// `ImportError::Conflict`.
    pub fn start<F>(
        self: &Arc<Self>,
        steam_user_id: &str,
        selected_app_ids: Vec<u32>,
        make_source: F,
    ) -> Result<i64, ImportError>
    where
        F: FnOnce(CancellationToken) -> Result<Arc<dyn SteamSource>, ImportError>,
    {
        {
            let mut running = self.running_users.lock().expect("registry lock poisoned");
            if running.contains(steam_user_id) {
                return Err(ImportError::Conflict);
            }
            running.insert(steam_user_id.to_string());
        }

        let cancel = CancellationToken::new();
        let source = match make_source(cancel.clone()) {
            Ok(source) => source,
            Err(e) => {
                self.running_users
                    .lock()
                    .expect("registry lock poisoned")
                    .remove(steam_user_id);
                return Err(e);
            }
        };

        let session_id = match ImportSession::create(&self.pool, steam_user_id) {
            Ok(id) => id,
            Err(e) => {
                self.running_users
                    .lock()
                    .expect("registry lock poisoned")
                    .remove(steam_user_id);
                return Err(ImportError::Storage(e.to_string()));
            }
        };

        let handle = Arc::new(SessionHandle {
            steam_user_id: steam_user_id.to_string(),
            cancel: cancel.clone(),
            finished: CancellationToken::new(),
        });
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .insert(session_id, handle.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .run_session(session_id, handle, source, selected_app_ids)
                .await;
        });

        info!("Import session {} started for {}", session_id, steam_user_id);
        Ok(session_id)
    }

    /// Requests cooperative cancellation and waits (bounded) until the
    /// running task has observed it. Returns false for unknown or
    /// already-finished sessions.
    pub async fn cancel(&self, session_id: i64) -> bool {
        let handle = {
            let sessions = self.sessions.lock().expect("registry lock poisoned");
            sessions.get(&session_id).cloned()
        };
        let Some(handle) = handle else {
            return false;
        };

        handle.cancel.cancel();
        let _ = tokio::time::timeout(CANCEL_WAIT, handle.finished.cancelled()).await;
        true
    }

    /// Attaches a progress subscriber: retained backlog first, then live
    /// events, ending with `done`.
    pub fn subscribe(&self, session_id: i64) -> Subscription<ImportEvent> {
        self.bus.subscribe(&session_id.to_string())
    }

    pub fn is_running(&self, session_id: i64) -> bool {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .contains_key(&session_id)
    }

    fn publish(&self, session_id: i64, event: ImportEvent) {
        self.bus.publish(&session_id.to_string(), event);
    }

    async fn run_session(
        self: Arc<Self>,
        session_id: i64,
        handle: Arc<SessionHandle>,
        source: Arc<dyn SteamSource>,
        selected_app_ids: Vec<u32>,
    ) {
        self.publish(
            session_id,
            ImportEvent::Status {
                message: "Starting import".to_string(),
            },
        );

        let mut counters = Counters::default();
        let result = self
            .run_pipeline(session_id, &handle.cancel, source, selected_app_ids, &mut counters)
            .await;

        let (status, last_error) = match result {
            Ok(()) => {
                self.publish(
                    session_id,
                    ImportEvent::ImportComplete {
                        completed: counters.completed,
                        skipped: counters.skipped,
                        failed: counters.failed,
                        total_games: counters.total_games,
                    },
                );
                (SessionStatus::Completed, None)
            }
            Err(ImportError::Cancelled) => {
                self.publish(session_id, ImportEvent::ImportCancelled);
                (SessionStatus::Cancelled, None)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Import session {} failed: {}", session_id, message);
                self.publish(
                    session_id,
                    ImportEvent::ImportError {
                        error: message.clone(),
                    },
                );
                (SessionStatus::Failed, Some(message))
            }
        };

        if let Err(e) = ImportSession::finish(
            &self.pool,
            session_id,
            status,
            counters.completed,
            counters.skipped,
            counters.failed,
            last_error.as_deref(),
        ) {
            error!("Failed to persist terminal state for session {}: {}", session_id, e);
        }

        // Release the per-user slot before `done` goes out: a client that
        // restarts an import immediately after seeing `done` must not hit
        // a spurious conflict.
        {
            let mut sessions = self.sessions.lock().expect("registry lock poisoned");
            sessions.remove(&session_id);
        }
        {
            let mut running = self.running_users.lock().expect("registry lock poisoned");
            running.remove(&handle.steam_user_id);
        }

        self.publish(session_id, ImportEvent::Done);
        handle.finished.cancel();

        info!(
            "Import session {} finished as {} ({}/{}/{} completed/skipped/failed)",
            session_id,
            status.as_str(),
            counters.completed,
            counters.skipped,
            counters.failed
        );
    }

    async fn run_pipeline(
        &self,
        session_id: i64,
        cancel: &CancellationToken,
        source: Arc<dyn SteamSource>,
        selected_app_ids: Vec<u32>,
        counters: &mut Counters,
    ) -> Result<(), ImportError> {
        let profile = with_cancel(cancel, source.validate_profile())
            .await?
            .map_err(session_scrape_error)?;
        self.publish(
            session_id,
            ImportEvent::ProfileValidated {
                profile_name: profile.profile_name,
                avatar_url: profile.avatar_url,
            },
        );

        let mut games = with_cancel(cancel, source.discover_games())
            .await?
            .map_err(session_scrape_error)?;
        if !selected_app_ids.is_empty() {
            games.retain(|g| selected_app_ids.contains(&g.app_id));
        }

        counters.total_games = games.len() as i64;
        // Advertised counts; Steam may paginate differently, so these are
        // advisory for progress display.
        let total_screenshots: i64 = games.iter().map(|g| g.screenshot_count).sum();

        ImportSession::set_totals(&self.pool, session_id, counters.total_games, total_screenshots)
            .map_err(|e| ImportError::Storage(e.to_string()))?;
        self.publish(
            session_id,
            ImportEvent::GamesDiscovered {
                total_games: counters.total_games,
                total_screenshots,
            },
        );

        for game in games {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            let row = Game::get_or_create(&self.pool, &game.name, Some(game.app_id as i64))
                .map_err(|e| ImportError::Storage(e.to_string()))?;
            self.publish(
                session_id,
                ImportEvent::GameStart {
                    app_id: game.app_id,
                    name: game.name.clone(),
                },
            );

            let mut game_counters = Counters::default();
            match self
                .import_game(session_id, cancel, &source, &game.name, game.app_id, row.id, counters, &mut game_counters)
                .await
            {
                Ok(()) => {}
                Err(ImportError::Scrape(e)) if !matches!(e, ScrapeError::AuthRequired) => {
                    // Enumeration failed after retries: this game is lost,
                    // the session continues.
                    self.publish(
                        session_id,
                        ImportEvent::GameError {
                            app_id: game.app_id,
                            error: e.to_string(),
                        },
                    );
                }
                Err(e) => return Err(e),
            }

            if let Err(e) = Game::update_screenshot_stats(&self.pool, row.id) {
                return Err(ImportError::Storage(e.to_string()));
            }
            ImportSession::update_counters(
                &self.pool,
                session_id,
                counters.completed,
                counters.skipped,
                counters.failed,
            )
            .map_err(|e| ImportError::Storage(e.to_string()))?;

            self.publish(
                session_id,
                ImportEvent::GameComplete {
                    app_id: game.app_id,
                    completed: game_counters.completed,
                    skipped: game_counters.skipped,
                    failed: game_counters.failed,
                    overall_completed: counters.completed,
                    overall_skipped: counters.skipped,
                    overall_failed: counters.failed,
                },
            );
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn import_game(
        &self,
        session_id: i64,
        cancel: &CancellationToken,
        source: &Arc<dyn SteamSource>,
        game_name: &str,
        app_id: u32,
        game_id: i64,
        counters: &mut Counters,
        game_counters: &mut Counters,
    ) -> Result<(), ImportError> {
        let screenshots = with_cancel(cancel, source.list_screenshots(app_id))
            .await?
            .map_err(|e| match e {
                ScrapeError::AuthRequired => ImportError::AuthRequired,
                ScrapeError::Cancelled => ImportError::Cancelled,
                other => ImportError::Scrape(other),
            })?;

        for screenshot in screenshots {
            // No new screenshot work after cancellation is observed.
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            match self
                .import_screenshot(cancel, source, game_name, game_id, screenshot)
                .await
            {
                Ok(ScreenshotResult::Completed) => {
                    counters.completed += 1;
                    game_counters.completed += 1;
                    self.publish(
                        session_id,
                        ImportEvent::ScreenshotComplete {
                            game_name: game_name.to_string(),
                            overall_progress: counters.processed(),
                        },
                    );
                }
                Ok(ScreenshotResult::Skipped(reason)) => {
                    counters.skipped += 1;
                    game_counters.skipped += 1;
                    self.publish(
                        session_id,
                        ImportEvent::ScreenshotSkipped {
                            game_name: game_name.to_string(),
                            reason,
                        },
                    );
                }
                Ok(ScreenshotResult::Failed(error)) => {
                    counters.failed += 1;
                    game_counters.failed += 1;
                    self.publish(
                        session_id,
                        ImportEvent::ScreenshotFailed {
                            game_name: game_name.to_string(),
                            error,
                        },
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// One screenshot: resolve detail if needed, download, ingest.
    /// Per-item failures come back as `ScreenshotResult::Failed`; only
    /// cancellation and session-fatal conditions surface as `Err`.
    async fn import_screenshot(
        &self,
        cancel: &CancellationToken,
        source: &Arc<dyn SteamSource>,
        game_name: &str,
        game_id: i64,
        mut screenshot: ScreenshotRef,
    ) -> Result<ScreenshotResult, ImportError> {
        if screenshot.full_image_url.is_none() && !screenshot.detail_url.is_empty() {
            match with_cancel(cancel, source.resolve_detail(screenshot.clone())).await? {
                Ok(resolved) => screenshot = resolved,
                Err(ScrapeError::AuthRequired) => return Err(ImportError::AuthRequired),
                Err(ScrapeError::Cancelled) => return Err(ImportError::Cancelled),
                Err(e) => {
                    log::warn!(
                        "Could not resolve detail page for {}: {}",
                        screenshot.steam_screenshot_id,
                        e
                    );
                }
            }
        }

        let Some(image_url) = screenshot
            .full_image_url
            .clone()
            .or_else(|| screenshot.thumb_url.clone())
        else {
            return Ok(ScreenshotResult::Failed("no image URL found".to_string()));
        };

        let image = match with_cancel(cancel, source.download_image(&image_url)).await? {
            Ok(image) => image,
            Err(ScrapeError::AuthRequired) => return Err(ImportError::AuthRequired),
            Err(ScrapeError::Cancelled) => return Err(ImportError::Cancelled),
            Err(e) => return Ok(ScreenshotResult::Failed(e.to_string())),
        };

        let extension = image
            .content_type
            .as_deref()
            .and_then(|ct| ct.strip_prefix("image/"))
            .unwrap_or("jpg");
        let request = IngestRequest {
            bytes: image.bytes,
            source: ScreenshotSource::SteamImport,
            game_id,
            claimed_filename: format!(
                "steam_{}.{}",
                screenshot.steam_screenshot_id, extension
            ),
            steam_screenshot_id: Some(screenshot.steam_screenshot_id.clone()),
            steam_description: screenshot.description.clone(),
            taken_at: screenshot.taken_at,
        };

        let worker = self.ingest.clone();
        let ingest_task =
            tokio::time::timeout(INGEST_TIMEOUT, tokio::task::spawn_blocking(move || {
                worker.ingest(&request)
            }));

        match ingest_task.await {
            Err(_) => Ok(ScreenshotResult::Failed(format!(
                "ingest timed out after {:?} for {}",
                INGEST_TIMEOUT, game_name
            ))),
            Ok(Err(join_err)) => Err(ImportError::Storage(join_err.to_string())),
            Ok(Ok(Ok(IngestOutcome::Completed { .. }))) => Ok(ScreenshotResult::Completed),
            Ok(Ok(Ok(IngestOutcome::Skipped { reason }))) => {
                Ok(ScreenshotResult::Skipped(reason.as_str().to_string()))
            }
            Ok(Ok(Err(e))) => Ok(ScreenshotResult::Failed(e.to_string())),
        }
    }
}

enum ScreenshotResult {
    Completed,
    Skipped(String),
    Failed(String),
}

fn session_scrape_error(e: ScrapeError) -> ImportError {
    match e {
        ScrapeError::AuthRequired => ImportError::AuthRequired,
        ScrapeError::Cancelled => ImportError::Cancelled,
        other => ImportError::Scrape(other),
    }
}

/// Races a scraper future against the session's cancellation flag, so
/// cancellation wakes the pipeline at every suspension point.
async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, ImportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ImportError::Cancelled),
        value = fut => Ok(value),
    }
}
