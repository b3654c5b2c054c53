//! Session-level error taxonomy for the import engine.

use crate::steam_scraper::ScrapeError;

/// Errors that terminate or reject an import session.
///
/// Per-item and per-game failures never surface here; the engine absorbs
/// them into counters and `game_error` events. Everything in this enum is
/// either a session-fatal condition or a control-flow outcome
/// (`Cancelled`, `Conflict`).
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("an import is already running for this user")]
    Conflict,

    #[error("cancelled")]
    Cancelled,

    #[error("auth_required")]
    AuthRequired,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scrape error: {0}")]
    Scrape(#[from] ScrapeError),
}

impl ImportError {
    /// True for errors that must flip the session to `failed` rather than
    /// `cancelled`.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, ImportError::Cancelled | ImportError::Conflict)
    }
}
