use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use warp::{Rejection, Reply};

use crate::db::{DbPool, ImportSession, SessionStatus};
use crate::error::ImportError;
use crate::import_engine::ImportEngine;
use crate::progress_bus::BusEvent;
use crate::rate_limiter::RateLimiter;
use crate::steam_scraper::{SteamCredentials, SteamScraper, SteamSource};
use crate::warp_helpers::ApiError;

#[derive(Debug, Deserialize)]
pub struct SteamValidateRequest {
    pub user_id: String,
    pub steam_login_secure: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_numeric_id: bool,
}

#[derive(Debug, Deserialize)]
pub struct SteamImportRequest {
    pub user_id: String,
    pub steam_login_secure: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub game_ids: Vec<u32>,
    #[serde(default)]
    pub is_numeric_id: bool,
}

#[derive(Debug, Serialize)]
pub struct SteamValidateResponse {
    pub valid: bool,
    pub profile_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_numeric_id: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SteamGameInfo {
    pub app_id: u32,
    pub name: String,
    pub screenshot_count: i64,
}

/// Auth token for `EventSource` clients, which cannot set headers.
/// Validation belongs to the external auth collaborator.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct ProgressQuery {
    pub token: Option<String>,
}

impl SteamValidateRequest {
    fn credentials(&self) -> SteamCredentials {
        SteamCredentials {
            user_id: self.user_id.clone(),
            steam_login_secure: self.steam_login_secure.clone(),
            session_id: self.session_id.clone(),
            is_numeric_id: self.is_numeric_id,
        }
    }
}

impl SteamImportRequest {
    fn credentials(&self) -> SteamCredentials {
        SteamCredentials {
            user_id: self.user_id.clone(),
            steam_login_secure: self.steam_login_secure.clone(),
            session_id: self.session_id.clone(),
            is_numeric_id: self.is_numeric_id,
        }
    }
}

/// POST /api/steam/validate — probe a profile without side effects.
pub async fn validate_steam(
    req: SteamValidateRequest,
    limiter: Arc<RateLimiter>,
) -> Result<impl Reply, Rejection> {
    let creds = req.credentials();
    let is_numeric = creds.is_numeric();

    let scraper = match SteamScraper::new(creds, limiter, CancellationToken::new()) {
        Ok(scraper) => scraper,
        Err(e) => {
            return Ok(warp::reply::json(&SteamValidateResponse {
                valid: false,
                profile_name: None,
                avatar_url: None,
                is_numeric_id: is_numeric,
                error: Some(e.to_string()),
            }))
        }
    };

    match scraper.validate_profile().await {
        Ok(profile) => Ok(warp::reply::json(&SteamValidateResponse {
            valid: true,
            profile_name: profile.profile_name,
            avatar_url: profile.avatar_url,
            is_numeric_id: profile.is_numeric_id,
            error: None,
        })),
        Err(e) => Ok(warp::reply::json(&SteamValidateResponse {
            valid: false,
            profile_name: None,
            avatar_url: None,
            is_numeric_id: is_numeric,
            error: Some(e.to_string()),
        })),
    }
}

/// POST /api/steam/games — list importable games with screenshot counts.
pub async fn list_steam_games(
    req: SteamValidateRequest,
    limiter: Arc<RateLimiter>,
) -> Result<impl Reply, Rejection> {
    let scraper = SteamScraper::new(req.credentials(), limiter, CancellationToken::new())
        .map_err(|e| ApiError::validation(e.to_string()))?;

    match scraper.discover_games().await {
        Ok(games) => {
            let games: Vec<SteamGameInfo> = games
                .into_iter()
                .map(|g| SteamGameInfo {
                    app_id: g.app_id,
                    name: g.name,
                    screenshot_count: g.screenshot_count,
                })
                .collect();
            Ok(warp::reply::json(&games))
        }
        Err(e) => Err(ApiError::validation(e.to_string())),
    }
}

/// POST /api/steam/import — start an asynchronous import session.
pub async fn start_import(
    req: SteamImportRequest,
    engine: Arc<ImportEngine>,
    limiter: Arc<RateLimiter>,
) -> Result<impl Reply, Rejection> {
    let creds = req.credentials();
    let user_id = req.user_id.clone();

    let result = engine.start(&user_id, req.game_ids.clone(), move |cancel| {
        let scraper = SteamScraper::new(creds, limiter, cancel).map_err(ImportError::Scrape)?;
        Ok(Arc::new(scraper) as Arc<dyn SteamSource>)
    });

    match result {
        Ok(session_id) => Ok(warp::reply::json(
            &serde_json::json!({ "session_id": session_id }),
        )),
        Err(ImportError::Conflict) => Err(ApiError::import_conflict()),
        Err(e) => Err(ApiError::database(e)),
    }
}

/// GET /api/steam/import/{id}/progress — SSE stream of typed events.
pub async fn import_progress(
    session_id: i64,
    _query: ProgressQuery,
    engine: Arc<ImportEngine>,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    match ImportSession::find(&db_pool, session_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(ApiError::not_found("import session")),
        Err(e) => return Err(ApiError::database(e)),
    }

    let subscription = engine.subscribe(session_id);
    let stream = futures_util::stream::unfold(subscription, |mut sub| async move {
        let event = sub.recv().await?;
        let sse_event = warp::sse::Event::default()
            .id(event.seq.to_string())
            .event(event.event.kind())
            .data(event.event.payload_json());
        Some((Ok::<_, Infallible>(sse_event), sub))
    });

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}

/// GET /api/steam/import/{id} — session status row.
pub async fn get_session(session_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    match ImportSession::find(&db_pool, session_id) {
        Ok(Some(session)) => Ok(warp::reply::json(&session)),
        Ok(None) => Err(ApiError::not_found("import session")),
        Err(e) => Err(ApiError::database(e)),
    }
}

/// POST /api/steam/import/{id}/cancel — cooperative cancellation.
pub async fn cancel_import(
    session_id: i64,
    engine: Arc<ImportEngine>,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let session = match ImportSession::find(&db_pool, session_id) {
        Ok(Some(session)) => session,
        Ok(None) => return Err(ApiError::not_found("import session")),
        Err(e) => return Err(ApiError::database(e)),
    };

    if session.status != SessionStatus::Running {
        return Err(ApiError::validation("import is not running"));
    }

    engine.cancel(session_id).await;
    Ok(warp::reply::with_status(
        warp::reply(),
        warp::http::StatusCode::NO_CONTENT,
    ))
}
