//! Shared warp plumbing: state injection, typed rejections, CORS.

use serde::Serialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{reject, Filter, Rejection, Reply};

/// Typed failure carried through warp rejections.
///
/// Handlers construct a variant via the helper constructors;
/// `handle_rejection` maps it onto the wire shape. Everything the import
/// core can reject with lives here rather than in per-handler types.
#[derive(Debug)]
pub enum ApiError {
    Database(String),
    NotFound(&'static str),
    Validation(String),
    /// A second import was started for a Steam user whose session is
    /// still running.
    ImportConflict,
}

impl reject::Reject for ApiError {}

impl ApiError {
    pub fn database(e: impl std::fmt::Display) -> Rejection {
        reject::custom(ApiError::Database(e.to_string()))
    }

    pub fn not_found(what: &'static str) -> Rejection {
        reject::custom(ApiError::NotFound(what))
    }

    pub fn validation(message: impl Into<String>) -> Rejection {
        reject::custom(ApiError::Validation(message.into()))
    }

    pub fn import_conflict() -> Rejection {
        reject::custom(ApiError::ImportConflict)
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::ImportConflict => StatusCode::CONFLICT,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Database(msg) => format!("storage failure: {}", msg),
            ApiError::NotFound(what) => format!("{} not found", what),
            ApiError::Validation(msg) => msg.clone(),
            ApiError::ImportConflict => {
                "an import is already running for this Steam user".to_string()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

/// Injects a cloneable piece of server state into a filter chain.
/// Covers the pool, the engine, the ingest worker and the buses alike.
pub fn with_state<T: Clone + Send>(
    state: T,
) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, error) = if let Some(api) = err.find::<ApiError>() {
        if let ApiError::Database(msg) = api {
            log::error!("request failed on storage: {}", msg);
        }
        (api.status(), api.message())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "no such route".to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, body_err.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "upload exceeds the configured size limit".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".to_string(),
        )
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error".to_string(),
        )
    };

    let body = ErrorBody {
        error,
        code: status.as_u16(),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

/// Permissive CORS for the bundled single-page UI.
pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
}
