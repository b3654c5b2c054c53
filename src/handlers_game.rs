use serde::Deserialize;
use serde_json::json;
use warp::{Rejection, Reply};

use crate::db::{DbPool, Game, Screenshot};
use crate::warp_helpers::ApiError;

#[derive(Debug, Deserialize)]
pub struct GameListQuery {
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    pub name: String,
    pub steam_app_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ScreenshotListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn list_games(query: GameListQuery, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    match Game::list(&db_pool, query.sort.as_deref()) {
        Ok(games) => Ok(warp::reply::json(&games)),
        Err(e) => Err(ApiError::database(e)),
    }
}

pub async fn create_game(
    req: CreateGameRequest,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }
    if Game::find_by_name(&db_pool, name)
        .map_err(ApiError::database)?
        .is_some()
    {
        return Err(ApiError::validation(format!(
            "a game named {:?} already exists",
            name
        )));
    }

    match Game::create(&db_pool, name, req.steam_app_id) {
        Ok(game) => Ok(warp::reply::with_status(
            warp::reply::json(&game),
            warp::http::StatusCode::CREATED,
        )),
        Err(e) => Err(ApiError::database(e)),
    }
}

pub async fn get_game(game_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    match Game::find(&db_pool, game_id) {
        Ok(Some(game)) => Ok(warp::reply::json(&game)),
        Ok(None) => Err(ApiError::not_found("game")),
        Err(e) => Err(ApiError::database(e)),
    }
}

/// Deletes the game row; screenshot rows cascade. Files stay on disk,
/// deliberately: removing a library folder is a manual operation.
pub async fn delete_game(game_id: i64, db_pool: DbPool) -> Result<impl Reply, Rejection> {
    match Game::delete(&db_pool, game_id) {
        Ok(true) => Ok(warp::reply::with_status(
            warp::reply(),
            warp::http::StatusCode::NO_CONTENT,
        )),
        Ok(false) => Err(ApiError::not_found("game")),
        Err(e) => Err(ApiError::database(e)),
    }
}

pub async fn list_game_screenshots(
    game_id: i64,
    query: ScreenshotListQuery,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    if Game::find(&db_pool, game_id)
        .map_err(ApiError::database)?
        .is_none()
    {
        return Err(ApiError::not_found("game"));
    }

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).min(100);
    let offset = (page - 1) * limit;

    match Screenshot::list_for_game(&db_pool, game_id, limit as i64, offset as i64) {
        Ok((screenshots, total)) => Ok(warp::reply::json(&json!({
            "screenshots": screenshots,
            "total": total,
            "page": page,
            "limit": limit,
            "has_next": (offset + limit) < total as u32,
            "has_prev": page > 1,
        }))),
        Err(e) => Err(ApiError::database(e)),
    }
}

pub async fn toggle_favorite(
    screenshot_id: i64,
    db_pool: DbPool,
) -> Result<impl Reply, Rejection> {
    match Screenshot::toggle_favorite(&db_pool, screenshot_id) {
        Ok(Some(is_favorite)) => Ok(warp::reply::json(&json!({ "is_favorite": is_favorite }))),
        Ok(None) => Err(ApiError::not_found("screenshot")),
        Err(e) => Err(ApiError::database(e)),
    }
}
