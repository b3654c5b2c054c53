use log::{error, info};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;

use gamevault::import_engine::{ImportEngine, ImportEvent};
use gamevault::ingest_worker::IngestWorker;
use gamevault::library::Library;
use gamevault::progress_bus::ProgressBus;
use gamevault::rate_limiter::RateLimiter;
use gamevault::thumbnail_generator::ThumbnailGenerator;
use gamevault::warp_helpers::{
    cors, handle_rejection, with_state,
};
use gamevault::{config, db, db_pool, handlers_game, handlers_steam, handlers_upload};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = config::Config::from_env()?;
    let port = config.port;

    info!("Starting GameVault server on port {}", port);
    info!("Library: {}", config.library_dir.display());
    info!("Database: {}", config.db_path);

    if !is_port_available(port) {
        error!(
            "Port {} is already in use. Stop the existing GameVault instance or choose a different port.",
            port
        );
        return Err(format!("Port {} is already in use", port).into());
    }

    let services = initialize_services(&config)?;

    let health_routes = build_health_routes(services.db_pool.clone());
    let steam_routes = build_steam_routes(
        services.db_pool.clone(),
        services.engine.clone(),
        services.rate_limiter.clone(),
    );
    let upload_routes = build_upload_routes(
        services.db_pool.clone(),
        services.ingest.clone(),
        services.upload_bus.clone(),
        config.max_upload_size_bytes(),
    );
    let game_routes = build_game_routes(services.db_pool.clone());

    let routes = health_routes
        .or(steam_routes)
        .or(upload_routes)
        .or(game_routes)
        .with(cors())
        .with(warp::log("gamevault"))
        .recover(handle_rejection);

    info!(
        "Server started successfully, listening on http://localhost:{}",
        port
    );

    warp::serve(routes).run(([0, 0, 0, 0], port)).await;

    Ok(())
}

fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

struct Services {
    db_pool: db::DbPool,
    ingest: IngestWorker,
    engine: Arc<ImportEngine>,
    rate_limiter: Arc<RateLimiter>,
    upload_bus: Arc<handlers_upload::UploadBus>,
}

fn initialize_services(config: &config::Config) -> Result<Services, Box<dyn std::error::Error>> {
    let db_pool = db_pool::create_db_pool(&config.db_path)?;
    info!("Database initialized successfully");

    std::fs::create_dir_all(&config.library_dir)?;
    let library = Library::new(config.library_dir.clone());
    let thumbnails = ThumbnailGenerator::new(config.thumbnail_quality);
    let ingest = IngestWorker::new(db_pool.clone(), library, thumbnails);
    info!("Library and ingest worker initialized");

    let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(
        config.import_rate_limit_ms,
    )));
    let import_bus: Arc<ProgressBus<ImportEvent>> = Arc::new(ProgressBus::new());
    let engine = Arc::new(ImportEngine::new(
        db_pool.clone(),
        ingest.clone(),
        import_bus,
    ));
    let upload_bus: Arc<handlers_upload::UploadBus> = Arc::new(ProgressBus::new());
    info!("Import engine initialized");

    Ok(Services {
        db_pool,
        ingest,
        engine,
        rate_limiter,
        upload_bus,
    })
}

fn build_health_routes(
    db_pool: db::DbPool,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let health = warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({ "status": "ok" }))
    });

    let ready = warp::path("ready")
        .and(warp::get())
        .and(with_state(db_pool))
        .map(|db_pool: db::DbPool| match db_pool.get() {
            Ok(_) => warp::reply::with_status(
                warp::reply::json(&serde_json::json!({ "status": "ready" })),
                warp::http::StatusCode::OK,
            ),
            Err(e) => warp::reply::with_status(
                warp::reply::json(&serde_json::json!({ "status": "unavailable", "error": e.to_string() })),
                warp::http::StatusCode::SERVICE_UNAVAILABLE,
            ),
        });

    health.or(ready)
}

fn build_steam_routes(
    db_pool: db::DbPool,
    engine: Arc<ImportEngine>,
    rate_limiter: Arc<RateLimiter>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let api_steam_validate = warp::path("api")
        .and(warp::path("steam"))
        .and(warp::path("validate"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<handlers_steam::SteamValidateRequest>())
        .and(with_state(rate_limiter.clone()))
        .and_then(handlers_steam::validate_steam);

    let api_steam_games = warp::path("api")
        .and(warp::path("steam"))
        .and(warp::path("games"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<handlers_steam::SteamValidateRequest>())
        .and(with_state(rate_limiter.clone()))
        .and_then(handlers_steam::list_steam_games);

    let api_steam_import = warp::path("api")
        .and(warp::path("steam"))
        .and(warp::path("import"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<handlers_steam::SteamImportRequest>())
        .and(with_state(engine.clone()))
        .and(with_state(rate_limiter))
        .and_then(handlers_steam::start_import);

    let api_steam_progress = warp::path("api")
        .and(warp::path("steam"))
        .and(warp::path("import"))
        .and(warp::path::param::<i64>())
        .and(warp::path("progress"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<handlers_steam::ProgressQuery>())
        .and(with_state(engine.clone()))
        .and(with_state(db_pool.clone()))
        .and_then(handlers_steam::import_progress);

    let api_steam_session = warp::path("api")
        .and(warp::path("steam"))
        .and(warp::path("import"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(db_pool.clone()))
        .and_then(handlers_steam::get_session);

    let api_steam_cancel = warp::path("api")
        .and(warp::path("steam"))
        .and(warp::path("import"))
        .and(warp::path::param::<i64>())
        .and(warp::path("cancel"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(engine))
        .and(with_state(db_pool))
        .and_then(handlers_steam::cancel_import);

    api_steam_validate
        .or(api_steam_games)
        .or(api_steam_import)
        .or(api_steam_progress)
        .or(api_steam_session)
        .or(api_steam_cancel)
}

fn build_upload_routes(
    db_pool: db::DbPool,
    ingest: IngestWorker,
    upload_bus: Arc<handlers_upload::UploadBus>,
    max_upload_bytes: u64,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let api_upload = warp::path("api")
        .and(warp::path("upload"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::multipart::form().max_length(max_upload_bytes))
        .and(with_state(ingest))
        .and(with_state(db_pool))
        .and(with_state(upload_bus.clone()))
        .and_then(handlers_upload::upload);

    let api_upload_progress = warp::path("api")
        .and(warp::path("upload"))
        .and(warp::path("progress"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(upload_bus))
        .and_then(handlers_upload::upload_progress);

    api_upload.or(api_upload_progress)
}

fn build_game_routes(
    db_pool: db::DbPool,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let api_games_list = warp::path("api")
        .and(warp::path("games"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<handlers_game::GameListQuery>())
        .and(with_state(db_pool.clone()))
        .and_then(handlers_game::list_games);

    let api_games_create = warp::path("api")
        .and(warp::path("games"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<handlers_game::CreateGameRequest>())
        .and(with_state(db_pool.clone()))
        .and_then(handlers_game::create_game);

    let api_game_get = warp::path("api")
        .and(warp::path("games"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(db_pool.clone()))
        .and_then(handlers_game::get_game);

    let api_game_delete = warp::path("api")
        .and(warp::path("games"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_state(db_pool.clone()))
        .and_then(handlers_game::delete_game);

    let api_game_screenshots = warp::path("api")
        .and(warp::path("games"))
        .and(warp::path::param::<i64>())
        .and(warp::path("screenshots"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<handlers_game::ScreenshotListQuery>())
        .and(with_state(db_pool.clone()))
        .and_then(handlers_game::list_game_screenshots);

    let api_screenshot_favorite = warp::path("api")
        .and(warp::path("screenshots"))
        .and(warp::path::param::<i64>())
        .and(warp::path("favorite"))
        .and(warp::path::end())
        .and(warp::put())
        .and(with_state(db_pool))
        .and_then(handlers_game::toggle_favorite);

    api_games_list
        .or(api_games_create)
        .or(api_game_get)
        .or(api_game_delete)
        .or(api_game_screenshots)
        .or(api_screenshot_favorite)
}
