pub mod config;
pub mod db;
pub mod db_pool;
pub mod db_schema;
pub mod error;
pub mod format_detector;
pub mod handlers_game;
pub mod handlers_steam;
pub mod handlers_upload;
pub mod import_engine;
pub mod ingest_worker;
pub mod library;
pub mod metadata_extractor;
pub mod progress_bus;
pub mod rate_limiter;
pub mod steam_parser;
pub mod steam_scraper;
pub mod thumbnail_generator;
pub mod warp_helpers;
