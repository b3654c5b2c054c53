use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub secret_key: String,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub library_dir: PathBuf,
    pub db_path: String,
    pub disable_auth: bool,
    pub token_expiry_days: u32,
    pub import_rate_limit_ms: u64,
    pub max_upload_size_mb: u64,
    pub thumbnail_quality: u8,

    // API keys for the external metadata collaborators (not used by the
    // import core itself).
    pub steam_api_key: String,
    pub steamgriddb_api_key: String,
    pub igdb_client_id: String,
    pub igdb_client_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let data_dir = env::var("GAMEVAULT_DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        Ok(Config {
            port: env::var("GAMEVAULT_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            host: env::var("GAMEVAULT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            secret_key: env::var("GAMEVAULT_SECRET_KEY")
                .unwrap_or_else(|_| "change-me-to-a-random-string".to_string()),
            base_url: env::var("GAMEVAULT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            library_dir: env::var("GAMEVAULT_LIBRARY_DIR")
                .unwrap_or_else(|_| format!("{}/library", data_dir))
                .into(),
            db_path: env::var("GAMEVAULT_DB_PATH")
                .unwrap_or_else(|_| format!("{}/gamevault.db", data_dir)),
            data_dir: data_dir.into(),
            disable_auth: env::var("GAMEVAULT_DISABLE_AUTH")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            token_expiry_days: env::var("GAMEVAULT_TOKEN_EXPIRY_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            import_rate_limit_ms: env::var("GAMEVAULT_IMPORT_RATE_LIMIT_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_upload_size_mb: env::var("GAMEVAULT_MAX_UPLOAD_SIZE_MB")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            thumbnail_quality: env::var("GAMEVAULT_THUMBNAIL_QUALITY")
                .unwrap_or_else(|_| "85".to_string())
                .parse()?,
            steam_api_key: env::var("GAMEVAULT_STEAM_API_KEY").unwrap_or_default(),
            steamgriddb_api_key: env::var("GAMEVAULT_STEAMGRIDDB_API_KEY").unwrap_or_default(),
            igdb_client_id: env::var("GAMEVAULT_IGDB_CLIENT_ID").unwrap_or_default(),
            igdb_client_secret: env::var("GAMEVAULT_IGDB_CLIENT_SECRET").unwrap_or_default(),
        })
    }

    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }
}
