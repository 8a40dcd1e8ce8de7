use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::mastery::PersistMode;

const STORE_FILE_NAME: &str = "bkt_mastery.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub store_path: PathBuf,
    pub persist_mode: PersistMode,
    pub flush_interval: Duration,
    pub cf_endpoint: Option<String>,
    pub cf_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let log_dir = crate::logging::log_dir_from_env();

        let store_path = env_string("MASTERY_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_store_path);

        let persist_mode = env_string("MASTERY_PERSIST_MODE")
            .and_then(|value| PersistMode::parse(&value))
            .unwrap_or_default();

        let flush_interval = Duration::from_secs(
            env_string("MASTERY_FLUSH_INTERVAL_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(30),
        );

        let cf_endpoint = env_string("CF_ENDPOINT");
        let cf_timeout = Duration::from_millis(
            env_string("CF_TIMEOUT_MS")
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(2_000),
        );

        Self {
            host,
            port,
            log_level,
            log_dir,
            store_path,
            persist_mode,
            flush_interval,
            cf_endpoint,
            cf_timeout,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("mastery-backend").join(STORE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(STORE_FILE_NAME))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
