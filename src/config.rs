// config.rs
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone)]
pub struct Config {
    /// Without a database URL the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub port: u16,
    pub log_level: String,
    pub db_max_connections: u32,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(8000);
        let log_level = std::env::var("RUST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let db_max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|max| max.parse::<u32>().ok())
            .filter(|max| *max > 0)
            .unwrap_or(10);

        Config {
            database_url,
            port,
            log_level,
            db_max_connections,
        }
    }

    pub fn log_filter(&self) -> LevelFilter {
        self.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let mut config = Config {
            database_url: None,
            port: 8000,
            log_level: "chatty".to_string(),
            db_max_connections: 10,
        };
        assert_eq!(config.log_filter(), LevelFilter::INFO);

        config.log_level = "debug".to_string();
        assert_eq!(config.log_filter(), LevelFilter::DEBUG);
    }
}
