use std::error::Error;
use std::sync::Arc;

use crate::backend::BackendClient;
use crate::runs::RunExecutor;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            backend_url: std::env::var("BACKEND_URL")?,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
        })
    }
}

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub backend: Arc<BackendClient>,
    pub executor: Arc<RunExecutor>,
}

pub async fn app_init() -> Result<(Config, Arc<AppState>), Box<dyn Error>> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");

    let backend = Arc::new(BackendClient::new(config.backend_url.clone()));

    // Probe the backend; a cold backend is not fatal at startup
    match backend.ping().await {
        Ok(_) => log::info!("✅ Test backend reachable"),
        Err(e) => log::warn!("⚠️  Test backend probe: {}", e),
    }

    let executor = Arc::new(RunExecutor::new(backend.clone()));

    let state = Arc::new(AppState { backend, executor });
    Ok((config, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // SAFETY: test process, no concurrent env readers
        unsafe {
            std::env::set_var("BACKEND_URL", "http://localhost:8931");
            std::env::remove_var("HOST");
            std::env::remove_var("PORT");
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.backend_url, "http://localhost:8931");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
    }
}
