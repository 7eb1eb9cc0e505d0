//! Server configuration

use std::time::Duration;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_GENERATION_MODEL: &str = "google/gemini-2.5-flash-image";
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Which image-generation backend serves `/api/generate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Live,
    Simulated,
}

impl std::str::FromStr for GenerationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(GenerationMode::Live),
            "simulated" | "simulate" | "mock" => Ok(GenerationMode::Simulated),
            other => anyhow::bail!("GENERATION_MODE must be 'live' or 'simulated', got '{}'", other),
        }
    }
}

/// Image-generation provider settings
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub mode: GenerationMode,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub app_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub supabase_jwt_secret: String,
    pub allowed_origins: Vec<String>,
    pub generation: GenerationConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let supabase_jwt_secret = std::env::var("SUPABASE_JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("SUPABASE_JWT_SECRET must be set"))?;
        if supabase_jwt_secret.trim().is_empty() {
            anyhow::bail!("SUPABASE_JWT_SECRET must not be empty");
        }

        let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
        let mode = match std::env::var("GENERATION_MODE") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => GenerationMode::Live,
        };
        if mode == GenerationMode::Live && api_key.trim().is_empty() {
            anyhow::bail!("OPENROUTER_API_KEY must be set when GENERATION_MODE=live");
        }

        let timeout_secs = match std::env::var("GENERATION_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("GENERATION_TIMEOUT_SECS must be a positive integer"))?,
            Err(_) => DEFAULT_GENERATION_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            anyhow::bail!("GENERATION_TIMEOUT_SECS must be a positive integer");
        }

        Ok(Self {
            database_url,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            supabase_jwt_secret,
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            generation: GenerationConfig {
                mode,
                api_key,
                base_url: std::env::var("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_OPENROUTER_BASE_URL.to_string()),
                model: std::env::var("GENERATION_MODEL")
                    .unwrap_or_else(|_| DEFAULT_GENERATION_MODEL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
                app_url: std::env::var("APP_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 8] = [
        "DATABASE_URL",
        "SUPABASE_JWT_SECRET",
        "GENERATION_MODE",
        "OPENROUTER_API_KEY",
        "GENERATION_TIMEOUT_SECS",
        "ALLOWED_ORIGINS",
        "BIND_ADDRESS",
        "GENERATION_MODEL",
    ];

    fn clear() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_simulated_mode_needs_no_provider_key() {
        clear();
        std::env::set_var("DATABASE_URL", "postgres://localhost/nanoedit");
        std::env::set_var("SUPABASE_JWT_SECRET", "secret");
        std::env::set_var("GENERATION_MODE", "simulated");
        std::env::set_var("ALLOWED_ORIGINS", "https://a.example, ,https://b.example");

        let config = Config::from_env().unwrap();
        assert_eq!(config.generation.mode, GenerationMode::Simulated);
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.generation.timeout, Duration::from_secs(120));
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        clear();
    }

    #[test]
    #[serial]
    fn test_live_mode_requires_provider_key() {
        clear();
        std::env::set_var("DATABASE_URL", "postgres://localhost/nanoedit");
        std::env::set_var("SUPABASE_JWT_SECRET", "secret");
        assert!(Config::from_env().is_err());

        std::env::set_var("OPENROUTER_API_KEY", "sk-or-test");
        std::env::set_var("GENERATION_TIMEOUT_SECS", "30");
        let config = Config::from_env().unwrap();
        assert_eq!(config.generation.mode, GenerationMode::Live);
        assert_eq!(config.generation.timeout, Duration::from_secs(30));
        clear();
    }

    #[test]
    #[serial]
    fn test_rejects_zero_timeout_and_unknown_mode() {
        clear();
        std::env::set_var("DATABASE_URL", "postgres://localhost/nanoedit");
        std::env::set_var("SUPABASE_JWT_SECRET", "secret");
        std::env::set_var("GENERATION_MODE", "simulated");
        std::env::set_var("GENERATION_TIMEOUT_SECS", "0");
        assert!(Config::from_env().is_err());

        std::env::remove_var("GENERATION_TIMEOUT_SECS");
        std::env::set_var("GENERATION_MODE", "dry-run");
        assert!(Config::from_env().is_err());
        clear();
    }
}
