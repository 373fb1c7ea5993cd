//! Configuration management

use anyhow::{self, Context, Result};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Rows per chunk for entity batch writes
    pub import_chunk_size: usize,

    /// Concurrent chunk writes within one entity step
    pub import_write_concurrency: usize,

    /// Retry ceiling for transient chunk-write failures
    pub import_max_write_retries: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let import_chunk_size = env_usize("IMPORT_CHUNK_SIZE", 250)?;
        if !(1..=1_000).contains(&import_chunk_size) {
            anyhow::bail!(
                "IMPORT_CHUNK_SIZE must be between 1 and 1000 (current: {})",
                import_chunk_size
            );
        }

        let import_write_concurrency = env_usize("IMPORT_WRITE_CONCURRENCY", 4)?;
        if !(1..=16).contains(&import_write_concurrency) {
            anyhow::bail!(
                "IMPORT_WRITE_CONCURRENCY must be between 1 and 16 (current: {})",
                import_write_concurrency
            );
        }

        let import_max_write_retries = env_usize("IMPORT_MAX_WRITE_RETRIES", 3)? as u32;

        Ok(Self {
            nats_url,
            database_url,
            import_chunk_size,
            import_write_concurrency,
            import_max_write_retries,
        })
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<usize>()
            .with_context(|| format!("{} must be a positive integer (got '{}')", name, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_defaults_for_import_tuning() {
        std::env::remove_var("IMPORT_CHUNK_SIZE");
        std::env::remove_var("IMPORT_WRITE_CONCURRENCY");
        std::env::remove_var("IMPORT_MAX_WRITE_RETRIES");
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.import_chunk_size, 250);
        assert_eq!(config.import_write_concurrency, 4);
        assert_eq!(config.import_max_write_retries, 3);
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_rejects_oversized_chunk() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("IMPORT_CHUNK_SIZE", "5000");

        assert!(Config::from_env().is_err());

        // Cleanup
        std::env::remove_var("IMPORT_CHUNK_SIZE");
    }

    #[test]
    fn test_env_usize_parses_and_defaults() {
        assert_eq!(env_usize("MASAR_TEST_UNSET_VAR", 7).unwrap(), 7);
    }
}
