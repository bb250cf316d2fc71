use anyhow::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::{CONNECT_MAX_RETRIES, CONNECT_RETRY_DELAY};

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of retries for database connections
    pub max_retries: u32,
    /// Delay between connection retries
    pub retry_delay: Duration,
    /// Upper bound on pooled connections
    pub max_connections: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: CONNECT_MAX_RETRIES,
            retry_delay: CONNECT_RETRY_DELAY,
            max_connections: 10,
        }
    }
}

/// Connect to a database with retry logic.
///
/// Transient failures (a database still starting up, a flaky network hop)
/// are retried a bounded number of times before the error is surfaced.
pub async fn connect_with_retry(url: &str, max_connections: u32) -> Result<PgPool> {
    connect_with_retry_config(
        url,
        &ConnectionConfig {
            max_connections,
            ..ConnectionConfig::default()
        },
    )
    .await
}

/// Connect to a database with custom retry configuration
pub async fn connect_with_retry_config(url: &str, config: &ConnectionConfig) -> Result<PgPool> {
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
        {
            Ok(pool) => {
                if attempt > 0 {
                    info!("connected to database after {attempt} retries");
                } else {
                    info!("connected to database");
                }
                return Ok(pool);
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < config.max_retries {
                    if attempt == 0 {
                        warn!("database not ready, retrying...");
                    }
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to connect to database after {} attempts: {}",
        config.max_retries + 1,
        last_error.unwrap()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_retries, CONNECT_MAX_RETRIES);
        assert_eq!(config.retry_delay, CONNECT_RETRY_DELAY);
    }

    #[test]
    fn test_connection_config_custom() {
        let config = ConnectionConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            max_connections: 4,
        };
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(config.max_connections, 4);
    }
}
