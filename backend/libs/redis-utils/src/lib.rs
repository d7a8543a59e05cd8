//! Redis connection bootstrap shared across services.
//!
//! Wraps `redis::aio::ConnectionManager` with:
//! - bounded startup retry (a cache that never comes up is a fatal
//!   configuration error, surfaced at process start rather than per call)
//! - a periodic health ping job that keeps idle connections alive and
//!   detects stale connections before they fail real operations

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// How many times to retry the initial connection before giving up.
const STARTUP_ATTEMPTS: u32 = 5;

/// Delay between startup attempts.
const STARTUP_BACKOFF: Duration = Duration::from_secs(2);

/// How often the health check pings Redis (every 60 seconds).
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Redis connection pool for stream caches.
///
/// `ConnectionManager` is cheap to clone and multiplexes over one
/// connection, so handing out clones is the sharing model here.
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    /// Connect to Redis, retrying a few times so a service starting
    /// before its cache does not immediately crash-loop.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;

        let mut attempt = 1;
        loop {
            match ConnectionManager::new(client.clone()).await {
                Ok(manager) => {
                    info!(attempt, "Redis connection established");
                    return Ok(Self { manager });
                }
                Err(err) if attempt < STARTUP_ATTEMPTS => {
                    warn!(
                        attempt,
                        error = %err,
                        "Redis connection failed, retrying"
                    );
                    attempt += 1;
                    sleep(STARTUP_BACKOFF).await;
                }
                Err(err) => {
                    return Err(err).context("failed to initialize Redis connection manager");
                }
            }
        }
    }

    /// Get a clone of the connection manager for shared use.
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Ping Redis to check connection health.
    pub async fn ping(&self) -> Result<()> {
        ping(&mut self.manager.clone()).await
    }
}

/// Single PING round trip against an existing connection.
pub async fn ping(conn: &mut ConnectionManager) -> Result<()> {
    redis::cmd("PING")
        .query_async::<_, String>(conn)
        .await
        .context("Redis health check failed")?;
    Ok(())
}

/// Configuration for the health check job.
#[derive(Clone)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub check_interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: HEALTH_CHECK_INTERVAL,
        }
    }
}

/// Start the Redis health check background job.
///
/// Periodically pings Redis to keep TCP connections alive, surface
/// connection issues early, and let `ConnectionManager` trigger its
/// automatic reconnection before user-facing operations fail.
pub async fn start_health_check(mut conn: ConnectionManager, config: HealthCheckConfig) {
    if !config.enabled {
        info!("Redis health check disabled by configuration");
        return;
    }

    info!(
        interval_secs = config.check_interval.as_secs(),
        "Starting Redis health check background job"
    );

    // Initial delay to let services start up
    sleep(Duration::from_secs(10)).await;

    let mut consecutive_failures = 0;
    let max_consecutive_failures = 5;

    loop {
        match ping(&mut conn).await {
            Ok(()) => {
                if consecutive_failures > 0 {
                    info!(
                        previous_failures = consecutive_failures,
                        "Redis connection recovered"
                    );
                }
                consecutive_failures = 0;
                debug!("Redis health check: OK");
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= max_consecutive_failures {
                    error!(
                        consecutive_failures,
                        error = %e,
                        "Redis health check: CRITICAL - multiple consecutive failures"
                    );
                } else {
                    warn!(
                        consecutive_failures,
                        error = %e,
                        "Redis health check: FAILED"
                    );
                }
            }
        }

        sleep(config.check_interval).await;
    }
}
