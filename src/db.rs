use futures_util::future::join_all;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECTIONS_PER_CPU: u32 = 5;
const MIN_CONNECTIONS: u32 = 5;
const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(60);
const MAX_CONN_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);
const MAX_CONN_IDLE_TIME: Duration = Duration::from_secs(15 * 60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to parse DATABASE_URL")]
    ConfigParse(#[source] sqlx::Error),

    #[error("failed to initialise connection pool: {reason}")]
    PoolInit { reason: String },

    #[error("failed to acquire a database connection")]
    Acquire(#[source] sqlx::Error),

    #[error("connection request was cancelled")]
    Cancelled,

    #[error("connection pool is closed")]
    Closed,
}

/// Settings for the shared PostgreSQL pool.
///
/// `from_dsn` fills in the service defaults; fields stay public so tests can
/// shrink the timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub connect_options: PgConnectOptions,
    pub max_connections: u32,
    pub min_connections: u32,
    pub health_check_period: Duration,
    pub max_lifetime: Duration,
    pub max_idle_time: Duration,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl PoolConfig {
    /// Parses `dsn` without opening any connection.
    pub fn from_dsn(dsn: &str) -> Result<Self, DatabaseError> {
        let connect_options = PgConnectOptions::from_str(dsn).map_err(DatabaseError::ConfigParse)?;

        Ok(Self {
            connect_options,
            max_connections: num_cpus::get() as u32 * CONNECTIONS_PER_CPU,
            min_connections: MIN_CONNECTIONS,
            health_check_period: HEALTH_CHECK_PERIOD,
            max_lifetime: MAX_CONN_LIFETIME,
            max_idle_time: MAX_CONN_IDLE_TIME,
            connect_timeout: CONNECT_TIMEOUT,
            keepalive_interval: HEALTH_CHECK_PERIOD,
        })
    }

    fn validate(&self) -> Result<(), DatabaseError> {
        if self.max_connections == 0 {
            return Err(DatabaseError::PoolInit {
                reason: "max connections must be at least 1".to_string(),
            });
        }
        if self.min_connections > self.max_connections {
            return Err(DatabaseError::PoolInit {
                reason: format!(
                    "min connections ({}) exceeds max connections ({})",
                    self.min_connections, self.max_connections
                ),
            });
        }

        let durations = [
            ("health check period", self.health_check_period),
            ("keep-alive interval", self.keepalive_interval),
            ("max connection lifetime", self.max_lifetime),
            ("max connection idle time", self.max_idle_time),
            ("connect timeout", self.connect_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(DatabaseError::PoolInit {
                reason: format!("{name} must be greater than zero"),
            });
        }
        Ok(())
    }

    // Idle connections see a ping at least this often.
    fn probe_interval(&self) -> Duration {
        self.health_check_period.min(self.keepalive_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
}

impl PoolStatus {
    pub fn in_use(&self) -> u32 {
        self.size.saturating_sub(self.idle as u32)
    }

    /// Every connection is open and checked out.
    pub fn is_saturated(&self) -> bool {
        self.size >= self.max && self.idle == 0
    }
}

/// Handle to the shared connection pool. Cloning is cheap and every clone
/// refers to the same pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    config: Arc<PoolConfig>,
    closed: Arc<AtomicBool>,
    health_check: CancellationToken,
}

impl Database {
    /// Builds the pool. Connections are opened lazily and the `min_connections`
    /// floor is filled in the background, so a valid config never dials here.
    ///
    /// Must be called from within a Tokio runtime. Cancelling `parent` stops
    /// the background health checks.
    pub fn connect(config: PoolConfig, parent: &CancellationToken) -> Result<Self, DatabaseError> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.max_idle_time)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(true)
            .connect_lazy_with(config.connect_options.clone());

        let health_check = parent.child_token();
        spawn_health_check(
            pool.clone(),
            config.probe_interval(),
            config.min_connections,
            health_check.clone(),
        );

        info!(
            host = config.connect_options.get_host(),
            database = config.connect_options.get_database().unwrap_or_default(),
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "database pool ready"
        );

        Ok(Self {
            pool,
            config: Arc::new(config),
            closed: Arc::new(AtomicBool::new(false)),
            health_check,
        })
    }

    /// Checks out a connection.
    ///
    /// While every connection is in use this waits for one to be returned,
    /// for as long as `cancel` allows. A single dial is still bounded by the
    /// connect timeout.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PoolConnection<Postgres>, DatabaseError> {
        loop {
            if self.is_closed() {
                return Err(DatabaseError::Closed);
            }

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DatabaseError::Cancelled),
                result = self.pool.acquire() => result,
            };

            match attempt {
                Ok(conn) => return Ok(conn),
                Err(sqlx::Error::PoolTimedOut) if self.status().is_saturated() => {
                    debug!("pool saturated, still waiting for a connection");
                }
                Err(sqlx::Error::PoolClosed) => return Err(DatabaseError::Closed),
                Err(err) => return Err(DatabaseError::Acquire(err)),
            }
        }
    }

    /// Closes the pool, waiting for checked-out connections to come back.
    /// Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("database pool already closed");
            return;
        }

        let status = self.status();
        info!(
            size = status.size,
            in_use = status.in_use(),
            "closing database pool"
        );

        self.health_check.cancel();
        self.pool.close().await;
        info!("database pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.config.max_connections,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

// Checking a connection out and back in restarts its idle clock, so idle
// connections are only probed while the pool is at or below its floor. Above
// the floor the reaper owns them and `test_before_acquire` pings on checkout.
fn should_probe(size: u32, floor: u32) -> bool {
    size <= floor
}

fn spawn_health_check(pool: PgPool, period: Duration, floor: u32, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if pool.is_closed() {
                break;
            }
            if !should_probe(pool.size(), floor) {
                continue;
            }

            let evicted = probe_idle(&pool).await;
            if evicted > 0 {
                warn!(evicted, "dropped broken idle connections");
            }
        }

        debug!("health check stopped");
    });
}

/// Pings every idle connection and closes the ones that fail. Returns the
/// number of connections closed.
async fn probe_idle(pool: &PgPool) -> usize {
    let idle = pool.num_idle();
    let mut conns = Vec::with_capacity(idle);
    for _ in 0..idle {
        match pool.try_acquire() {
            Some(conn) => conns.push(conn),
            None => break,
        }
    }

    let results = join_all(conns.into_iter().map(|mut conn| async move {
        match conn.ping().await {
            Ok(()) => false,
            Err(err) => {
                debug!(error = %err, "idle connection failed health check");
                conn.close_on_drop();
                true
            }
        }
    }))
    .await;

    results.into_iter().filter(|evicted| *evicted).count()
}
