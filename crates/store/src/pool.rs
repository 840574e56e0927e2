//! Bounded connection pool with poison recovery
//!
//! A channel of connected store sessions. Every operation follows strict
//! acquire-use-release; a session that observed an error is poisoned: it is
//! closed instead of returned, and the pool connects a replacement. When the
//! replacement also fails the pool shrinks permanently and a critical log
//! asks for operator intervention (a restart restores full capacity).

use crate::error::{Error, Result};
use sqlx::{Connection, PgConnection};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

/// How long an acquire may wait before surfacing an error. Keeps writers
/// from deadlocking when the pool has shrunk to zero behind their backs.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ConnectionPool {
    dsn: String,
    tx: mpsc::Sender<PgConnection>,
    rx: Mutex<mpsc::Receiver<PgConnection>>,
    /// Live capacity; decremented when a poisoned session cannot be replaced
    size: AtomicUsize,
}

impl ConnectionPool {
    /// Connect `size` sessions up front. Startup fails if any initial
    /// connection fails; a half-provisioned pool is a configuration error.
    pub async fn connect(dsn: &str, size: usize) -> Result<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(size);

        for _ in 0..size {
            let mut conn = PgConnection::connect(dsn).await?;
            sqlx::query("SELECT 1").execute(&mut conn).await?;
            tx.try_send(conn)
                .map_err(|_| Error::Internal("pool channel rejected connection".to_string()))?;
        }

        info!(size, "store connection pool ready");
        Ok(Self {
            dsn: dsn.to_string(),
            tx,
            rx: Mutex::new(rx),
            size: AtomicUsize::new(size),
        })
    }

    /// Take a session from the pool, waiting while all are in use.
    pub async fn acquire(&self) -> Result<PgConnection> {
        if self.size.load(Ordering::SeqCst) == 0 {
            return Err(Error::PoolExhausted);
        }

        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(ACQUIRE_TIMEOUT, rx.recv()).await {
            Ok(Some(conn)) => Ok(conn),
            Ok(None) => Err(Error::PoolExhausted),
            Err(_) => Err(Error::PoolExhausted),
        }
    }

    /// Return a healthy session to the pool
    pub fn release(&self, conn: PgConnection) {
        if self.tx.try_send(conn).is_err() {
            // Pool closed or over capacity; the connection just drops
            debug!("released connection discarded");
        }
    }

    /// Discard a poisoned session and try to replace it with a fresh one.
    pub async fn poison(&self, conn: PgConnection) {
        let _ = conn.close().await;

        match PgConnection::connect(&self.dsn).await {
            Ok(fresh) => {
                warn!("poisoned store connection replaced");
                if self.tx.try_send(fresh).is_err() {
                    debug!("replacement connection discarded");
                }
            }
            Err(e) => {
                let remaining = self
                    .size
                    .fetch_sub(1, Ordering::SeqCst)
                    .saturating_sub(1);
                error!(
                    remaining,
                    "CRITICAL: could not replace poisoned store connection, \
                     pool permanently shrunk ({e}); restart to restore capacity"
                );
            }
        }
    }

    /// Current live capacity
    pub fn capacity(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Drain and close every pooled session
    pub async fn close(&self) {
        self.size.store(0, Ordering::SeqCst);
        let mut rx = self.rx.lock().await;
        while let Ok(conn) = rx.try_recv() {
            let _ = conn.close().await;
        }
        info!("store connection pool closed");
    }
}
