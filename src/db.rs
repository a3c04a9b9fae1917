use std::{future::Future, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::warn;

use crate::{config::AppConfig, error::StoreError};

/// Connection pool plus the time budget granted to each store operation.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
    pub timeout: Duration,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        Ok(Self {
            pool,
            timeout: config.db_timeout,
        })
    }

    /// Applies the embedded migrations. Any failure aborts startup.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")
    }

    /// Runs one store operation under the per-operation timeout. An elapsed
    /// timer is reported as `StoreError::Timeout`, never as a missing record.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "store operation timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}
