//! Relational store over MySQL.
//!
//! Table access goes through the generic [`store`] operations driven by the
//! [`entity::Entity`] contract, plus typed per-family query modules. All
//! functions are generic over `sqlx::Executor` so they compose with either
//! the shared pool or an open transaction.

pub mod collection;
pub mod community;
pub mod compound;
pub mod entity;
pub mod property;
pub mod provider;
pub mod store;

use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

use crate::config::{DbConfig, environment};
use crate::error::{Result, WatcherError};

/// The logical database holding the schema, selected by deploy environment.
pub fn database() -> &'static str {
    environment().database()
}

/// Open the shared connection pool.
pub async fn connect(config: &DbConfig) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(10)
        .connect(&config.url())
        .await
        .map_err(|e| WatcherError::database("db:connect", e))
}
