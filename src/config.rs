//! Environment-derived configuration.
//!
//! The deploy environment is selected by the `ENV` variable: `production`
//! picks MainNet endpoints and the `arc53` database, anything else picks
//! TestNet endpoints and `arc53_test`.

use std::env;
use std::sync::OnceLock;

use crate::constants::{NFD_MAINNET_REGISTRY_APP_ID, NFD_TESTNET_REGISTRY_APP_ID};

/// Deploy environment, resolved once from `ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Test,
}

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

impl Environment {
    fn from_env() -> Self {
        match env::var("ENV").as_deref() {
            Ok("production") => Self::Production,
            _ => Self::Test,
        }
    }

    pub fn algod_url(&self) -> &'static str {
        match self {
            Self::Production => "https://mainnet-api.algonode.cloud",
            Self::Test => "https://testnet-api.algonode.cloud",
        }
    }

    pub fn indexer_url(&self) -> &'static str {
        match self {
            Self::Production => "https://mainnet-idx.algonode.cloud",
            Self::Test => "https://testnet-idx.algonode.cloud",
        }
    }

    /// Logical database name holding the relational schema.
    pub fn database(&self) -> &'static str {
        match self {
            Self::Production => "arc53",
            Self::Test => "arc53_test",
        }
    }

    pub fn registry_app_id(&self) -> u64 {
        match self {
            Self::Production => NFD_MAINNET_REGISTRY_APP_ID,
            Self::Test => NFD_TESTNET_REGISTRY_APP_ID,
        }
    }
}

/// The process-wide environment. Resolved from `ENV` on first access.
pub fn environment() -> Environment {
    *ENVIRONMENT.get_or_init(Environment::from_env)
}

/// Connection settings for the MySQL store, read from the environment.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3306),
            user: env::var("DB_USER").unwrap_or_else(|_| "root".to_string()),
            password: env::var("DB_PASSWORD").unwrap_or_default(),
        }
    }

    /// Connection URL including the environment's database name.
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user,
            self.password,
            self.host,
            self.port,
            environment().database()
        )
    }
}
