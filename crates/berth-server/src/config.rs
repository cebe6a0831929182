// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for berth-server.

use berth_core::crypto::Encryptor;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// HTTP listen port.
    pub port: u16,
    /// Public base URL, used to render magic-link URLs.
    pub base_url: String,
    /// Docker Engine socket path.
    pub docker_socket_path: String,
    /// Reverse-proxy sidecar container name.
    pub nginx_container_name: String,
    /// ACME registration email injected into proxied services.
    pub letsencrypt_email: String,
    /// Use the ACME staging endpoint.
    pub letsencrypt_staging: bool,
    /// General rate-limit window in seconds.
    pub throttle_ttl_secs: u64,
    /// General requests per window per key.
    pub throttle_limit: u32,
    /// Run the recovery supervisor at boot.
    pub enable_deployment_recovery: bool,
    /// Column encryption key, when configured.
    pub encryption_key: Option<String>,
    /// Deployment worker pool size.
    pub deploy_workers: usize,
    /// sqlx pool size.
    pub db_pool_size: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL"))?;

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));

        let docker_socket_path = std::env::var("DOCKER_SOCKET_PATH")
            .unwrap_or_else(|_| "/var/run/docker.sock".to_string());

        let nginx_container_name =
            std::env::var("NGINX_CONTAINER_NAME").unwrap_or_else(|_| "nginx_proxy".to_string());

        let letsencrypt_email = std::env::var("LETSENCRYPT_EMAIL").unwrap_or_default();

        let letsencrypt_staging = std::env::var("LETSENCRYPT_STAGING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let throttle_ttl_secs = std::env::var("THROTTLE_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let throttle_limit = std::env::var("THROTTLE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let enable_deployment_recovery = std::env::var("ENABLE_DEPLOYMENT_RECOVERY")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let encryption_key = std::env::var("ENCRYPTION_KEY").ok().filter(|k| !k.is_empty());

        let deploy_workers = std::env::var("DEPLOY_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        let db_pool_size = std::env::var("DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            port,
            base_url,
            docker_socket_path,
            nginx_container_name,
            letsencrypt_email,
            letsencrypt_staging,
            throttle_ttl_secs,
            throttle_limit,
            enable_deployment_recovery,
            encryption_key,
            deploy_workers,
            db_pool_size,
        })
    }

    /// Build the column encryptor from the configured key.
    ///
    /// `None` means env vars are stored in the tagged plaintext envelope.
    pub fn encryptor(&self) -> Result<Option<Encryptor>, ConfigError> {
        match &self.encryption_key {
            Some(hex) => Encryptor::from_hex(hex)
                .map(Some)
                .map_err(|e| ConfigError::InvalidEncryptionKey(e.to_string())),
            None => Ok(None),
        }
    }

    /// Proxy-injection settings derived from this config.
    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            letsencrypt_email: self.letsencrypt_email.clone(),
            letsencrypt_staging: self.letsencrypt_staging,
        }
    }
}

/// The subset of config the deployment engine and recovery supervisor
/// need for proxy env injection.
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    /// ACME registration email.
    pub letsencrypt_email: String,
    /// Use the ACME staging endpoint.
    pub letsencrypt_staging: bool,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// The encryption key is malformed.
    #[error("Invalid ENCRYPTION_KEY: {0}")]
    InvalidEncryptionKey(String),
}
