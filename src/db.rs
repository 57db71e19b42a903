use anyhow::{Context, Result};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::time::Duration;

use crate::config::{secret_from_env, OcsConfig};

pub async fn connect(config: &OcsConfig) -> Result<MySqlPool> {
    let password = secret_from_env(&config.password_env)?;

    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&password)
        .database(&config.database);

    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to OCS database {}@{}:{}/{}",
                config.user, config.host, config.port, config.database
            )
        })?;

    Ok(pool)
}
