use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use uuid::Uuid;

use crate::db::repositories::MAX_RECENT_LIMIT;
use crate::stream::SessionConfig;

pub const CONFIG_PATH_ENV: &str = "TEMPSTREAM_CONFIG";

/// Process-wide configuration, loaded once at startup and passed down.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    /// Bearer token required on every route except `/`.
    pub api_token: Option<String>,
    pub tick_interval_ms: u64,
    pub send_timeout_ms: u64,
    pub recent_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            database_path: PathBuf::from("./data/tempstream.sqlite3"),
            api_token: None,
            tick_interval_ms: 3_000,
            send_timeout_ms: 10_000,
            recent_limit: 50,
        }
    }
}

impl Settings {
    /// Defaults, then the JSON file named by `TEMPSTREAM_CONFIG` if any,
    /// then individual environment variables.
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("TEMPSTREAM_BIND") {
            self.bind_addr = bind
                .parse()
                .with_context(|| format!("invalid TEMPSTREAM_BIND '{bind}'"))?;
        }
        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid PORT '{port}'"))?;
            self.bind_addr.set_port(port);
        }
        if let Some(path) = lookup("TEMPSTREAM_DB") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(token) = lookup("TEMPSTREAM_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(ms) = lookup("TEMPSTREAM_TICK_MS") {
            self.tick_interval_ms = ms
                .parse()
                .with_context(|| format!("invalid TEMPSTREAM_TICK_MS '{ms}'"))?;
        }
        if let Some(ms) = lookup("TEMPSTREAM_SEND_TIMEOUT_MS") {
            self.send_timeout_ms = ms
                .parse()
                .with_context(|| format!("invalid TEMPSTREAM_SEND_TIMEOUT_MS '{ms}'"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("tick interval must be greater than zero"));
        }
        if self.send_timeout_ms == 0 {
            return Err(anyhow!("send timeout must be greater than zero"));
        }
        if self.recent_limit == 0 || self.recent_limit > MAX_RECENT_LIMIT {
            return Err(anyhow!(
                "recent limit must be between 1 and {MAX_RECENT_LIMIT}"
            ));
        }
        if matches!(self.api_token.as_deref(), Some(token) if token.trim().is_empty()) {
            return Err(anyhow!("api token must not be blank"));
        }
        Ok(())
    }

    /// The configured token, or a freshly generated one when none was given.
    pub fn resolve_api_token(&self) -> String {
        match &self.api_token {
            Some(token) => token.clone(),
            None => {
                let token = Uuid::new_v4().simple().to_string();
                warn!("No API token configured; generated one for this run: {token}");
                token
            }
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }
}
