use anyhow::{Context, Result};
use common::zones::{ConfigError, ZoneCatalog};
use reqwest::Url;
use std::env;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Zone polygon file
    pub zone_config: PathBuf,

    /// Alerts not refreshed for longer than this are purged
    pub alert_ttl: chrono::Duration,

    /// Notification webhook (optional; notifications are only logged without it)
    pub webhook_url: Option<Url>,

    /// Node ID for this service instance
    pub node_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".to_string(),
            zone_config: PathBuf::from("zone_config.json"),
            alert_ttl: chrono::Duration::seconds(60),
            webhook_url: None,
            node_id: "analytics-local".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("ANALYTICS_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let zone_config = env::var("ZONE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("zone_config.json"));

        let ttl_secs: i64 = match env::var("ALERT_TTL_SECS") {
            Ok(raw) => raw.parse().context("Invalid ALERT_TTL_SECS")?,
            Err(_) => 60,
        };
        anyhow::ensure!(ttl_secs >= 0, "ALERT_TTL_SECS must not be negative");
        let alert_ttl = chrono::Duration::try_seconds(ttl_secs)
            .context("ALERT_TTL_SECS is out of range")?;

        let webhook_url = env::var("NOTIFY_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| Url::parse(&s).context("Invalid NOTIFY_WEBHOOK_URL"))
            .transpose()?;

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "analytics-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        Ok(Self {
            bind_addr,
            zone_config,
            alert_ttl,
            webhook_url,
            node_id,
        })
    }

    /// Load the zone catalog. A missing file yields an empty catalog; a file
    /// that exists but does not validate is an error.
    pub fn load_zones(&self) -> Result<ZoneCatalog, ConfigError> {
        if !self.zone_config.exists() {
            warn!(
                path = %self.zone_config.display(),
                "zone config not found, starting with no zones"
            );
            return Ok(ZoneCatalog::default());
        }
        ZoneCatalog::load(&self.zone_config)
    }
}
