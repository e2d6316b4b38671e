//! Environment-driven configuration, loaded once at startup and treated as
//! immutable. Mirrors the module-level constants in the original Python
//! `helpers.py`.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Error;

const METADATA_PROJECT_URL: &str = "http://metadata.google.internal/computeMetadata/v1/project/project-id";

#[derive(Debug, Clone)]
pub struct Config {
    pub interval_time: u64,
    pub scale_above_percent: i64,
    pub scale_after_intervals: u32,
    pub scale_up_percent: i64,
    pub scale_up_min_increment: i64,
    pub scale_up_max_increment: i64,
    pub scale_up_max_size: i64,
    pub scale_cooldown_time: i64,
    pub gcp_project_id: String,
    pub gmp_label_match: String,
    pub http_timeout: Duration,
    pub dry_run: bool,
    pub verbose: bool,
    pub slack_webhook_url: Option<String>,
    pub slack_channel: String,
    pub slack_message_prefix: Option<String>,
    pub slack_message_suffix: Option<String>,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the environment, auto-detecting the GCP
    /// project id from the GKE metadata server when unset.
    pub async fn from_env() -> Result<Self, Error> {
        let gcp_project_id = match env::var("GCP_PROJECT_ID") {
            Ok(id) if !id.is_empty() => id,
            _ => detect_gcp_project_id().await.ok_or_else(|| {
                Error::Startup("GCP_PROJECT_ID must be set or detectable from metadata service".into())
            })?,
        };

        let config = Config {
            interval_time: env_u64("INTERVAL_TIME", 60),
            scale_above_percent: env_i64("SCALE_ABOVE_PERCENT", 80),
            scale_after_intervals: env_u64("SCALE_AFTER_INTERVALS", 5) as u32,
            scale_up_percent: env_i64("SCALE_UP_PERCENT", 20),
            scale_up_min_increment: env_i64("SCALE_UP_MIN_INCREMENT", 1_000_000_000),
            scale_up_max_increment: env_i64("SCALE_UP_MAX_INCREMENT", 16_000_000_000_000),
            scale_up_max_size: env_i64("SCALE_UP_MAX_SIZE", 16_000_000_000_000),
            scale_cooldown_time: env_i64("SCALE_COOLDOWN_TIME", 22_200),
            gcp_project_id,
            gmp_label_match: env::var("GMP_LABEL_MATCH").unwrap_or_default(),
            http_timeout: Duration::from_secs(env_u64("HTTP_TIMEOUT", 15)),
            dry_run: env_bool("DRY_RUN", false),
            verbose: env_bool("VERBOSE", false),
            slack_webhook_url: env::var("SLACK_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            slack_channel: env::var("SLACK_CHANNEL").unwrap_or_else(|_| "#alerts".to_string()),
            slack_message_prefix: env::var("SLACK_MESSAGE_PREFIX").ok().filter(|s| !s.is_empty()),
            slack_message_suffix: env::var("SLACK_MESSAGE_SUFFIX").ok().filter(|s| !s.is_empty()),
        };

        Ok(config)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.interval_time * 10)
    }

    pub fn print_header(&self) {
        info!("Volume Autoscaler Configuration:");
        info!(mode = "Google Managed Prometheus (GMP)");
        info!(gcp_project_id = %self.gcp_project_id);
        info!(label_selector = %self.gmp_label_match);
        info!(interval_seconds = self.interval_time);
        info!(
            scale_after_intervals = self.scale_after_intervals,
            total_seconds = self.scale_after_intervals as u64 * self.interval_time
        );
        info!(scale_above_percent = self.scale_above_percent);
        info!(scale_up_percent = self.scale_up_percent);
        info!(min_increment = %crate::quantity::render_quantity(self.scale_up_min_increment));
        info!(max_increment = %crate::quantity::render_quantity(self.scale_up_max_increment));
        info!(max_size = %crate::quantity::render_quantity(self.scale_up_max_size));
        info!(cooldown_seconds = self.scale_cooldown_time);
        info!(verbose = self.verbose, dry_run = self.dry_run);
        info!(http_timeout_seconds = self.http_timeout.as_secs());
        info!(slack_enabled = self.slack_webhook_url.is_some());
    }

    /// Settings block fed into the `volume_autoscaler_settings` Info metric.
    pub fn as_metrics_info(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("interval_time_seconds".into(), self.interval_time.to_string());
        m.insert("scale_above_percent".into(), self.scale_above_percent.to_string());
        m.insert("scale_after_intervals".into(), self.scale_after_intervals.to_string());
        m.insert("scale_up_percent".into(), self.scale_up_percent.to_string());
        m.insert("scale_up_minimum_increment_bytes".into(), self.scale_up_min_increment.to_string());
        m.insert("scale_up_maximum_increment_bytes".into(), self.scale_up_max_increment.to_string());
        m.insert("scale_up_maximum_size_bytes".into(), self.scale_up_max_size.to_string());
        m.insert("scale_cooldown_time_seconds".into(), self.scale_cooldown_time.to_string());
        m.insert("gcp_project_id".into(), self.gcp_project_id.clone());
        m.insert("dry_run".into(), self.dry_run.to_string());
        m.insert("gmp_label_match".into(), self.gmp_label_match.clone());
        m.insert("gmp_mode".into(), "true".into());
        m.insert("http_timeout_seconds".into(), self.http_timeout.as_secs().to_string());
        m.insert("verbose_enabled".into(), self.verbose.to_string());
        m
    }
}

async fn detect_gcp_project_id() -> Option<String> {
    let client = reqwest::Client::new();
    let response = client
        .get(METADATA_PROJECT_URL)
        .header("Metadata-Flavor", "Google")
        .timeout(Duration::from_secs(2))
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
        Ok(resp) => {
            warn!(status = %resp.status(), "metadata server returned non-success for project-id lookup");
            None
        }
        Err(e) => {
            warn!(error = %e, "metadata server not reachable for project-id auto-detection");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_ten_times_interval() {
        let mut config = test_config();
        config.interval_time = 60;
        assert_eq!(config.ttl(), Duration::from_secs(600));
    }

    #[test]
    fn metrics_info_contains_expected_keys() {
        let config = test_config();
        let info = config.as_metrics_info();
        assert_eq!(info.get("gcp_project_id").map(|s| s.as_str()), Some("test-project"));
        assert_eq!(info.get("dry_run").map(|s| s.as_str()), Some("false"));
    }

    fn test_config() -> Config {
        Config {
            interval_time: 60,
            scale_above_percent: 80,
            scale_after_intervals: 5,
            scale_up_percent: 20,
            scale_up_min_increment: 1_000_000_000,
            scale_up_max_increment: 16_000_000_000_000,
            scale_up_max_size: 16_000_000_000_000,
            scale_cooldown_time: 22_200,
            gcp_project_id: "test-project".to_string(),
            gmp_label_match: String::new(),
            http_timeout: Duration::from_secs(15),
            dry_run: false,
            verbose: false,
            slack_webhook_url: None,
            slack_channel: "#alerts".to_string(),
            slack_message_prefix: None,
            slack_message_suffix: None,
        }
    }
}
