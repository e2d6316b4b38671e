//! Metric source client: queries Google Managed Prometheus for per-PVC
//! disk and inode pressure and joins the two series.
//!
//! The `PromResponse`/`PromData`/`PromResult` deserialization shape and
//! `reqwest::Client` query idiom match this codebase's other Prometheus
//! readers; the base URL, bearer-token refresh, and the two exact PromQL
//! templates are grounded in `gmp_client.py`/`fetch_pvcs_from_gmp` in the
//! Python reference implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;

const TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Clone)]
pub struct Observation {
    pub namespace: String,
    pub claim: String,
    pub disk_used_percent: i64,
    pub inode_used_percent: i64,
}

impl Observation {
    pub fn key(&self) -> String {
        format!("{}.{}", self.namespace, self.claim)
    }
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch_observations(&self, label_match: &str) -> Result<Vec<Observation>, Error>;

    /// Cheap reachability probe, run once at startup. Mirrors
    /// `GMPClient.test_connection`'s `up` query in the Python reference
    /// implementation.
    async fn test_connection(&self) -> Result<(), Error>;
}

#[async_trait]
trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, Error>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

struct MetadataServerTokenSource {
    client: reqwest::Client,
}

#[async_trait]
impl TokenSource for MetadataServerTokenSource {
    async fn token(&self) -> Result<String, Error> {
        let resp = self
            .client
            .get(TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| Error::MetricQuery(format!("token refresh request failed: {e}")))?;

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::MetricQuery(format!("token refresh response malformed: {e}")))?;

        Ok(parsed.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    data: Option<PromData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    result: Vec<PromResult>,
}

#[derive(Debug, Deserialize)]
struct PromResult {
    metric: HashMap<String, String>,
    value: (f64, String),
}

pub struct GmpClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    token_source: Box<dyn TokenSource>,
}

impl GmpClient {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::new();
        Self {
            base_url: format!(
                "https://monitoring.googleapis.com/v1/projects/{}/location/global/prometheus/api/v1",
                config.gcp_project_id
            ),
            timeout: config.http_timeout,
            token_source: Box::new(MetadataServerTokenSource { client: client.clone() }),
            client,
        }
    }

    async fn query_instant(&self, promql: &str) -> Result<Vec<PromResult>, Error> {
        let token = self.token_source.token().await?;
        let url = format!("{}/query", self.base_url);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("query", promql)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::MetricQuery(format!("GMP query request failed: {e}")))?;

        let parsed: PromResponse = resp
            .json()
            .await
            .map_err(|e| Error::MetricQuery(format!("GMP query response malformed: {e}")))?;

        if parsed.status != "success" {
            return Err(Error::MetricQuery(
                parsed.error.unwrap_or_else(|| "unknown GMP query error".to_string()),
            ));
        }

        Ok(parsed.data.map(|d| d.result).unwrap_or_default())
    }
}

fn disk_query(label_match: &str) -> String {
    format!(
        "ceil((1 - kubelet_volume_stats_available_bytes{{ {labels} }} / kubelet_volume_stats_capacity_bytes)*100)",
        labels = label_match,
    )
}

fn inode_query(label_match: &str) -> String {
    format!(
        "ceil((1 - kubelet_volume_stats_inodes_free{{ {labels} }} / kubelet_volume_stats_inodes)*100)",
        labels = label_match,
    )
}

/// Join key for correlating disk and inode series: `namespace + "." +
/// persistentvolumeclaim`, matching the `namespace_claim` key the
/// reconciler uses to index its own inventory.
fn join_key(metric: &HashMap<String, String>) -> Option<(String, String)> {
    let namespace = metric.get("namespace").cloned()?;
    let claim = metric.get("persistentvolumeclaim").cloned()?;
    Some((namespace, claim))
}

fn value_as_i64(result: &PromResult) -> i64 {
    result.value.1.parse::<f64>().map(|v| v as i64).unwrap_or(-1)
}

#[async_trait]
impl MetricSource for GmpClient {
    async fn fetch_observations(&self, label_match: &str) -> Result<Vec<Observation>, Error> {
        let disk_results = self.query_instant(&disk_query(label_match)).await?;

        let mut inode_by_key: HashMap<(String, String), i64> = HashMap::new();
        match self.query_instant(&inode_query(label_match)).await {
            Ok(results) => {
                for r in &results {
                    if let Some(key) = join_key(&r.metric) {
                        inode_by_key.insert(key, value_as_i64(r));
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "inode metric query failed, continuing with disk-only observations");
            }
        }

        let mut observations = Vec::with_capacity(disk_results.len());
        for r in &disk_results {
            let Some((namespace, claim)) = join_key(&r.metric) else {
                continue;
            };
            let inode_used_percent = inode_by_key
                .get(&(namespace.clone(), claim.clone()))
                .copied()
                .unwrap_or(-1);

            observations.push(Observation {
                namespace,
                claim,
                disk_used_percent: value_as_i64(r),
                inode_used_percent,
            });
        }

        debug!(count = observations.len(), "fetched GMP observations");
        Ok(observations)
    }

    async fn test_connection(&self) -> Result<(), Error> {
        self.query_instant("up").await?;
        Ok(())
    }
}

#[cfg(test)]
pub struct FakeMetricSource {
    pub observations: Vec<Observation>,
}

#[cfg(test)]
#[async_trait]
impl MetricSource for FakeMetricSource {
    async fn fetch_observations(&self, _label_match: &str) -> Result<Vec<Observation>, Error> {
        Ok(self.observations.clone())
    }

    async fn test_connection(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_key_prefers_persistentvolumeclaim_label() {
        let mut metric = HashMap::new();
        metric.insert("namespace".to_string(), "ns".to_string());
        metric.insert("persistentvolumeclaim".to_string(), "data".to_string());
        assert_eq!(join_key(&metric), Some(("ns".to_string(), "data".to_string())));
    }

    #[test]
    fn join_key_missing_persistentvolumeclaim_is_none() {
        let mut metric = HashMap::new();
        metric.insert("namespace".to_string(), "ns".to_string());
        assert_eq!(join_key(&metric), None);
    }

    #[test]
    fn join_key_missing_namespace_is_none() {
        let metric = HashMap::new();
        assert_eq!(join_key(&metric), None);
    }

    #[test]
    fn disk_query_embeds_label_match_on_numerator_only() {
        let q = disk_query("job=\"kubelet\"");
        assert!(q.contains("kubelet_volume_stats_available_bytes{ job=\"kubelet\" }"));
        assert!(q.contains("/ kubelet_volume_stats_capacity_bytes)"));
    }
}
