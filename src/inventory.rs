//! PVC inventory adapter: list PVCs, flatten to policy+state records with
//! annotation overrides, and patch sizes.
//!
//! Uses the same `Api::all` + metadata traversal idiom as other PVC
//! readers in this codebase, with annotation keys and patch-verification
//! tolerance matched against a Python reference implementation
//! (`convert_pvc_to_simpler_dict`/`describe_all_pvcs`/`scale_up_pvc`/
//! `describe_pvc`).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, PersistentVolumeClaim};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::events::{build_event, InvolvedPvc};
use crate::quantity::parse_quantity;

pub const ANNOTATION_PREFIX: &str = "volume.autoscaler.kubernetes.io/";

/// Per-PVC policy, defaulted from [`Config`] and overridable by annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub scale_above_percent: i64,
    pub scale_after_intervals: u32,
    pub scale_up_percent: i64,
    pub scale_up_min_increment: i64,
    pub scale_up_max_increment: i64,
    pub scale_up_max_size: i64,
    pub scale_cooldown_time: i64,
    pub last_resized_at: i64,
    pub ignore: bool,
}

#[derive(Debug, Clone)]
pub struct PvcRecord {
    pub namespace: String,
    pub name: String,
    pub resource_version: String,
    pub uid: String,
    pub spec_size_bytes: i64,
    pub status_size_bytes: i64,
    pub storage_class: String,
    pub policy: Policy,
    /// Injected by the reconciler after joining with metric observations.
    /// -1 means "unknown".
    pub volume_used_percent: i64,
    pub volume_used_inode_percent: i64,
}

impl PvcRecord {
    pub fn key(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn scale_policy(&self) -> crate::scale::ScalePolicy {
        crate::scale::ScalePolicy {
            scale_up_percent: self.policy.scale_up_percent,
            min_increment: self.policy.scale_up_min_increment,
            max_increment: self.policy.scale_up_max_increment,
            max_size: self.policy.scale_up_max_size,
        }
    }
}

#[async_trait]
pub trait KubeInventory: Send + Sync {
    async fn list_all(&self) -> Result<HashMap<String, PvcRecord>, Error>;
    async fn patch_size(&self, namespace: &str, name: &str, new_bytes: i64) -> Result<PvcRecord, Error>;
    async fn emit_event(
        &self,
        namespace: &str,
        name: &str,
        reason: &str,
        message: &str,
        event_type: &str,
    ) -> Result<(), Error>;
}

pub struct KubeClientInventory {
    client: Client,
    defaults: Policy,
    http_timeout: Duration,
}

impl KubeClientInventory {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            defaults: Policy {
                scale_above_percent: config.scale_above_percent,
                scale_after_intervals: config.scale_after_intervals,
                scale_up_percent: config.scale_up_percent,
                scale_up_min_increment: config.scale_up_min_increment,
                scale_up_max_increment: config.scale_up_max_increment,
                scale_up_max_size: config.scale_up_max_size,
                scale_cooldown_time: config.scale_cooldown_time,
                last_resized_at: 0,
                ignore: false,
            },
            http_timeout: config.http_timeout,
        }
    }

    fn pvc_api(&self) -> Api<PersistentVolumeClaim> {
        Api::all(self.client.clone())
    }

    fn event_api(&self) -> Api<Event> {
        Api::all(self.client.clone())
    }

    fn flatten(&self, pvc: &PersistentVolumeClaim) -> PvcRecord {
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        let name = pvc.metadata.name.clone().unwrap_or_default();

        let spec_size = pvc
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|m| m.get("storage"))
            .map(|q| q.0.clone())
            .unwrap_or_else(|| "0".to_string());

        let status_size = pvc
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|m| m.get("storage"))
            .map(|q| q.0.clone())
            .unwrap_or_else(|| "0".to_string());

        let storage_class = pvc
            .spec
            .as_ref()
            .and_then(|s| s.storage_class_name.clone())
            .unwrap_or_default();

        let mut policy = self.defaults;
        if let Some(annotations) = pvc.metadata.annotations.as_ref() {
            apply_annotation_overrides(annotations, &namespace, &name, &mut policy);
        }

        PvcRecord {
            namespace: namespace.clone(),
            name: name.clone(),
            resource_version: pvc.metadata.resource_version.clone().unwrap_or_default(),
            uid: pvc.metadata.uid.clone().unwrap_or_default(),
            spec_size_bytes: parse_quantity(&spec_size).unwrap_or(0),
            status_size_bytes: parse_quantity(&status_size).unwrap_or(0),
            storage_class,
            policy,
            volume_used_percent: -1,
            volume_used_inode_percent: -1,
        }
    }
}

fn apply_annotation_overrides(
    annotations: &std::collections::BTreeMap<String, String>,
    namespace: &str,
    name: &str,
    policy: &mut Policy,
) {
    parse_override(annotations, namespace, name, "last-resized-at", &mut policy.last_resized_at);
    parse_override(annotations, namespace, name, "scale-above-percent", &mut policy.scale_above_percent);
    parse_override_u32(annotations, namespace, name, "scale-after-intervals", &mut policy.scale_after_intervals);
    parse_override(annotations, namespace, name, "scale-up-percent", &mut policy.scale_up_percent);
    parse_override(annotations, namespace, name, "scale-up-min-increment", &mut policy.scale_up_min_increment);
    parse_override(annotations, namespace, name, "scale-up-max-increment", &mut policy.scale_up_max_increment);
    parse_override(annotations, namespace, name, "scale-up-max-size", &mut policy.scale_up_max_size);
    parse_override(annotations, namespace, name, "scale-cooldown-time", &mut policy.scale_cooldown_time);

    if let Some(raw) = annotations.get(&format!("{}ignore", ANNOTATION_PREFIX)) {
        policy.ignore = raw.eq_ignore_ascii_case("true");
    }
}

fn parse_override(
    annotations: &std::collections::BTreeMap<String, String>,
    namespace: &str,
    name: &str,
    field: &str,
    target: &mut i64,
) {
    let key = format!("{}{}", ANNOTATION_PREFIX, field);
    if let Some(raw) = annotations.get(&key) {
        match raw.parse::<i64>() {
            Ok(value) => *target = value,
            Err(_) => warn!(namespace, name, field, raw, "could not parse annotation override, keeping default"),
        }
    }
}

fn parse_override_u32(
    annotations: &std::collections::BTreeMap<String, String>,
    namespace: &str,
    name: &str,
    field: &str,
    target: &mut u32,
) {
    let key = format!("{}{}", ANNOTATION_PREFIX, field);
    if let Some(raw) = annotations.get(&key) {
        match raw.parse::<u32>() {
            Ok(value) => *target = value,
            Err(_) => warn!(namespace, name, field, raw, "could not parse annotation override, keeping default"),
        }
    }
}

#[async_trait]
impl KubeInventory for KubeClientInventory {
    async fn list_all(&self) -> Result<HashMap<String, PvcRecord>, Error> {
        let pvcs = tokio::time::timeout(self.http_timeout, self.pvc_api().list(&ListParams::default()))
            .await
            .map_err(|_| Error::InventoryList("request timed out".to_string()))?
            .map_err(|e| Error::InventoryList(e.to_string()))?;

        let mut out = HashMap::with_capacity(pvcs.items.len());
        for pvc in &pvcs.items {
            let record = self.flatten(pvc);
            out.insert(record.key(), record);
        }
        debug!(count = out.len(), "listed PVC inventory");
        Ok(out)
    }

    async fn patch_size(&self, namespace: &str, name: &str, new_bytes: i64) -> Result<PvcRecord, Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let last_resized_key = format!("{}last-resized-at", ANNOTATION_PREFIX);
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    (last_resized_key): now.to_string(),
                }
            },
            "spec": {
                "resources": {
                    "requests": {
                        "storage": new_bytes.to_string(),
                    }
                }
            }
        });

        let patched = tokio::time::timeout(
            self.http_timeout,
            self.pvc_api().patch(name, &PatchParams::apply("volume-autoscaler"), &Patch::Merge(&patch)),
        )
        .await
        .map_err(|_| Error::Patch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: "request timed out".to_string(),
        })?
        .map_err(|e| Error::Patch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let record = self.flatten(&patched);

        let diff = (record.spec_size_bytes - new_bytes).abs() as f64;
        if diff >= new_bytes as f64 * 0.1 {
            return Err(Error::Patch {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: format!(
                    "patched spec size {} not within 10% of requested {}",
                    record.spec_size_bytes, new_bytes
                ),
            });
        }

        Ok(record)
    }

    async fn emit_event(
        &self,
        namespace: &str,
        name: &str,
        reason: &str,
        message: &str,
        event_type: &str,
    ) -> Result<(), Error> {
        let described = self.describe_one(namespace, name).await?;

        let involved = InvolvedPvc {
            namespace,
            name,
            resource_version: &described.resource_version,
            uid: &described.uid,
        };
        let event = build_event(&involved, reason, message, event_type);

        tokio::time::timeout(self.http_timeout, self.event_api().create(&Default::default(), &event))
            .await
            .map_err(|_| Error::EventEmit {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: "request timed out".to_string(),
            })?
            .map_err(|e| Error::EventEmit {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

impl KubeClientInventory {
    /// Fetches the current PVC and flattens it, so event emission can
    /// attach an up-to-date `resource_version`/`uid` to the involved object.
    pub async fn describe_one(&self, namespace: &str, name: &str) -> Result<PvcRecord, Error> {
        let pvc = tokio::time::timeout(self.http_timeout, self.pvc_api().get(name))
            .await
            .map_err(|_| Error::EventEmit {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: "request timed out".to_string(),
            })?
            .map_err(|e| Error::EventEmit {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(self.flatten(&pvc))
    }
}
