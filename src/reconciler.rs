//! The core control loop: list PVCs, fetch utilization, walk the
//! alert/streak/cooldown/debounce state machine, and patch volumes that
//! need to grow.
//!
//! The per-PVC branch order and log texture are ported from the main loop
//! in the Python reference implementation; the outer run-loop checks the
//! shutdown latch at least once a second during the inter-tick sleep.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, ErrorAction};
use crate::gmp::MetricSource;
use crate::inventory::{KubeInventory, PvcRecord};
use crate::metrics_registry::MetricsHandles;
use crate::scale::{compute_target, ScaleOutcome};
use crate::shutdown::ShutdownLatch;
use crate::slack::{Severity, SlackNotifier};
use crate::ttl_cache::TtlCache;

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Completed { evaluated: usize },
    InventorySkipped,
    MetricsSkipped,
}

pub struct Reconciler<I: KubeInventory, M: MetricSource> {
    config: Config,
    inventory: I,
    metrics: M,
    slack: SlackNotifier,
    streaks: TtlCache<i64>,
    debounced: TtlCache<bool>,
    shutdown: ShutdownLatch,
}

impl<I: KubeInventory, M: MetricSource> Reconciler<I, M> {
    pub fn new(config: Config, inventory: I, metrics: M, shutdown: ShutdownLatch) -> Self {
        let ttl = config.ttl();
        let slack = SlackNotifier::from_config(&config);
        Self {
            config,
            inventory,
            metrics,
            slack,
            streaks: TtlCache::new(ttl),
            debounced: TtlCache::new(ttl),
            shutdown,
        }
    }

    pub async fn run(&mut self) {
        loop {
            self.tick().await;

            let mut slept = Duration::ZERO;
            let tick_interval = Duration::from_secs(self.config.interval_time);
            while slept < tick_interval {
                if self.shutdown.requested() {
                    info!("shutdown latch observed, exiting reconciler loop");
                    return;
                }
                let step = Duration::from_secs(1).min(tick_interval - slept);
                tokio::time::sleep(step).await;
                slept += step;
            }
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        MetricsHandles::inc_evaluated();

        let mut inventory = match self.inventory.list_all().await {
            Ok(inv) => inv,
            Err(e) => {
                self.handle_tick_error(&e, "failed to list PVC inventory").await;
                return TickOutcome::InventorySkipped;
            }
        };

        let observations = match self.metrics.fetch_observations(&self.config.gmp_label_match).await {
            Ok(obs) => obs,
            Err(e) => {
                self.handle_tick_error(&e, "failed to query metric source").await;
                return TickOutcome::MetricsSkipped;
            }
        };

        info!(count = observations.len(), "found valid PVCs to assess");
        MetricsHandles::set_valid_pvcs(observations.len() as i64);
        MetricsHandles::reset_threshold_gauges();

        for observation in &observations {
            let key = observation.key();

            let Some(record) = inventory.get_mut(&key) else {
                warn!(%key, "volume had metrics but was not found in Kubernetes; may be deleted or experiencing jitter");
                continue;
            };

            record.volume_used_percent = observation.disk_used_percent;
            record.volume_used_inode_percent = observation.inode_used_percent;

            if self.config.verbose {
                debug!(
                    %key,
                    disk_pct = record.volume_used_percent,
                    inode_pct = record.volume_used_inode_percent,
                    "evaluating volume"
                );
            }

            self.evaluate_one(&key, record).await;
        }

        TickOutcome::Completed { evaluated: observations.len() }
    }

    /// Dispatches a tick-level failure per [`Error::action`]. Only
    /// `RetryTick` and `Exit` are reachable here; `ContinueWithNext` is
    /// for per-PVC errors inside [`Self::evaluate_one`].
    async fn handle_tick_error(&self, e: &Error, context: &str) {
        match e.action() {
            ErrorAction::RetryTick(backoff) => {
                error!(error = %e, "{context}, skipping tick");
                tokio::time::sleep(backoff).await;
            }
            ErrorAction::Exit => {
                error!(error = %e, "{context}, unrecoverable, exiting");
                std::process::exit(1);
            }
            ErrorAction::ContinueWithNext => {
                warn!(error = %e, "{context}, continuing");
            }
        }
    }

    async fn evaluate_one(&mut self, key: &str, record: &mut PvcRecord) {
        let threshold = record.policy.scale_above_percent;

        if record.volume_used_percent < threshold && record.volume_used_inode_percent < threshold {
            MetricsHandles::inc_below_threshold();
            self.streaks.unset(key);
            debug!(%key, threshold, "below threshold");
            return;
        }
        MetricsHandles::inc_above_threshold();

        let streak = self.streaks.get(key).unwrap_or(0) + 1;
        self.streaks.set(key, streak);

        let because_inodes = record.volume_used_inode_percent >= threshold
            && record.volume_used_percent < threshold;
        info!(
            %key,
            streak,
            needed = record.policy.scale_after_intervals,
            because_inodes,
            "above threshold"
        );

        if streak < record.policy.scale_after_intervals as i64 {
            debug!(%key, streak, "still arming, waiting for more intervals");
            return;
        }

        let now = now_unix();
        if record.policy.last_resized_at + record.policy.scale_cooldown_time > now {
            let remaining = record.policy.last_resized_at + record.policy.scale_cooldown_time - now;
            info!(%key, remaining_seconds = remaining, "cooldown active, skipping");
            return;
        }

        let target = match compute_target(record.status_size_bytes, &record.scale_policy()) {
            ScaleOutcome::NoScale => {
                info!(%key, "already at maximum size, skipping");
                return;
            }
            ScaleOutcome::Target(bytes) => bytes,
        };

        if target < record.status_size_bytes {
            error!(
                %key,
                target,
                current = record.status_size_bytes,
                "scale calculator produced a target below current size, check SCALE_UP_MAX_SIZE"
            );
            return;
        }

        if record.policy.ignore {
            info!(%key, "ignore annotation set, skipping");
            return;
        }

        let debounce_key = format!("{key}-has-been-resized");
        if self.debounced.get(&debounce_key).unwrap_or(false) {
            info!(%key, "debouncing, resized within a recent interval");
            return;
        }

        if self.config.dry_run {
            info!(
                %key,
                from = %crate::quantity::render_quantity(record.status_size_bytes),
                to = %crate::quantity::render_quantity(target),
                "dry run, would have resized"
            );
            return;
        }

        MetricsHandles::inc_attempted();
        let alert_duration_seconds = streak as u64 * self.config.interval_time;
        let status_message = format!(
            "to scale up `{key}` by `{pct}%` from `{from}` to `{to}`, it was using more than `{threshold}%` disk or inode space over the last `{duration} seconds`",
            key = key,
            pct = record.policy.scale_up_percent,
            from = crate::quantity::render_quantity(record.status_size_bytes),
            to = crate::quantity::render_quantity(target),
            threshold = threshold,
            duration = alert_duration_seconds,
        );

        if let Err(e) = self
            .inventory
            .emit_event(
                &record.namespace,
                &record.name,
                "VolumeResizeRequested",
                &format!("Requesting {status_message}"),
                "Normal",
            )
            .await
        {
            warn!(%key, error = %e, "failed to emit VolumeResizeRequested event");
        }

        match self.inventory.patch_size(&record.namespace, &record.name, target).await {
            Ok(patched) => {
                MetricsHandles::inc_successful();
                self.debounced.set(&debounce_key, true);
                record.status_size_bytes = patched.status_size_bytes;
                record.policy.last_resized_at = now;
                info!(%key, "successfully requested {}", status_message);
                if self.slack.is_enabled() {
                    self.slack
                        .send(&format!("Successfully requested {status_message}"), Severity::Info)
                        .await;
                }
            }
            Err(e) => {
                MetricsHandles::inc_failure();
                let failure_message = format!("FAILED requesting {status_message}: {e}");
                error!(%key, error = %e, "{}", failure_message);
                if let Err(e) = self
                    .inventory
                    .emit_event(
                        &record.namespace,
                        &record.name,
                        "VolumeResizeRequestFailed",
                        &failure_message,
                        "Warning",
                    )
                    .await
                {
                    warn!(%key, error = %e, "failed to emit VolumeResizeRequestFailed event");
                }
                if self.slack.is_enabled() {
                    self.slack.send(&failure_message, Severity::Error).await;
                }
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmp::{FakeMetricSource, Observation};
    use crate::inventory::Policy;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeInventory {
        records: Mutex<HashMap<String, PvcRecord>>,
        patch_calls: Mutex<Vec<(String, String, i64)>>,
        events: Mutex<Vec<(String, String)>>,
        fail_patch: bool,
    }

    impl FakeInventory {
        fn new(records: Vec<PvcRecord>) -> Self {
            let map = records.into_iter().map(|r| (r.key(), r)).collect();
            Self {
                records: Mutex::new(map),
                patch_calls: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
                fail_patch: false,
            }
        }
    }

    #[async_trait]
    impl KubeInventory for FakeInventory {
        async fn list_all(&self) -> Result<HashMap<String, PvcRecord>, Error> {
            Ok(self.records.lock().unwrap().clone())
        }

        async fn patch_size(&self, namespace: &str, name: &str, new_bytes: i64) -> Result<PvcRecord, Error> {
            if self.fail_patch {
                return Err(Error::Patch {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    reason: "forced failure".to_string(),
                });
            }
            self.patch_calls.lock().unwrap().push((namespace.to_string(), name.to_string(), new_bytes));
            let mut records = self.records.lock().unwrap();
            let key = format!("{namespace}.{name}");
            let record = records.get_mut(&key).expect("record exists");
            record.status_size_bytes = new_bytes;
            record.spec_size_bytes = new_bytes;
            Ok(record.clone())
        }

        async fn emit_event(
            &self,
            namespace: &str,
            name: &str,
            reason: &str,
            _message: &str,
            _event_type: &str,
        ) -> Result<(), Error> {
            self.events.lock().unwrap().push((format!("{namespace}.{name}"), reason.to_string()));
            Ok(())
        }
    }

    fn base_policy() -> Policy {
        Policy {
            scale_above_percent: 80,
            scale_after_intervals: 5,
            scale_up_percent: 20,
            scale_up_min_increment: 1_000_000_000,
            scale_up_max_increment: 16_000_000_000_000,
            scale_up_max_size: 16_000_000_000_000,
            scale_cooldown_time: 22_200,
            last_resized_at: 0,
            ignore: false,
        }
    }

    fn base_record(namespace: &str, name: &str, size: i64, policy: Policy) -> PvcRecord {
        PvcRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource_version: "1".to_string(),
            uid: "uid-1".to_string(),
            spec_size_bytes: size,
            status_size_bytes: size,
            storage_class: "standard".to_string(),
            policy,
            volume_used_percent: -1,
            volume_used_inode_percent: -1,
        }
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
            gcp_project_id: "test".to_string(),
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

    #[tokio::test]
    async fn sustained_alert_triggers_exactly_one_resize() {
        let record = base_record("app", "data", 10_000_000_000, base_policy());
        let inventory = FakeInventory::new(vec![record]);
        let metrics = FakeMetricSource {
            observations: vec![Observation {
                namespace: "app".to_string(),
                claim: "data".to_string(),
                disk_used_percent: 90,
                inode_used_percent: -1,
            }],
        };
        let shutdown = crate::shutdown::ShutdownLatch::install();
        let mut reconciler = Reconciler::new(test_config(), inventory, metrics, shutdown);

        for _ in 0..5 {
            reconciler.tick().await;
        }

        let calls = reconciler.inventory.patch_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("app".to_string(), "data".to_string(), 12_000_000_000));
    }

    #[tokio::test]
    async fn ignore_annotation_blocks_resize() {
        let mut policy = base_policy();
        policy.ignore = true;
        let record = base_record("app", "data", 10_000_000_000, policy);
        let inventory = FakeInventory::new(vec![record]);
        let metrics = FakeMetricSource {
            observations: vec![Observation {
                namespace: "app".to_string(),
                claim: "data".to_string(),
                disk_used_percent: 95,
                inode_used_percent: -1,
            }],
        };
        let shutdown = crate::shutdown::ShutdownLatch::install();
        let mut reconciler = Reconciler::new(test_config(), inventory, metrics, shutdown);

        for _ in 0..10 {
            reconciler.tick().await;
        }

        assert!(reconciler.inventory.patch_calls.lock().unwrap().is_empty());
        assert!(reconciler.inventory.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn streak_resets_on_a_below_threshold_tick() {
        let record = base_record("app", "data", 10_000_000_000, base_policy());
        let inventory = FakeInventory::new(vec![record]);
        let metrics_high = FakeMetricSource {
            observations: vec![Observation {
                namespace: "app".to_string(),
                claim: "data".to_string(),
                disk_used_percent: 90,
                inode_used_percent: -1,
            }],
        };
        let shutdown = crate::shutdown::ShutdownLatch::install();
        let mut reconciler = Reconciler::new(test_config(), inventory, metrics_high, shutdown);

        reconciler.tick().await;
        reconciler.tick().await;
        assert_eq!(reconciler.streaks.get("app.data"), Some(2));

        reconciler.metrics.observations[0].disk_used_percent = 10;
        reconciler.tick().await;
        assert_eq!(reconciler.streaks.get("app.data"), None);
    }

    #[tokio::test]
    async fn observation_without_inventory_is_skipped_cleanly() {
        let inventory = FakeInventory::new(vec![]);
        let metrics = FakeMetricSource {
            observations: vec![Observation {
                namespace: "app".to_string(),
                claim: "ghost".to_string(),
                disk_used_percent: 95,
                inode_used_percent: -1,
            }],
        };
        let shutdown = crate::shutdown::ShutdownLatch::install();
        let mut reconciler = Reconciler::new(test_config(), inventory, metrics, shutdown);

        let outcome = reconciler.tick().await;
        assert_eq!(outcome, TickOutcome::Completed { evaluated: 1 });
        assert!(reconciler.inventory.patch_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inode_only_pressure_triggers_resize() {
        let record = base_record("app", "data", 10_000_000_000, base_policy());
        let inventory = FakeInventory::new(vec![record]);
        let metrics = FakeMetricSource {
            observations: vec![Observation {
                namespace: "app".to_string(),
                claim: "data".to_string(),
                disk_used_percent: 10,
                inode_used_percent: 95,
            }],
        };
        let shutdown = crate::shutdown::ShutdownLatch::install();
        let mut reconciler = Reconciler::new(test_config(), inventory, metrics, shutdown);

        for _ in 0..5 {
            reconciler.tick().await;
        }

        assert_eq!(reconciler.inventory.patch_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cooldown_blocks_resize_until_elapsed() {
        let mut policy = base_policy();
        policy.last_resized_at = now_unix() - 100;
        policy.scale_cooldown_time = 22_200;
        let record = base_record("app", "data", 10_000_000_000, policy);
        let inventory = FakeInventory::new(vec![record]);
        let metrics = FakeMetricSource {
            observations: vec![Observation {
                namespace: "app".to_string(),
                claim: "data".to_string(),
                disk_used_percent: 90,
                inode_used_percent: -1,
            }],
        };
        let shutdown = crate::shutdown::ShutdownLatch::install();
        let mut reconciler = Reconciler::new(test_config(), inventory, metrics, shutdown);

        for _ in 0..5 {
            reconciler.tick().await;
        }

        assert!(reconciler.inventory.patch_calls.lock().unwrap().is_empty());
    }
}
