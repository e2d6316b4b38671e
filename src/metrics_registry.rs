//! Prometheus metric registry served on the `/metrics` HTTP endpoint.
//!
//! Names and help text match `original_source/main.py`'s `METRICS` dict
//! exactly; the registration idiom (`lazy_static!` + `register_*!` macros,
//! `TextEncoder`-backed handler) follows the pack's `ccr-rust` example.

use actix_web::{get, HttpResponse, Responder};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_gauge, register_int_gauge, Counter, Encoder, Gauge, IntGauge, TextEncoder,
};

use crate::config::Config;

lazy_static! {
    static ref RESIZE_EVALUATED: Counter = register_counter!(
        "volume_autoscaler_resize_evaluated",
        "Counter which is increased every time we evaluate resizing PVCs"
    )
    .unwrap();

    static ref RESIZE_ATTEMPTED: Counter = register_counter!(
        "volume_autoscaler_resize_attempted",
        "Counter which is increased every time we attempt to resize"
    )
    .unwrap();

    static ref RESIZE_SUCCESSFUL: Counter = register_counter!(
        "volume_autoscaler_resize_successful",
        "Counter which is increased every time we successfully resize"
    )
    .unwrap();

    static ref RESIZE_FAILURE: Counter = register_counter!(
        "volume_autoscaler_resize_failure",
        "Counter which is increased every time we fail to resize"
    )
    .unwrap();

    static ref NUM_VALID_PVCS: IntGauge = register_int_gauge!(
        "volume_autoscaler_num_valid_pvcs",
        "Gauge with the number of valid PVCs detected which we found to consider for scaling"
    )
    .unwrap();

    static ref NUM_ABOVE_THRESHOLD: IntGauge = register_int_gauge!(
        "volume_autoscaler_num_pvcs_above_threshold",
        "Gauge with the number of PVCs detected above the desired percentage threshold"
    )
    .unwrap();

    static ref NUM_BELOW_THRESHOLD: IntGauge = register_int_gauge!(
        "volume_autoscaler_num_pvcs_below_threshold",
        "Gauge with the number of PVCs detected below the desired percentage threshold"
    )
    .unwrap();

    // Used only as a stable handle so the `Info`-style text exposition below
    // has a registered metric to attach help text to.
    static ref RELEASE_INFO: Gauge = register_gauge!(
        "volume_autoscaler_release_info",
        "Release/version information about this volume autoscaler service; value is always 1"
    )
    .unwrap();
}

pub struct MetricsHandles;

impl MetricsHandles {
    pub fn reset_threshold_gauges() {
        NUM_ABOVE_THRESHOLD.set(0);
        NUM_BELOW_THRESHOLD.set(0);
    }

    pub fn set_valid_pvcs(count: i64) {
        NUM_VALID_PVCS.set(count);
    }

    pub fn inc_above_threshold() {
        NUM_ABOVE_THRESHOLD.inc();
    }

    pub fn inc_below_threshold() {
        NUM_BELOW_THRESHOLD.inc();
    }

    pub fn inc_evaluated() {
        RESIZE_EVALUATED.inc();
    }

    pub fn inc_attempted() {
        RESIZE_ATTEMPTED.inc();
    }

    pub fn inc_successful() {
        RESIZE_SUCCESSFUL.inc();
    }

    pub fn inc_failure() {
        RESIZE_FAILURE.inc();
    }

    pub fn mark_release_info() {
        RELEASE_INFO.set(1.0);
    }
}

#[get("/metrics")]
pub async fn metrics_handler(config: actix_web::web::Data<Config>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode prometheus metrics");
        return HttpResponse::InternalServerError().finish();
    }

    let mut text = String::from_utf8(buffer).unwrap_or_default();
    text.push_str(&render_info_block(
        "volume_autoscaler_release",
        "Release/version information about this volume autoscaler service",
        &[("version", env!("CARGO_PKG_VERSION"))],
    ));
    text.push_str(&settings_info_block(&config));

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(text)
}

/// Renders a Prometheus `Info`-style metric line by hand: `prometheus` (the
/// Rust crate) has no first-class Info metric type, so the
/// `name_info{labels...} 1` exposition format is produced directly, matching
/// what `prometheus_client`'s `Info` type emits on the Python side.
pub fn render_info_block(name: &str, help: &str, labels: &[(&str, &str)]) -> String {
    let label_str = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "# HELP {name}_info {help}\n# TYPE {name}_info gauge\n{name}_info{{{labels}}} 1\n",
        name = name,
        help = help,
        labels = label_str
    )
}

pub fn settings_info_block(config: &Config) -> String {
    let settings = config.as_metrics_info();
    let labels: Vec<(&str, &str)> = settings.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    render_info_block(
        "volume_autoscaler_settings",
        "Settings currently used in this service",
        &labels,
    )
}

#[get("/healthz")]
pub async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_block_renders_labels() {
        let block = render_info_block("foo", "help text", &[("a", "1"), ("b", "2")]);
        assert!(block.contains("foo_info{a=\"1\",b=\"2\"} 1"));
        assert!(block.contains("# HELP foo_info help text"));
    }
}
