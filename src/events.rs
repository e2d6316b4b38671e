//! Kubernetes Event construction. Pure builder, kept separate from the
//! `kube::Api` call site in `inventory.rs` so the involved-object shape and
//! naming can be unit tested without a cluster.
//!
//! Grounded on `send_kubernetes_event`/`get_involved_object_from_pvc` in
//! the Python reference implementation: source component
//! `volume-autoscaler`, a 16-character random hex name suffix for
//! uniqueness, `first_timestamp` set to now in UTC.

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, Time};
use rand::Rng;

pub const SOURCE_COMPONENT: &str = "volume-autoscaler";

pub struct InvolvedPvc<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub resource_version: &'a str,
    pub uid: &'a str,
}

pub fn build_event(pvc: &InvolvedPvc, reason: &str, message: &str, event_type: &str) -> Event {
    let involved_object = ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        namespace: Some(pvc.namespace.to_string()),
        name: Some(pvc.name.to_string()),
        resource_version: non_empty(pvc.resource_version),
        uid: non_empty(pvc.uid),
        ..Default::default()
    };

    let now = chrono::Utc::now();

    Event {
        metadata: ObjectMeta {
            namespace: Some(pvc.namespace.to_string()),
            name: Some(format!("{}{}", pvc.name, random_hex_suffix(16))),
            ..Default::default()
        },
        involved_object,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some(event_type.to_string()),
        source: Some(EventSource {
            component: Some(SOURCE_COMPONENT.to_string()),
            host: None,
        }),
        first_timestamp: Some(Time(now)),
        event_time: Some(MicroTime(now)),
        count: Some(1),
        ..Default::default()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn random_hex_suffix(len: usize) -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}
