//! Drain policies for evicted pods.
//!
//! A policy decision is pure: it looks only at the evicted pod's labels and
//! the process configuration, so it can be tested without a cluster.

use std::collections::BTreeMap;

use crate::config::Config;

/// Pod label consulted to classify the evicted pod
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/name";
/// Label value identifying Kafka broker pods
pub const KAFKA_COMPONENT: &str = "kafka";
/// Label value identifying ZooKeeper pods
pub const ZOOKEEPER_COMPONENT: &str = "zookeeper";

/// What to do with an eviction request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainDecision {
    /// Not a managed broker pod, or draining is disabled for its component;
    /// admit the eviction untouched
    Allow,
    /// Mark the pod for a rolling update and admit the eviction
    Drain,
    /// Mark the pod for a rolling update and deny the eviction so the
    /// operator rolls the pod instead
    DrainAndDeny,
}

impl DrainDecision {
    /// Whether the pod should be marked for a rolling update
    pub fn drains(self) -> bool {
        !matches!(self, DrainDecision::Allow)
    }

    /// Whether the eviction itself is denied
    pub fn denies(self) -> bool {
        matches!(self, DrainDecision::DrainAndDeny)
    }
}

/// Context for a drain decision
pub struct DrainContext<'a> {
    /// Labels of the evicted pod
    pub labels: &'a BTreeMap<String, String>,
    /// Whether Kafka broker pods are drained
    pub drain_kafka: bool,
    /// Whether ZooKeeper pods are drained
    pub drain_zookeeper: bool,
    /// Whether evictions of drained pods are denied
    pub deny_eviction: bool,
}

impl<'a> DrainContext<'a> {
    pub fn new(labels: &'a BTreeMap<String, String>, config: &Config) -> Self {
        Self {
            labels,
            drain_kafka: config.drain_kafka,
            drain_zookeeper: config.drain_zookeeper,
            deny_eviction: config.deny_eviction,
        }
    }
}

/// Decide how to treat the eviction of a pod with the given labels.
pub fn evaluate(ctx: &DrainContext<'_>) -> DrainDecision {
    let managed = match ctx.labels.get(COMPONENT_LABEL).map(String::as_str) {
        Some(KAFKA_COMPONENT) => ctx.drain_kafka,
        Some(ZOOKEEPER_COMPONENT) => ctx.drain_zookeeper,
        _ => false,
    };
    if !managed {
        return DrainDecision::Allow;
    }
    if ctx.deny_eviction {
        DrainDecision::DrainAndDeny
    } else {
        DrainDecision::Drain
    }
}
