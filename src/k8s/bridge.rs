//! Turns pod delete notifications into scheduled metric evictions.

use std::{sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use prometheus::IntGauge;
use tracing::trace;

use crate::metrics::{cleanup::PodIdentity, queue::DelayedEvictionQueue};

/// The object carried by a delete notification.
#[derive(Clone, Debug)]
pub enum DeletedObject {
    Pod(Box<Pod>),
    /// Anything that is not a pod.
    Other { kind: String },
}

/// A delete notification from the cluster watch.
#[derive(Clone, Debug)]
pub enum DeleteNotification {
    /// The watch observed the delete itself.
    Deleted(DeletedObject),
    /// The watch missed the delete (for example across a lost connection) and
    /// only noticed the object was gone on re-list. `object` is the last state
    /// that was known for `key`.
    FinalStateUnknown { key: String, object: DeletedObject },
}

/// Extracts the identity of `pod`, if it has a name.
pub fn pod_identity(pod: &Pod) -> Option<PodIdentity> {
    let name = pod.metadata.name.clone()?;
    Some(PodIdentity {
        namespace: pod.namespace().unwrap_or_default(),
        name,
    })
}

/// Schedules metric eviction for deleted pods after a grace delay.
///
/// The delay keeps the pod's final values around for scrapes that are still in
/// flight when it goes away.
#[derive(Clone)]
pub struct PodDeleteBridge {
    queue: Arc<DelayedEvictionQueue<PodIdentity>>,
    grace_delay: Duration,
    pending: Option<IntGauge>,
}

impl PodDeleteBridge {
    pub fn new(queue: Arc<DelayedEvictionQueue<PodIdentity>>, grace_delay: Duration) -> Self {
        Self {
            queue,
            grace_delay,
            pending: None,
        }
    }

    /// Keeps `gauge` set to the number of pods waiting for eviction.
    pub fn with_pending_gauge(mut self, gauge: IntGauge) -> Self {
        self.pending = Some(gauge);
        self
    }

    /// Returns true if an eviction was scheduled.
    ///
    /// Notifications that do not carry a pod are dropped. A pod that is
    /// already waiting for eviction is not scheduled twice.
    pub fn handle(&self, notification: DeleteNotification) -> bool {
        let pod = match notification {
            DeleteNotification::Deleted(DeletedObject::Pod(pod)) => pod,
            DeleteNotification::FinalStateUnknown {
                object: DeletedObject::Pod(pod),
                ..
            } => pod,
            DeleteNotification::Deleted(DeletedObject::Other { .. })
            | DeleteNotification::FinalStateUnknown {
                object: DeletedObject::Other { .. },
                ..
            } => return false,
        };

        let Some(identity) = pod_identity(&pod) else {
            return false;
        };

        let scheduled = self.queue.add_after(identity.clone(), self.grace_delay);
        if let Some(pending) = &self.pending {
            pending.set(self.queue.len() as i64);
        }
        trace!(
            event.name = "k8s.pod_delete.scheduled",
            k8s.pod.name = %identity.name,
            k8s.namespace.name = %identity.namespace,
            scheduled,
            delay_seconds = self.grace_delay.as_secs(),
            "scheduled metric eviction for deleted pod"
        );
        scheduled
    }
}
