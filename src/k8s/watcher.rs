//! Pod watcher that feeds delete notifications into the [`PodDeleteBridge`].
//!
//! The watcher stream reports deletes it observes directly. When the watch
//! connection is lost and later re-established, the watcher re-lists all pods
//! instead; pods deleted in between never produce a delete event. Those are
//! detected here by comparing the re-listed pods with the ones known before,
//! and reported as [`DeleteNotification::FinalStateUnknown`].

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use futures::StreamExt;
use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
    Api, Client,
    runtime::{WatchStreamExt, watcher},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    k8s::{
        K8sError,
        bridge::{DeleteNotification, DeletedObject, PodDeleteBridge, pod_identity},
        opts::K8sOptions,
    },
    metrics::cleanup::PodIdentity,
};

/// Remembers which pods exist so that deletes missed during a re-list can still
/// be reported.
///
/// Only identities are kept; a missed delete is reported with a pod that
/// carries nothing but its name and namespace.
#[derive(Default)]
pub struct PodDeleteTracker {
    known: DashSet<PodIdentity>,
    relisted: DashSet<PodIdentity>,
    relisting: AtomicBool,
}

impl PodDeleteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pods currently known to exist.
    pub fn known_pods(&self) -> usize {
        self.known.len()
    }

    /// Applies one watcher event and returns the delete notifications it implies.
    pub fn observe(&self, event: watcher::Event<Pod>) -> Vec<DeleteNotification> {
        match event {
            watcher::Event::Apply(pod) | watcher::Event::InitApply(pod) => {
                if let Some(identity) = pod_identity(&pod) {
                    if self.relisting.load(Ordering::Relaxed) {
                        self.relisted.insert(identity.clone());
                    }
                    self.known.insert(identity);
                }
                Vec::new()
            }
            watcher::Event::Delete(pod) => {
                if let Some(identity) = pod_identity(&pod) {
                    self.known.remove(&identity);
                    self.relisted.remove(&identity);
                }
                vec![DeleteNotification::Deleted(DeletedObject::Pod(Box::new(pod)))]
            }
            watcher::Event::Init => {
                self.relisted.clear();
                self.relisting.store(true, Ordering::Relaxed);
                Vec::new()
            }
            watcher::Event::InitDone => {
                self.relisting.store(false, Ordering::Relaxed);
                let mut missed = Vec::new();
                self.known.retain(|identity| {
                    if self.relisted.contains(identity) {
                        true
                    } else {
                        missed.push(DeleteNotification::FinalStateUnknown {
                            key: identity.to_string(),
                            object: DeletedObject::Pod(Box::new(identity_pod(identity))),
                        });
                        false
                    }
                });
                self.relisted.clear();
                missed
            }
        }
    }
}

fn identity_pod(identity: &PodIdentity) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(identity.namespace.clone()),
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}

/// Creates a client from the in-cluster or kubeconfig environment.
pub async fn client() -> Result<Client, K8sError> {
    Client::try_default()
        .await
        .map_err(K8sError::client_initialization)
}

/// Watches pods and hands every delete to `bridge` until `shutdown_rx` fires.
///
/// Watch errors are retried with the watcher's default backoff.
pub async fn run_pod_delete_watcher(
    client: Client,
    options: K8sOptions,
    bridge: PodDeleteBridge,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let api: Api<Pod> = Api::all(client);
    let mut config = watcher::Config::default();
    if let Some(node_name) = &options.node_name {
        config = config.fields(&format!("spec.nodeName={node_name}"));
    }

    info!(
        event.name = "k8s.watcher.starting",
        k8s.resource.name = "Pod",
        k8s.node.name = ?options.node_name,
        "starting pod delete watcher"
    );

    let tracker = PodDeleteTracker::new();
    let mut stream = watcher(api, config).default_backoff().boxed();

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    for notification in tracker.observe(event) {
                        if let DeleteNotification::FinalStateUnknown { key, .. } = &notification {
                            debug!(
                                event.name = "k8s.watcher.missed_delete",
                                k8s.pod.key = %key,
                                "pod disappeared while the watch was disconnected"
                            );
                        }
                        bridge.handle(notification);
                    }
                }
                Some(Err(e)) => {
                    warn!(
                        event.name = "k8s.watcher.error",
                        error.message = %e,
                        k8s.resource.name = "Pod",
                        "pod watcher error, will retry"
                    );
                }
                None => {
                    warn!(
                        event.name = "k8s.watcher.stream_ended",
                        k8s.resource.name = "Pod",
                        "pod watch stream ended"
                    );
                    break;
                }
            },
            _ = shutdown_rx.recv() => {
                debug!(
                    event.name = "k8s.watcher.shutdown",
                    known_pods = tracker.known_pods(),
                    "pod delete watcher shutting down"
                );
                break;
            }
        }
    }
}
