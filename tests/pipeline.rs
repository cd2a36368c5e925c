use std::time::Duration;

use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use podmetrics::{
    k8s::{DeleteNotification, DeletedObject},
    metrics::{MetricsContext, opts::MetricsOptions},
};
use prometheus::{Opts, core::Collector};
use tokio::time::{sleep, timeout};

fn pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}

fn series(collector: &impl Collector) -> Vec<Vec<(String, String)>> {
    collector
        .collect()
        .iter()
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| {
            metric
                .get_label()
                .iter()
                .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                .collect()
        })
        .collect()
}

fn context(delay: Duration, label_filter: &[&str]) -> MetricsContext {
    MetricsContext::new(&MetricsOptions {
        pod_delete_delay: delay,
        label_filter: label_filter.iter().map(|s| s.to_string()).collect(),
        ..MetricsOptions::default()
    })
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn deleted_pod_series_are_evicted_after_grace_delay() {
    let ctx = context(Duration::from_secs(60), &["namespace", "workload", "pod", "binary"]);
    let requests = ctx
        .new_int_counter_vec_with_pod(Opts::new("requests_total", "Requests"), &["pod", "namespace", "verb"])
        .unwrap();
    requests.with_label_values(&["X", "Y", "get"]).inc();
    requests.with_label_values(&["Z", "Y", "get"]).inc();

    let worker = tokio::spawn(ctx.cleanup_worker().run());
    let bridge = ctx.pod_delete_bridge();

    assert!(bridge.handle(DeleteNotification::Deleted(DeletedObject::Pod(Box::new(pod("Y", "X"))))));

    // Still exported during the grace delay.
    sleep(Duration::from_secs(30)).await;
    assert_eq!(series(&requests).len(), 2);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(
        series(&requests),
        vec![vec![
            ("namespace".to_string(), "Y".to_string()),
            ("pod".to_string(), "Z".to_string()),
            ("verb".to_string(), "get".to_string()),
        ]]
    );

    ctx.shutdown();
    timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn missed_delete_evicts_granular_series() {
    let ctx = context(Duration::from_secs(5), &["namespace", "pod"]);
    let execs = ctx
        .granular_counter(Opts::new("execs_total", "Executions"), &["verb"])
        .unwrap();
    let counter = execs.counter().unwrap();
    // verb, namespace, pod once workload and binary are filtered out.
    counter.with_label_values(&["exec", "default", "web-0"]).inc();
    counter.with_label_values(&["exec", "default", "web-1"]).inc();

    let worker = tokio::spawn(ctx.cleanup_worker().run());
    let bridge = ctx.pod_delete_bridge();

    assert!(bridge.handle(DeleteNotification::FinalStateUnknown {
        key: "default/web-0".to_string(),
        object: DeletedObject::Pod(Box::new(pod("default", "web-0"))),
    }));
    assert!(!bridge.handle(DeleteNotification::Deleted(DeletedObject::Other {
        kind: "Service".to_string(),
    })));

    sleep(Duration::from_secs(6)).await;

    let remaining = series(&counter);
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].contains(&("pod".to_string(), "web-1".to_string())));
    assert!(
        ctx.registry()
            .gather()
            .iter()
            .any(|family| family.get_name() == "podmetrics_cleanup_evictions_total")
    );

    ctx.shutdown();
    timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();
}
