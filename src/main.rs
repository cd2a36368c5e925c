use clap::Parser;
use podmetrics::{
    k8s::watcher::{client, run_pod_delete_watcher},
    metrics::{context, server::start_metrics_server},
    runtime::{cli::Cli, conf::Conf, logging::init_tracing},
};
use tokio::{signal, sync::broadcast};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (conf, _cli) = Conf::new(Cli::parse())?;
    init_tracing(conf.log_level);

    info!(
        event.name = "podmetrics.starting",
        config.path = ?conf.config_path,
        "starting podmetrics"
    );

    let ctx = context::init_global(&conf.metrics)?;
    info!(
        event.name = "metrics.cleanup.configured",
        pod_delete_delay = %humantime::format_duration(ctx.pod_delete_delay()),
        label_filter = ?conf.metrics.label_filter,
        "pod metric cleanup configured"
    );
    let worker = tokio::spawn(ctx.cleanup_worker().run());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let watcher = if conf.k8s.enabled {
        let client = client().await?;
        Some(tokio::spawn(run_pod_delete_watcher(
            client,
            conf.k8s.clone(),
            ctx.pod_delete_bridge(),
            shutdown_tx.subscribe(),
        )))
    } else {
        info!(
            event.name = "k8s.watcher.disabled",
            "pod delete watcher is disabled, series of deleted pods will not be removed"
        );
        None
    };

    let registry = ctx.registry().clone();
    let metrics_conf = conf.metrics.clone();
    let server_shutdown_rx = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_conf, registry, server_shutdown_rx).await {
            error!(
                event.name = "metrics.server_failed",
                error.message = %e,
                "metrics server stopped"
            );
        }
    });

    signal::ctrl_c().await?;
    info!(event.name = "podmetrics.shutdown", "shutdown signal received");

    let _ = shutdown_tx.send(());
    ctx.shutdown();

    if let Some(watcher) = watcher {
        watcher.await?;
    }
    worker.await?;
    server.await?;

    Ok(())
}
