use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nswatch::config::Config;
use nswatch::event::ResourceKind;
use nswatch::k8s::client;
use nswatch::k8s::watcher::WatchManager;
use nswatch::pipeline::Pipeline;
use nswatch::reload::ConfigWatcher;

/// Buffer between the watch loops and the event processor.
const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!(namespace = %config.namespace, "starting nswatch");

    let pipeline = Pipeline::new(&config).await?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let processor = pipeline.spawn_event_processor(event_rx);

    let client = client::new(None).await?;
    let kinds: Vec<ResourceKind> = config.resources.iter().map(|r| r.kind).collect();
    let watch_shutdown =
        WatchManager::new(client, config.namespace.clone(), kinds, event_tx).start();

    let mut config_watcher = ConfigWatcher::new(&args.config);
    {
        let pipeline = pipeline.clone();
        config_watcher.add_callback(move |new_config| {
            let pipeline = pipeline.clone();
            Box::pin(async move { pipeline.rebuild(&new_config).await })
        });
    }
    let reload_shutdown = config_watcher.start();

    shutdown_signal().await;
    info!("received shutdown signal, stopping");

    // Stop intake first, drain what is in flight, then flush and stop the
    // pipeline's own workers.
    let _ = watch_shutdown.send(true);
    let _ = reload_shutdown.send(true);
    if tokio::time::timeout(std::time::Duration::from_secs(5), processor)
        .await
        .is_err()
    {
        warn!("event processor did not drain in time");
    }
    pipeline.shutdown().await;

    info!("nswatch stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            error!(error = %err, "failed to register SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
