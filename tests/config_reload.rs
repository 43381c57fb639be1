use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use nswatch::config::Config;
use nswatch::error::Result;
use nswatch::notify::{Notifier, SlackMessage};
use nswatch::pipeline::Pipeline;
use nswatch::reload::ConfigWatcher;

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _message: &SlackMessage) -> Result<()> {
        Ok(())
    }
}

fn write_file(path: &std::path::Path, content: &str) {
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

const BASE_CONFIG: &str = r"
namespace: default
resources:
  - kind: Pod
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
";

const DEDUP_CONFIG: &str = r"
namespace: default
resources:
  - kind: Pod
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
deduplication:
  enabled: true
  ttlSeconds: 60
";

#[tokio::test]
async fn test_file_rewrite_rebuilds_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    write_file(&path, BASE_CONFIG);

    let config = Config::load(&path).unwrap();
    let pipeline = Pipeline::with_notifier_factory(
        &config,
        Box::new(|_| Ok(Arc::new(NullNotifier) as Arc<dyn Notifier>)),
    )
    .await
    .unwrap();
    assert_eq!(pipeline.generation().await, 1);

    let mut watcher = ConfigWatcher::new(&path).with_poll_period(Duration::from_millis(20));
    {
        let pipeline = pipeline.clone();
        watcher.add_callback(move |new_config| {
            let pipeline = pipeline.clone();
            Box::pin(async move { pipeline.rebuild(&new_config).await })
        });
    }
    let shutdown = watcher.start();

    tokio::time::sleep(Duration::from_millis(60)).await;
    write_file(&path, DEDUP_CONFIG);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(pipeline.generation().await, 2);
    let _ = shutdown.send(true);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_invalid_rewrite_retains_running_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    write_file(&path, BASE_CONFIG);

    let config = Config::load(&path).unwrap();
    let pipeline = Pipeline::with_notifier_factory(
        &config,
        Box::new(|_| Ok(Arc::new(NullNotifier) as Arc<dyn Notifier>)),
    )
    .await
    .unwrap();

    let rebuilds = Arc::new(Mutex::new(0usize));
    let mut watcher = ConfigWatcher::new(&path).with_poll_period(Duration::from_millis(20));
    {
        let pipeline = pipeline.clone();
        let rebuilds = rebuilds.clone();
        watcher.add_callback(move |new_config| {
            let pipeline = pipeline.clone();
            let rebuilds = rebuilds.clone();
            Box::pin(async move {
                *rebuilds.lock().unwrap() += 1;
                pipeline.rebuild(&new_config).await
            })
        });
    }
    let shutdown = watcher.start();

    tokio::time::sleep(Duration::from_millis(60)).await;
    // Unknown top-level key: parse fails, prior config stays active.
    write_file(&path, "namespace: default\nclustering: true\n");
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(*rebuilds.lock().unwrap(), 0);
    assert_eq!(pipeline.generation().await, 1);
    let _ = shutdown.send(true);
    pipeline.shutdown().await;
}
