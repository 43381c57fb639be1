use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use nswatch::config::Config;
use nswatch::error::{Error, Result};
use nswatch::event::{Event, EventType, ResourceKind};
use nswatch::notify::{Notifier, SlackMessage};
use nswatch::pipeline::Pipeline;

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SlackMessage>>>,
    fail_with_status: Option<u16>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &SlackMessage) -> Result<()> {
        if let Some(status) = self.fail_with_status {
            return Err(Error::Sink(status));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn load_config(yaml: &str) -> Config {
    let mut config: Config = serde_yaml::from_str(yaml).unwrap();
    config.validate().unwrap();
    config
}

async fn pipeline_with_recorder(yaml: &str) -> (Arc<Pipeline>, RecordingNotifier) {
    let config = load_config(yaml);
    let recorder = RecordingNotifier::default();
    let factory_recorder = recorder.clone();
    let pipeline = Pipeline::with_notifier_factory(
        &config,
        Box::new(move |_| Ok(Arc::new(factory_recorder.clone()) as Arc<dyn Notifier>)),
    )
    .await
    .unwrap();
    (pipeline, recorder)
}

fn sent(recorder: &RecordingNotifier) -> Vec<SlackMessage> {
    recorder.sent.lock().unwrap().clone()
}

fn field_value(message: &SlackMessage, attachment: usize, title: &str) -> Option<String> {
    message.attachments[attachment]
        .fields
        .iter()
        .find(|f| f.title == title)
        .map(|f| f.value.clone())
}

const SINGLETON_CONFIG: &str = r"
namespace: default
resources:
  - kind: Pod
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
";

#[tokio::test]
async fn test_singleton_happy_path() {
    let (pipeline, recorder) = pipeline_with_recorder(SINGLETON_CONFIG).await;

    let mut event = Event::new(ResourceKind::Pod, "default", "web", EventType::Added);
    event.status = Some("Pending".to_string());
    pipeline.handle_event(event).await;

    let messages = sent(&recorder);
    assert_eq!(messages.len(), 1);
    let attachment = &messages[0].attachments[0];
    assert_eq!(attachment.color.as_deref(), Some("good"));
    assert_eq!(attachment.title.as_deref(), Some("[Pod] default/web"));
    assert_eq!(
        field_value(&messages[0], 0, "イベントタイプ").as_deref(),
        Some("ADDED")
    );
    assert_eq!(
        field_value(&messages[0], 0, "ステータス").as_deref(),
        Some("Pending")
    );
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ttl_bounded_dedup() {
    let yaml = r"
namespace: default
resources:
  - kind: Pod
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
deduplication:
  enabled: true
  ttlSeconds: 1
  maxCacheSize: 10
";
    let (pipeline, recorder) = pipeline_with_recorder(yaml).await;

    let mut event = Event::new(ResourceKind::Pod, "default", "web", EventType::Updated);
    event.status = Some("Running".to_string());

    pipeline.handle_event(event.clone()).await;
    tokio::time::advance(Duration::from_millis(500)).await;
    pipeline.handle_event(event.clone()).await;
    tokio::time::advance(Duration::from_millis(700)).await;
    pipeline.handle_event(event.clone()).await;

    // First and third go out; the t=0.5s repeat is suppressed.
    assert_eq!(sent(&recorder).len(), 2);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_predicate_filter_on_deployment() {
    let yaml = r#"
namespace: default
resources:
  - kind: Deployment
filters:
  - resource: Deployment
    expression: 'event.eventType == "UPDATED" && event.reason != "ReplicaSetUpdated" && event.reason != "NewReplicaSetAvailable"'
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
"#;
    let (pipeline, recorder) = pipeline_with_recorder(yaml).await;

    for reason in [
        "ReplicaSetUpdated",
        "NewReplicaSetAvailable",
        "ScalingReplicaSet",
    ] {
        let mut event = Event::new(ResourceKind::Deployment, "default", "api", EventType::Updated);
        event.reason = Some(reason.to_string());
        pipeline.handle_event(event).await;
    }

    let messages = sent(&recorder);
    assert_eq!(messages.len(), 1);
    assert_eq!(
        field_value(&messages[0], 0, "理由").as_deref(),
        Some("ScalingReplicaSet")
    );
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_smart_batching_forces_summary_keeps_deleted_details() {
    let yaml = r"
namespace: default
resources:
  - kind: Pod
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
batching:
  enabled: true
  windowSeconds: 30
  mode: smart
  smart:
    maxEventsPerGroup: 5
    maxTotalEvents: 20
    alwaysShowDetails:
      - DELETED
";
    let (pipeline, recorder) = pipeline_with_recorder(yaml).await;

    for i in 0..25 {
        pipeline
            .handle_event(Event::new(
                ResourceKind::Pod,
                "default",
                format!("pod-{i}"),
                EventType::Added,
            ))
            .await;
        if i == 0 {
            // Let the window timer spawned by the first event register
            // against the current (pre-advance) clock.
            tokio::task::yield_now().await;
        }
    }
    pipeline
        .handle_event(Event::new(
            ResourceKind::Pod,
            "default",
            "gone",
            EventType::Deleted,
        ))
        .await;

    tokio::time::advance(Duration::from_secs(30)).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let messages = sent(&recorder);
    assert_eq!(messages.len(), 1);
    let batch = &messages[0];
    assert_eq!(batch.text.as_deref(), Some("📦 *過去30秒間の変更 (26件)*"));

    // ADDED summarized (count 25, ten names, then the rest marker);
    // DELETED rendered in detail despite the total cap.
    assert_eq!(batch.attachments.len(), 2);
    assert_eq!(field_value(batch, 0, "件数").as_deref(), Some("25件"));
    let names = field_value(batch, 0, "リソース").unwrap();
    assert!(names.ends_with("... 他15件"));
    assert_eq!(
        batch.attachments[1].title.as_deref(),
        Some("🔴 [Pod] default/gone")
    );
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_partial_batch() {
    let yaml = r"
namespace: default
resources:
  - kind: Pod
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
batching:
  enabled: true
  windowSeconds: 60
";
    let (pipeline, recorder) = pipeline_with_recorder(yaml).await;

    pipeline
        .handle_event(Event::new(ResourceKind::Pod, "default", "a", EventType::Added))
        .await;
    pipeline.shutdown().await;

    let messages = sent(&recorder);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].text.as_deref().unwrap().contains("(1件)"));
}

#[tokio::test]
async fn test_hot_reload_swaps_generation_atomically() {
    let (pipeline, recorder) = pipeline_with_recorder(SINGLETON_CONFIG).await;
    assert_eq!(pipeline.generation().await, 1);

    let mut event = Event::new(ResourceKind::Pod, "default", "web", EventType::Updated);
    event.status = Some("Running".to_string());

    // Without dedup, identical events all go out.
    pipeline.handle_event(event.clone()).await;
    pipeline.handle_event(event.clone()).await;
    assert_eq!(sent(&recorder).len(), 2);

    let with_dedup = load_config(
        r"
namespace: default
resources:
  - kind: Pod
notifier:
  slack:
    webhookUrl: https://example.invalid/webhook
deduplication:
  enabled: true
  ttlSeconds: 60
",
    );
    pipeline.rebuild(&with_dedup).await.unwrap();
    assert_eq!(pipeline.generation().await, 2);

    // The new generation suppresses the duplicate.
    pipeline.handle_event(event.clone()).await;
    pipeline.handle_event(event.clone()).await;
    assert_eq!(sent(&recorder).len(), 3);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_rebuild_with_bad_expression_keeps_prior_generation() {
    let (pipeline, recorder) = pipeline_with_recorder(SINGLETON_CONFIG).await;

    let mut broken = load_config(SINGLETON_CONFIG);
    broken.filters = vec![nswatch::config::FilterConfig {
        resource: ResourceKind::Pod,
        event_types: Vec::new(),
        labels: Default::default(),
        expression: Some("event.kind ==".to_string()),
    }];

    assert!(matches!(
        pipeline.rebuild(&broken).await,
        Err(Error::BadExpression(_))
    ));
    assert_eq!(pipeline.generation().await, 1);

    // The prior generation still processes events.
    pipeline
        .handle_event(Event::new(ResourceKind::Pod, "default", "web", EventType::Added))
        .await;
    assert_eq!(sent(&recorder).len(), 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_sink_failure_drops_message_without_retry() {
    let config = load_config(SINGLETON_CONFIG);
    let recorder = RecordingNotifier {
        sent: Arc::new(Mutex::new(Vec::new())),
        fail_with_status: Some(500),
    };
    let factory_recorder = recorder.clone();
    let pipeline = Pipeline::with_notifier_factory(
        &config,
        Box::new(move |_| Ok(Arc::new(factory_recorder.clone()) as Arc<dyn Notifier>)),
    )
    .await
    .unwrap();

    // The failure is logged and swallowed; the handler neither retries
    // nor panics, and later events still reach the sink path.
    pipeline
        .handle_event(Event::new(ResourceKind::Pod, "default", "web", EventType::Added))
        .await;
    assert!(sent(&recorder).is_empty());
    pipeline.shutdown().await;
}
