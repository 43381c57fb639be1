//! Rendering of events and batches into sink payloads.
//!
//! Single events become one attachment with a titled field set; batches
//! become a headline plus one attachment per group, rendered in detail or
//! summarized depending on the batching mode. The user-facing strings are
//! kept byte-for-byte compatible with earlier releases, including the
//! Japanese field titles.

use chrono::SecondsFormat;

use crate::batch::{Batch, EventGroup};
use crate::config::{BatchMode, SmartBatchingConfig};
use crate::error::{Error, Result};
use crate::event::{Event, EventType};
use crate::notify::{SlackAttachment, SlackField, SlackMessage};

/// Names shown in a group summary before the "and N more" marker.
const SUMMARY_NAME_LIMIT: usize = 10;
/// Containers shown per event in batch detail rendering.
const DETAIL_CONTAINER_LIMIT: usize = 3;

const fn event_color(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Added => "good",
        EventType::Updated => "warning",
        EventType::Deleted => "danger",
    }
}

const fn event_emoji(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Added => "✅",
        EventType::Updated => "🟡",
        EventType::Deleted => "🔴",
    }
}

fn wire_timestamp(event: &Event) -> String {
    event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Placeholder names the plain-text template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Kind,
    Namespace,
    Name,
    EventType,
    Timestamp,
    Labels,
    Reason,
    Message,
    Status,
    ServiceType,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "Kind" => Some(Self::Kind),
            "Namespace" => Some(Self::Namespace),
            "Name" => Some(Self::Name),
            "EventType" => Some(Self::EventType),
            "Timestamp" => Some(Self::Timestamp),
            "Labels" => Some(Self::Labels),
            "Reason" => Some(Self::Reason),
            "Message" => Some(Self::Message),
            "Status" => Some(Self::Status),
            "ServiceType" => Some(Self::ServiceType),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A `{{ Field }}` substitution template, compiled at construction so a
/// bad template surfaces when the component is built, not per event.
#[derive(Debug, Clone)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn compile(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                return Err(Error::TemplateRender(format!(
                    "unterminated placeholder in template: {source:?}"
                )));
            };
            let name = after_open[..close].trim();
            let placeholder = Placeholder::parse(name).ok_or_else(|| {
                Error::TemplateRender(format!("unknown template field: {name:?}"))
            })?;
            segments.push(Segment::Placeholder(placeholder));
            rest = &after_open[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    fn render(&self, event: &Event) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(placeholder) => match placeholder {
                    Placeholder::Kind => out.push_str(event.kind.as_str()),
                    Placeholder::Namespace => out.push_str(&event.namespace),
                    Placeholder::Name => out.push_str(&event.name),
                    Placeholder::EventType => out.push_str(event.event_type.as_str()),
                    Placeholder::Timestamp => out.push_str(&wire_timestamp(event)),
                    Placeholder::Labels => {
                        let rendered: Vec<String> = event
                            .labels
                            .iter()
                            .map(|(k, v)| format!("{k}={v}"))
                            .collect();
                        out.push_str(&rendered.join(","));
                    }
                    Placeholder::Reason => out.push_str(event.reason.as_deref().unwrap_or("")),
                    Placeholder::Message => out.push_str(event.message.as_deref().unwrap_or("")),
                    Placeholder::Status => out.push_str(event.status.as_deref().unwrap_or("")),
                    Placeholder::ServiceType => {
                        out.push_str(event.service_type.as_deref().unwrap_or(""));
                    }
                },
            }
        }
        out
    }
}

pub struct Formatter {
    template: Template,
}

impl Formatter {
    /// # Errors
    ///
    /// Returns `TemplateRender` when the template string does not compile.
    pub fn new(template: &str) -> Result<Self> {
        Ok(Self {
            template: Template::compile(template)?,
        })
    }

    /// Render an event through the user template.
    #[must_use]
    pub fn format_text(&self, event: &Event) -> String {
        self.template.render(event)
    }

    /// The fixed minimal rendering used when a configured template cannot
    /// be honored.
    #[must_use]
    pub fn minimal_text(event: &Event) -> String {
        format!(
            "[{}] {}/{} was {}",
            event.kind, event.namespace, event.name, event.event_type
        )
    }

    /// Render one event as an attachment payload.
    #[must_use]
    pub fn format_single(&self, event: &Event) -> SlackMessage {
        let attachment = SlackAttachment {
            color: Some(event_color(event.event_type).to_string()),
            title: Some(format!(
                "[{}] {}/{}",
                event.kind, event.namespace, event.name
            )),
            text: None,
            fields: single_event_fields(event),
            timestamp: Some(event.timestamp.timestamp()),
        };

        SlackMessage {
            text: None,
            attachments: vec![attachment],
        }
    }

    /// Render a batch: a headline with window length and total count, then
    /// one attachment per detailed event or per summarized group.
    #[must_use]
    pub fn format_batch(
        &self,
        batch: &Batch,
        mode: BatchMode,
        smart: &SmartBatchingConfig,
    ) -> SlackMessage {
        let total = batch.events.len();
        let text = format!(
            "📦 *過去{}秒間の変更 ({}件)*",
            batch.duration_seconds(),
            total
        );

        let mut attachments = Vec::new();
        for group in batch.groups() {
            if show_details(mode, &group, total, smart) {
                for event in &group.events {
                    attachments.push(SlackAttachment {
                        color: Some(event_color(event.event_type).to_string()),
                        title: Some(format!(
                            "{} [{}] {}/{}",
                            event_emoji(event.event_type),
                            event.kind,
                            event.namespace,
                            event.name
                        )),
                        text: None,
                        fields: batch_event_fields(event),
                        timestamp: Some(event.timestamp.timestamp()),
                    });
                }
            } else {
                attachments.push(summary_attachment(&group));
            }
        }

        SlackMessage {
            text: Some(text),
            attachments,
        }
    }
}

/// Per-group detail decision.
///
/// `alwaysShowDetails` wins outright, even past the total-event cap, so
/// the event types an operator singled out never collapse into a count.
fn show_details(
    mode: BatchMode,
    group: &EventGroup<'_>,
    total: usize,
    smart: &SmartBatchingConfig,
) -> bool {
    match mode {
        BatchMode::Detailed => true,
        BatchMode::Summary => false,
        BatchMode::Smart => {
            smart.always_show_details.contains(&group.event_type)
                || (group.events.len() <= smart.max_events_per_group
                    && total <= smart.max_total_events)
        }
    }
}

fn summary_attachment(group: &EventGroup<'_>) -> SlackAttachment {
    let count = group.events.len();
    let mut fields = vec![
        SlackField {
            title: "イベントタイプ".to_string(),
            value: group.event_type.to_string(),
            short: true,
        },
        SlackField {
            title: "件数".to_string(),
            value: format!("{count}件"),
            short: true,
        },
    ];

    let mut names = Vec::new();
    for (i, event) in group.events.iter().enumerate() {
        if i >= SUMMARY_NAME_LIMIT {
            names.push(format!("... 他{}件", count - SUMMARY_NAME_LIMIT));
            break;
        }
        names.push(event.name.clone());
    }
    fields.push(SlackField {
        title: "リソース".to_string(),
        value: names.join(", "),
        short: false,
    });

    SlackAttachment {
        color: Some(event_color(group.event_type).to_string()),
        title: Some(format!(
            "{} {} ({count}件)",
            event_emoji(group.event_type),
            group.kind
        )),
        text: None,
        fields,
        timestamp: None,
    }
}

fn common_fields(event: &Event) -> Vec<SlackField> {
    vec![
        SlackField {
            title: "イベントタイプ".to_string(),
            value: event.event_type.to_string(),
            short: true,
        },
        SlackField {
            title: "時刻".to_string(),
            value: wire_timestamp(event),
            short: true,
        },
    ]
}

fn replica_field(event: &Event) -> Option<SlackField> {
    event.replicas.map(|replicas| SlackField {
        title: "レプリカ".to_string(),
        value: format!(
            "Desired: {}, Ready: {}, Current: {}",
            replicas.desired, replicas.ready, replicas.current
        ),
        short: false,
    })
}

fn container_field(event: &Event, limit: Option<usize>) -> Option<SlackField> {
    if event.containers.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    for (i, container) in event.containers.iter().enumerate() {
        if let Some(limit) = limit {
            if i >= limit {
                lines.push(format!("... 他{}個", event.containers.len() - limit));
                break;
            }
        }
        lines.push(format!("• {}: `{}`", container.name, container.image));
    }
    Some(SlackField {
        title: "コンテナ".to_string(),
        value: lines.join("\n"),
        short: false,
    })
}

fn single_event_fields(event: &Event) -> Vec<SlackField> {
    let mut fields = common_fields(event);

    if let Some(status) = &event.status {
        fields.push(SlackField {
            title: "ステータス".to_string(),
            value: status.clone(),
            short: true,
        });
    }
    if let Some(service_type) = &event.service_type {
        fields.push(SlackField {
            title: "サービスタイプ".to_string(),
            value: service_type.clone(),
            short: true,
        });
    }
    if let Some(field) = replica_field(event) {
        fields.push(field);
    }
    if let Some(field) = container_field(event, None) {
        fields.push(field);
    }
    if let Some(reason) = &event.reason {
        fields.push(SlackField {
            title: "理由".to_string(),
            value: reason.clone(),
            short: false,
        });
    }
    if let Some(message) = &event.message {
        fields.push(SlackField {
            title: "メッセージ".to_string(),
            value: message.clone(),
            short: false,
        });
    }

    fields
}

fn batch_event_fields(event: &Event) -> Vec<SlackField> {
    let mut fields = common_fields(event);

    if let Some(status) = &event.status {
        fields.push(SlackField {
            title: "ステータス".to_string(),
            value: status.clone(),
            short: true,
        });
    }
    if let Some(field) = replica_field(event) {
        fields.push(field);
    }
    if let Some(field) = container_field(event, Some(DETAIL_CONTAINER_LIMIT)) {
        fields.push(field);
    }

    fields
}
