//! Interaction capture: from event-source notifications to tracked records.
//!
//! The event source delivers typed notifications with a flattened target
//! element; the capture task filters them against the per-kind selector and
//! tracks a record for each match. No deduplication: a double click produces
//! two records, mirroring real user action counts.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::AgentContext;
use crate::models::interaction::{ElementSnapshot, Interaction, InteractionKind};

/// Abstract source of interaction notifications (browser glue, webview
/// bridge, test harness). The source is expected to deliver the `View`
/// notification once per page load, when the page becomes interactive.
#[async_trait]
pub trait EventSource: Send {
    /// Next notification, or `None` when the source is exhausted.
    async fn next(&mut self) -> Option<Interaction>;
}

/// Selector-matching capability. One implementation per hosting environment,
/// chosen at construction time, never probed per call.
pub trait ElementMatcher: Send + Sync {
    fn matches(&self, element: &ElementSnapshot, selector: &str) -> bool;
}

/// Tag-and-attribute matcher covering the selector grammar the capture kinds
/// use: comma-separated `tag` and `tag[attr=value]` parts. Hosts with a real
/// selector engine supply their own implementation.
pub struct TagMatcher;

impl TagMatcher {
    fn matches_part(element: &ElementSnapshot, part: &str) -> bool {
        match part.split_once('[') {
            None => element.tag.eq_ignore_ascii_case(part),
            Some((tag, rest)) => {
                if !element.tag.eq_ignore_ascii_case(tag) {
                    return false;
                }
                let attr = match rest.strip_suffix(']') {
                    Some(attr) => attr,
                    None => return false,
                };
                match attr.split_once('=') {
                    Some((name, value)) => element
                        .attributes
                        .get(name.trim())
                        .map(|v| v == value.trim())
                        .unwrap_or(false),
                    None => element.attributes.contains_key(attr.trim()),
                }
            }
        }
    }
}

impl ElementMatcher for TagMatcher {
    fn matches(&self, element: &ElementSnapshot, selector: &str) -> bool {
        selector
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .any(|part| Self::matches_part(element, part))
    }
}

/// Subscribes to the event source and produces one record per matched
/// interaction.
pub struct InteractionCapture<S, M> {
    source: S,
    matcher: M,
    attached: HashSet<InteractionKind>,
}

impl<S, M> InteractionCapture<S, M>
where
    S: EventSource + 'static,
    M: ElementMatcher + 'static,
{
    pub fn new(source: S, matcher: M) -> Self {
        Self {
            source,
            matcher,
            attached: HashSet::new(),
        }
    }

    /// Registers interest in one interaction kind.
    pub fn attach(mut self, kind: InteractionKind) -> Self {
        self.attached.insert(kind);
        self
    }

    /// Registers all four kinds.
    pub fn attach_all(mut self) -> Self {
        for kind in InteractionKind::ALL {
            self.attached.insert(kind);
        }
        self
    }

    pub fn spawn(self, ctx: Arc<AgentContext>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(ctx, shutdown))
    }

    async fn run(mut self, ctx: Arc<AgentContext>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                interaction = self.source.next() => match interaction {
                    Some(interaction) => self.handle(&ctx, interaction),
                    None => break,
                },
            }
        }
        debug!("interaction capture stopped");
    }

    fn handle(&self, ctx: &AgentContext, interaction: Interaction) {
        if !self.attached.contains(&interaction.kind) {
            return;
        }
        // View has no target; everything else must match its selector.
        if interaction.kind != InteractionKind::View
            && !self
                .matcher
                .matches(&interaction.target, interaction.kind.selector())
        {
            debug!(kind = ?interaction.kind, tag = %interaction.target.tag, "unmatched interaction");
            return;
        }
        ctx.track_interaction(interaction.kind, &interaction.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::config::AgentConfig;
    use crate::context::StaticPage;
    use crate::identity::MemoryStore;
    use crate::models::interaction::Container;
    use crate::models::record::{EventRecord, PageContext};
    use crate::session::{
        BrokerClient, BrokerError, BrokerEvent, ConnectOptions, Qos, TransportSession,
    };

    struct RecordingBroker {
        published: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        async fn connect(&mut self, _opts: &ConnectOptions) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(
            &mut self,
            _topic: &str,
            payload: &[u8],
            _qos: Qos,
        ) -> Result<(), BrokerError> {
            self.published
                .lock()
                .unwrap()
                .push(String::from_utf8(payload.to_vec()).unwrap());
            Ok(())
        }

        async fn subscribe(&mut self, _topic: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn next_event(&mut self) -> Option<BrokerEvent> {
            std::future::pending::<Option<BrokerEvent>>().await
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    struct ScriptedSource {
        items: VecDeque<Interaction>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next(&mut self) -> Option<Interaction> {
            self.items.pop_front()
        }
    }

    fn page() -> PageContext {
        PageContext {
            landing_page: "https://shop.example/pricing".to_string(),
            title: Some("Pricing".to_string()),
            referrer: None,
            user_agent: "test-agent/1.0".to_string(),
            screen_width: 1280,
            screen_height: 800,
        }
    }

    async fn run_capture(
        interactions: Vec<Interaction>,
        attach_all: bool,
        only: Option<InteractionKind>,
    ) -> Vec<EventRecord> {
        let published = Arc::new(Mutex::new(Vec::new()));
        let broker = RecordingBroker {
            published: published.clone(),
        };
        let config = AgentConfig::new("broker.test", 1883)
            .with_ssl(false)
            .with_identity(true);
        let session = TransportSession::start(config.clone(), broker);
        let ctx = Arc::new(AgentContext::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticPage::new(page())),
            session.handle(),
        ));

        let mut capture = InteractionCapture::new(
            ScriptedSource {
                items: interactions.into(),
            },
            TagMatcher,
        );
        if attach_all {
            capture = capture.attach_all();
        }
        if let Some(kind) = only {
            capture = capture.attach(kind);
        }

        let shutdown = CancellationToken::new();
        capture
            .spawn(ctx, shutdown)
            .await
            .expect("capture task panicked");

        // The source is exhausted; give the session task time to publish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop().await;

        let records = published
            .lock()
            .unwrap()
            .iter()
            .map(|payload| serde_json::from_str(payload).unwrap())
            .collect();
        records
    }

    #[tokio::test]
    async fn matched_interactions_flow_to_the_broker() {
        let mut click = ElementSnapshot::new("button");
        click.text = Some("  Buy   Now ".to_string());
        click.chain = vec![Container {
            section: Some("pricing".to_string()),
        }];

        let unmatched_click = ElementSnapshot::new("div");

        let mut change = ElementSnapshot::new("select");
        change.id = Some("plan".to_string());

        let interactions = vec![
            Interaction::page_ready(),
            Interaction {
                kind: InteractionKind::Click,
                target: click,
            },
            Interaction {
                kind: InteractionKind::Click,
                target: unmatched_click,
            },
            Interaction {
                kind: InteractionKind::Change,
                target: change,
            },
        ];

        let records = run_capture(interactions, true, None).await;
        let names: Vec<&str> = records.iter().map(|r| r.event.name.as_str()).collect();
        assert_eq!(names, vec!["$view", "$click", "$change"]);

        let click_record = &records[1];
        assert_eq!(click_record.capture.text.as_deref(), Some("Buy Now"));
        assert_eq!(click_record.capture.section.as_deref(), Some("pricing"));
        assert_eq!(click_record.capture.tag.as_deref(), Some("button"));
        assert!(click_record.person.visit_token.is_some());
        assert!(click_record.person.visitor_token.is_some());

        // All records of one page load share one identity.
        assert_eq!(
            records[0].person.visit_token,
            records[2].person.visit_token
        );
    }

    #[tokio::test]
    async fn unattached_kinds_are_ignored() {
        let mut click = ElementSnapshot::new("a");
        click.href = Some("https://shop.example/".to_string());

        let interactions = vec![
            Interaction::page_ready(),
            Interaction {
                kind: InteractionKind::Click,
                target: click,
            },
        ];

        let records = run_capture(interactions, false, Some(InteractionKind::Click)).await;
        let names: Vec<&str> = records.iter().map(|r| r.event.name.as_str()).collect();
        assert_eq!(names, vec!["$click"]);
    }

    #[tokio::test]
    async fn repeated_interactions_are_not_deduplicated() {
        let mut click = ElementSnapshot::new("button");
        click.text = Some("Buy".to_string());

        let interactions = vec![
            Interaction {
                kind: InteractionKind::Click,
                target: click.clone(),
            },
            Interaction {
                kind: InteractionKind::Click,
                target: click,
            },
        ];

        let records = run_capture(interactions, true, None).await;
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].event.id, records[1].event.id);
    }

    #[test]
    fn click_selector_matches_expected_tags() {
        let matcher = TagMatcher;
        let selector = InteractionKind::Click.selector();

        for tag in ["a", "button", "img"] {
            assert!(matcher.matches(&ElementSnapshot::new(tag), selector), "{tag}");
        }

        let mut submit = ElementSnapshot::new("input");
        submit
            .attributes
            .insert("type".to_string(), "submit".to_string());
        assert!(matcher.matches(&submit, selector));

        let mut text_input = ElementSnapshot::new("input");
        text_input
            .attributes
            .insert("type".to_string(), "text".to_string());
        assert!(!matcher.matches(&text_input, selector));

        assert!(!matcher.matches(&ElementSnapshot::new("div"), selector));
    }

    #[test]
    fn change_selector_matches_form_controls() {
        let matcher = TagMatcher;
        let selector = InteractionKind::Change.selector();
        for tag in ["input", "textarea", "select"] {
            assert!(matcher.matches(&ElementSnapshot::new(tag), selector), "{tag}");
        }
        assert!(!matcher.matches(&ElementSnapshot::new("form"), selector));
    }
}
