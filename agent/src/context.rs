//! Per-page-load agent context.
//!
//! One `AgentContext` per page load, passed explicitly to the capture task
//! instead of living in ambient globals. It ties together configuration,
//! identity, record construction and the session handle.

use std::sync::Arc;

use tracing::debug;

use crate::config::AgentConfig;
use crate::identity::{IdentityStore, KeyValueStore};
use crate::models::interaction::{ElementSnapshot, InteractionKind};
use crate::models::record::{PageContext, RecordBuilder};
use crate::session::SessionHandle;

/// Supplies the current page context for a record. Single-page-app hosts
/// report live values; `StaticPage` covers fixed pages and tests.
pub trait PageProbe: Send + Sync {
    fn snapshot(&self) -> PageContext;
}

pub struct StaticPage {
    context: PageContext,
}

impl StaticPage {
    pub fn new(context: PageContext) -> Self {
        Self { context }
    }
}

impl PageProbe for StaticPage {
    fn snapshot(&self) -> PageContext {
        self.context.clone()
    }
}

pub struct AgentContext {
    config: AgentConfig,
    identity: IdentityStore,
    builder: RecordBuilder,
    session: SessionHandle,
    probe: Arc<dyn PageProbe>,
}

impl AgentContext {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn KeyValueStore>,
        probe: Arc<dyn PageProbe>,
        session: SessionHandle,
    ) -> Self {
        let identity = IdentityStore::new(store, &config);
        let builder = RecordBuilder::new(&config);
        Self {
            config,
            identity,
            builder,
            session,
            probe,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    /// Programmatic custom event. Builds one record and hands it to the
    /// session; never blocks, never fails toward the caller.
    pub fn track(&self, name: &str, properties: serde_json::Map<String, serde_json::Value>) {
        let record = self.builder.build(
            name,
            self.identity.resolve(),
            self.probe.snapshot(),
            properties,
        );
        debug!(event = name, event_id = %record.event.id, "tracking event");
        self.session.send(&record);
    }

    /// Captured interaction: record with element-derived fields.
    pub fn track_interaction(&self, kind: InteractionKind, element: &ElementSnapshot) {
        let record = self.builder.build_for(
            kind.event_name(),
            self.identity.resolve(),
            self.probe.snapshot(),
            element,
            serde_json::Map::new(),
        );
        debug!(event = kind.event_name(), event_id = %record.event.id, "tracking interaction");
        self.session.send(&record);
    }

    /// Clears visit/visitor identity. Idempotent.
    pub fn reset(&self) {
        self.identity.reset();
    }
}
