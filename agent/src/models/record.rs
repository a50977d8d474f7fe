//! Wire schema for emitted event records.
//!
//! Records are JSON-encoded over the outbound topic. Optional fields that
//! could not be determined are omitted from the payload (never encoded as
//! `""` or `null`); deserialization tolerates omission via `#[serde(default)]`.
//! Field names are stable per schema version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::identity::ResolvedIdentity;
use crate::models::interaction::{presence, ElementSnapshot};

/// Must be "tvunna.record.v1" for this version.
pub const RECORD_SCHEMA_V1: &str = "tvunna.record.v1";

/// One observed interaction or programmatic custom event. Immutable once
/// built; built exactly once per tracked interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub schema: String,
    pub event: EventInfo,
    pub timing: Timing,
    pub app: AppInfo,
    pub person: PersonIdentity,
    pub context: PageContext,
    #[serde(default)]
    pub capture: CapturedData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInfo {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: String,
    /// Integration metadata echoed verbatim from the configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_token: Option<String>,
}

/// Page context at the time the record was built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContext {
    pub landing_page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
}

/// Element-derived payload plus caller-supplied properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapturedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub dom_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dataset: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Builds canonical records for a named event. Pure construction: missing
/// inputs become absent fields, never failures. Deterministic except for the
/// generated event id and timestamp.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    app_id: String,
    metadata: BTreeMap<String, String>,
}

impl RecordBuilder {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            app_id: config.app_id.clone(),
            metadata: config.metadata.clone(),
        }
    }

    /// Record for a programmatic custom event.
    pub fn build(
        &self,
        name: &str,
        identity: ResolvedIdentity,
        page: PageContext,
        properties: serde_json::Map<String, serde_json::Value>,
    ) -> EventRecord {
        EventRecord {
            schema: RECORD_SCHEMA_V1.to_string(),
            event: EventInfo {
                id: Uuid::new_v4(),
                name: name.to_string(),
            },
            timing: Timing { sent_at: Utc::now() },
            app: AppInfo {
                app_id: self.app_id.clone(),
                metadata: self.metadata.clone(),
            },
            person: PersonIdentity {
                visit_token: identity.visit,
                visitor_token: identity.visitor,
            },
            context: page,
            capture: CapturedData {
                properties,
                ..CapturedData::default()
            },
        }
    }

    /// Record for a captured interaction, with the element-derived fields
    /// filled in.
    pub fn build_for(
        &self,
        name: &str,
        identity: ResolvedIdentity,
        page: PageContext,
        element: &ElementSnapshot,
        properties: serde_json::Map<String, serde_json::Value>,
    ) -> EventRecord {
        let mut record = self.build(name, identity, page, properties);
        record.capture.href = element.href.as_deref().and_then(presence);
        record.capture.tag = presence(&element.tag.to_lowercase());
        record.capture.dom_id = element.id.as_deref().and_then(presence);
        record.capture.class = element.class.as_deref().and_then(presence);
        record.capture.text = element.display_text();
        record.capture.section = element.closest_section().map(str::to_string);
        record.capture.dataset = element.dataset.clone();
        record
    }
}
