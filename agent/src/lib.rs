//! tvunna-agent: client-side telemetry pipeline.
//!
//! Capture -> enrich -> reliable delivery: interaction notifications become
//! structured event records enriched with visit/visitor identity and page
//! context, then go out over a publish/subscribe transport that queues while
//! disconnected and drains FIFO on (re)connect.
//!
//! The transport, the durable key-value store and the DOM event source are
//! collaborators behind traits (`BrokerClient`, `KeyValueStore`,
//! `EventSource`); hosts plug in their environment, `tvunna-mqtt` supplies
//! the rumqttc-backed broker client.

pub mod capture;
pub mod config;
pub mod context;
pub mod identity;
pub mod models;
pub mod queue;
pub mod session;

pub use capture::{ElementMatcher, EventSource, InteractionCapture, TagMatcher};
pub use config::AgentConfig;
pub use context::{AgentContext, PageProbe, StaticPage};
pub use identity::{IdentityStore, KeyValueStore, MemoryStore, ResolvedIdentity};
pub use models::interaction::{Container, ElementSnapshot, Interaction, InteractionKind};
pub use models::record::{
    CapturedData, EventRecord, PageContext, RecordBuilder, RECORD_SCHEMA_V1,
};
pub use queue::DeliveryQueue;
pub use session::{
    BrokerClient, BrokerError, BrokerEvent, ConnectOptions, InboundMessage, Qos, SessionHandle,
    TransportSession,
};
