//! Agent configuration.
//!
//! One `AgentConfig` per page load. Defaults mirror the hosted broker setup;
//! integrations override the fields they care about through the `with_*`
//! chain.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::session::Qos;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Connect over TLS.
    pub use_ssl: bool,
    /// A connect attempt that has not succeeded within this window is deemed
    /// to have failed.
    pub connect_timeout: Duration,
    /// Delay before the next connect attempt after a failed one.
    pub reconnect_delay: Duration,
    /// Quality of service for outbound publishes.
    pub qos: Qos,
    /// Topic events are published to.
    pub outbound_topic: String,
    /// Topic listened to for arriving messages. Only used when
    /// `listen_inbound` is set.
    pub inbound_topic: String,
    /// Subscribe to `inbound_topic` on connect.
    pub listen_inbound: bool,
    /// Usage of visit and visitor tokens.
    pub identity_enabled: bool,
    /// Generate missing identity tokens on demand.
    pub identity_auto_generate: bool,
    /// User application id, echoed into every record.
    pub app_id: String,
    /// Free-form integration metadata, echoed verbatim into every record.
    pub metadata: BTreeMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "tvunna.io".to_string(),
            port: 8443,
            use_ssl: true,
            connect_timeout: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(2),
            qos: Qos::AtMostOnce,
            outbound_topic: "tvunna/in".to_string(),
            inbound_topic: "tvunna/out".to_string(),
            listen_inbound: false,
            identity_enabled: false,
            identity_auto_generate: true,
            app_id: "demo-rs".to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Numeric quality-of-service level (0, 1 or 2) as integrations supply
    /// it. Unknown levels fall back to best effort, see [`Qos::from_level`].
    pub fn with_qos_level(mut self, level: u8) -> Self {
        self.qos = Qos::from_level(level);
        self
    }

    pub fn with_topics(
        mut self,
        outbound: impl Into<String>,
        inbound: impl Into<String>,
    ) -> Self {
        self.outbound_topic = outbound.into();
        self.inbound_topic = inbound.into();
        self
    }

    pub fn with_listen_inbound(mut self, listen: bool) -> Self {
        self.listen_inbound = listen;
        self
    }

    pub fn with_identity(mut self, enabled: bool) -> Self {
        self.identity_enabled = enabled;
        self
    }

    pub fn with_identity_auto_generate(mut self, auto_generate: bool) -> Self {
        self.identity_auto_generate = auto_generate;
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
