use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use tvunna_agent::{
    AgentConfig, AgentContext, MemoryStore, PageContext, StaticPage, TransportSession,
};
use tvunna_mqtt::MqttBroker;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Adjust host/port/app_id as needed
    let config = AgentConfig::new("127.0.0.1", 1883)
        .with_ssl(false)
        .with_qos_level(0)
        .with_identity(true)
        .with_app_id("demo-rs");

    let session = TransportSession::start(config.clone(), MqttBroker::new());
    info!(client_id = session.client_id(), "session started");

    let page = PageContext {
        landing_page: "https://demo.local/".to_string(),
        title: Some("tvunna demo".to_string()),
        referrer: None,
        user_agent: "tvunna-demo/0.1".to_string(),
        screen_width: 1920,
        screen_height: 1080,
    };
    let ctx = AgentContext::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(StaticPage::new(page)),
        session.handle(),
    );

    let mut properties = serde_json::Map::new();
    properties.insert("source".to_string(), serde_json::json!("demo"));
    ctx.track("demo_started", properties);

    info!("tracking started. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    session.stop().await;
    Ok(())
}
