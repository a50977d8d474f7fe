//! rumqttc-backed broker client for the tvunna agent.
//!
//! Implements the agent's `BrokerClient` seam over `rumqttc::AsyncClient`.
//! Each `connect` call builds a fresh client/event-loop pair and hands the
//! event loop to a spawned task that polls it for the lifetime of the
//! connection. Publishes go through the client's bounded request channel,
//! which that task keeps draining, so a long burst of publishes (a large
//! queue drain) never stalls waiting for the loop to be serviced. The
//! agent's session owns reconnection policy; the event loop is never left
//! to retry on its own.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use tvunna_agent::{BrokerClient, BrokerError, BrokerEvent, ConnectOptions, Qos};

const KEEP_ALIVE_SECS: u64 = 30;
const REQUEST_CHANNEL_CAPACITY: usize = 50;

fn map_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

struct Live {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    loop_task: JoinHandle<()>,
}

#[derive(Default)]
pub struct MqttBroker {
    live: Option<Live>,
    connected: bool,
}

impl MqttBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Polls the event loop until the connection drops, forwarding incoming
/// publishes and the eventual loss. Ends itself once the receiver is gone.
async fn drive_event_loop(mut eventloop: EventLoop, events: mpsc::UnboundedSender<BrokerEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => BrokerEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                // Clean, expected close from the broker side.
                BrokerEvent::ConnectionLost {
                    code: 0,
                    reason: None,
                }
            }
            Ok(_) => continue,
            Err(err) => BrokerEvent::ConnectionLost {
                code: 1,
                reason: Some(err.to_string()),
            },
        };
        let lost = matches!(event, BrokerEvent::ConnectionLost { .. });
        if events.send(event).is_err() || lost {
            break;
        }
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&mut self, opts: &ConnectOptions) -> Result<(), BrokerError> {
        if let Some(old) = self.live.take() {
            old.loop_task.abort();
        }
        self.connected = false;

        let mut options = MqttOptions::new(&opts.client_id, &opts.host, opts.port);
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        if opts.use_ssl {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        // Poll inline until the broker acknowledges the connection. The
        // session bounds this with its configured connect timeout.
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(BrokerError::Refused(format!("{:?}", ack.code)));
                    }
                    debug!(host = %opts.host, port = opts.port, "broker acknowledged connection");
                    break;
                }
                Ok(_) => continue,
                Err(err) => return Err(BrokerError::Transport(err.to_string())),
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let loop_task = tokio::spawn(drive_event_loop(eventloop, events_tx));
        self.live = Some(Live {
            client,
            events: events_rx,
            loop_task,
        });
        self.connected = true;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), BrokerError> {
        let live = self.live.as_mut().ok_or(BrokerError::NotConnected)?;
        live.client
            .publish(topic, map_qos(qos), false, payload.to_vec())
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        let live = self.live.as_mut().ok_or(BrokerError::NotConnected)?;
        live.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|err| BrokerError::Transport(err.to_string()))
    }

    async fn next_event(&mut self) -> Option<BrokerEvent> {
        let live = self.live.as_mut()?;
        let event = match live.events.recv().await {
            Some(event) => event,
            // The loop task ended without reporting: treat as abnormal loss.
            None => BrokerEvent::ConnectionLost {
                code: 1,
                reason: Some("event loop task ended".to_string()),
            },
        };
        if matches!(event, BrokerEvent::ConnectionLost { .. }) {
            self.connected = false;
            self.live = None;
        }
        Some(event)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
