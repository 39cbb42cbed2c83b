//! Wires the packet engine's callback hooks to both the structured log
//! stream and the IPC event bus, and runs the IPC accept loop that lets a UI
//! client observe state/error events and drive Start/Stop.
//!
//! This is the "lifecycle glue" the design overview calls out separately
//! from the packet engine and the IPC channel themselves: neither of those
//! crates knows the other exists, so something above both has to translate
//! engine callbacks into outbound events and inbound events into engine
//! calls.

use std::sync::Arc;

use ipc_events::{Event, EventData};
use packet_engine::Callbacks;
use tokio::sync::broadcast;

/// Bounded broadcast of outbound events; a slow or absent UI client only
/// loses its own backlog, never blocks the engine's hot path.
const EVENT_BUS_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    fn publish(&self, event: Event) {
        // No subscribers is the common case (no UI attached); that's fine.
        let _ = self.tx.send(event);
    }
}

/// Builds the [`Callbacks`] the packet engine is started with: every
/// transition and error is logged via `tracing` and mirrored onto the event
/// bus for any connected UI client.
pub fn callbacks(bus: EventBus) -> Callbacks {
    let state_bus = bus.clone();
    let error_bus = bus.clone();

    Callbacks {
        on_state_change: Arc::new(move |running| {
            tracing::info!(running, "proxy state changed");
            state_bus.publish(Event::with_data(
                "state",
                EventData {
                    enabled: Some(running),
                    ..Default::default()
                },
            ));
        }),
        query_log: Arc::new(|msg_id, qname| {
            tracing::debug!(msg_id = format!("{msg_id:#06x}"), qname, "resolving query");
        }),
        info_log: Arc::new(|message| {
            tracing::info!(target: "leak_guard", "{message}");
        }),
        error_log: Arc::new(move |message| {
            tracing::error!("{message}");
            error_bus.publish(Event::with_data(
                "error",
                EventData {
                    error: Some(message.to_string()),
                    ..Default::default()
                },
            ));
        }),
    }
}

/// A request surfaced by an IPC client, translated from the raw event
/// vocabulary in §6 of the design notes.
pub enum Command {
    SetEnabled(bool),
    Unrecognized(Event),
}

/// Interprets an inbound [`Event`] as a lifecycle command. Only `state`/
/// `status` events carrying `data.enabled` are meaningful to this binary;
/// everything else (e.g. `configuration`, `updates`) is reported back to the
/// caller so it can decide whether to log and ignore it.
pub fn interpret(event: Event) -> Command {
    let carries_enabled = matches!(event.name.as_str(), "state" | "status");
    match event.data.as_ref().and_then(|d| d.enabled) {
        Some(enabled) if carries_enabled => Command::SetEnabled(enabled),
        _ => Command::Unrecognized(event),
    }
}

/// Runs the IPC accept loop: accepts one client at a time, forwards bus
/// events to it, and turns its incoming frames into [`Command`]s delivered
/// on `commands`. Returns only if the server socket itself fails to bind;
/// per-client errors just cycle back to accepting the next client.
pub async fn run_ipc_server(
    mut server: ipc_events::Server,
    bus: EventBus,
    commands: tokio::sync::mpsc::UnboundedSender<Command>,
) {
    loop {
        let (mut read, mut write) = match server.next_client().await {
            Ok(halves) => halves,
            Err(error) => {
                tracing::error!(%error, "IPC server failed to accept a client");
                return;
            }
        };
        tracing::info!("UI client connected");

        let mut events = bus.subscribe();

        use futures::{SinkExt as _, StreamExt as _};
        loop {
            tokio::select! {
                biased;
                frame = read.next() => {
                    match frame {
                        Some(Ok(event)) => {
                            if commands.send(interpret(event)).is_err() {
                                return; // proxy is shutting down
                            }
                        }
                        Some(Err(error)) => {
                            tracing::warn!(%error, "malformed IPC frame from UI client");
                        }
                        None => break, // client disconnected
                    }
                }
                outgoing = events.recv() => {
                    match outgoing {
                        Ok(event) => {
                            if let Err(error) = write.send(&event).await {
                                tracing::warn!(%error, "failed writing IPC frame to UI client");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "UI client missed events while lagging");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        tracing::info!("UI client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_event_with_enabled_is_a_command() {
        let event = Event::with_data("state", EventData { enabled: Some(true), ..Default::default() });
        assert!(matches!(interpret(event), Command::SetEnabled(true)));
    }

    #[test]
    fn configuration_event_is_unrecognized() {
        let event = Event::with_data("configuration", EventData { configuration: Some("x".into()), ..Default::default() });
        assert!(matches!(interpret(event), Command::Unrecognized(_)));
    }

    #[tokio::test]
    async fn bus_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::new("state"));
    }
}
