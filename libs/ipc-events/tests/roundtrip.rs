//! Exercises invariants #8 (round-trip) and #9 (reconnect) and scenario S6
//! against the real platform transport (Unix domain socket on this host).

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use ipc_events::event::EventData;
use ipc_events::{Client, Event, Server, SocketId};

#[tokio::test]
async fn s6_event_round_trips_in_both_directions() {
    let _guard = logging::test("debug");
    const ID: SocketId = SocketId::Test("ROUNDTRIP1");

    let mut server = Server::new(ID).unwrap();
    let server_task = tokio::spawn(async move {
        let (mut rx, mut tx) = server.next_client().await.unwrap();
        tx.send(&Event::with_data("status", EventData { enabled: Some(true), ..Default::default() }))
            .await
            .unwrap();
        let received = rx.next().await.unwrap().unwrap();
        received
    });

    let (callbacks, mut events) = ipc_events::client::ChannelCallbacks::new();
    let client = Client::spawn(ID, Arc::new(callbacks));

    let from_server = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("channel closed");
    assert_eq!(from_server.name, "status");
    assert_eq!(from_server.data.unwrap().enabled, Some(true));

    let configure = Event::with_data("configure", EventData { configuration: Some("abc".into()), ..Default::default() });
    client.send(&configure).await.unwrap();

    let received_by_server = tokio::time::timeout(Duration::from_secs(2), server_task)
        .await
        .expect("server task timed out")
        .expect("server task panicked");
    assert_eq!(received_by_server, configure);

    client.dispose().await;
}

#[tokio::test]
async fn client_reconnects_after_server_drops_stream() {
    let _guard = logging::test("debug");
    const ID: SocketId = SocketId::Test("RECONNECT1");

    let mut server = Server::new(ID).unwrap();

    let (callbacks, mut events) = ipc_events::client::ChannelCallbacks::new();
    let client = Client::spawn(ID, Arc::new(callbacks));

    {
        let (_rx, mut tx) = server.next_client().await.unwrap();
        tx.send(&Event::new("status")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        // `tx`/`_rx` drop here, closing the stream from the server side.
    }

    // A second client connection should complete without external help.
    let (_rx, mut tx) = tokio::time::timeout(Duration::from_secs(2), server.next_client())
        .await
        .expect("server timed out waiting for reconnect")
        .unwrap();
    tx.send(&Event::new("status")).await.unwrap();

    let second = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("client did not receive event after reconnect")
        .unwrap();
    assert_eq!(second.name, "status");

    client.dispose().await;
}
