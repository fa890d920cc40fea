use futures_util::{SinkExt, StreamExt};
use lib_common::core::{BoundedStore, FieldExtractor, IngestOutcome, JsonFileStore, Tracker};
use lib_common::ingestors::discord_gateway::DEFAULT_INTENTS;
use lib_common::ingestors::{DiscordGatewayIngestor, GatewayConfig, GatewayEvent};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::protocol::Message};

const CHANNEL: &str = "1411527848585330850";
const WAIT: Duration = Duration::from_secs(5);

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("gateway client went away: {:?}", other),
        }
    }
}

fn pet_message(id: &str, channel_id: &str, name: &str, job_id: &str) -> Value {
    json!({
        "id": id,
        "channel_id": channel_id,
        "timestamp": "2026-10-19T12:00:00.000000+00:00",
        "content": "",
        "embeds": [{
            "title": "Brainrot Notify",
            "fields": [
                { "name": "🏷️ Name", "value": name, "inline": true },
                { "name": "📈 Generation", "value": "$150K/s", "inline": true },
                { "name": "🆔 Job ID (PC)", "value": job_id, "inline": false },
                { "name": "🔗 Join Link", "value": "[Click to Join](https://example.com/join?job=abc)", "inline": false }
            ]
        }]
    })
}

/// Accepts one client, walks it through HELLO and IDENTIFY, then pushes the
/// given dispatches. Returns the IDENTIFY payload it received.
async fn fake_gateway(listener: TcpListener, dispatches: Vec<Value>) -> Value {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": 45000 } })).await;
    let identify = next_json(&mut ws).await;

    for d in dispatches {
        send_json(&mut ws, d).await;
    }
    // Close with an ordinary code; the client is expected to reconnect, not stop.
    let _ = ws.close(None).await;
    identify
}

fn dispatch(seq: u64, event: &str, d: Value) -> Value {
    json!({ "op": 0, "s": seq, "t": event, "d": d })
}

#[tokio::test]
async fn gateway_dispatches_reach_the_tracker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let gateway = tokio::spawn(fake_gateway(
        listener,
        vec![
            dispatch(1, "READY", json!({ "user": { "username": "pet-watcher" } })),
            dispatch(2, "MESSAGE_CREATE", pet_message("1411600000000000001", CHANNEL, "🦊 Shadow Fox", "job-a")),
            dispatch(3, "MESSAGE_CREATE", json!({ "id": 7 })),
            dispatch(4, "MESSAGE_CREATE", pet_message("1411600000000000002", "42", "Cat", "job-b")),
            dispatch(5, "MESSAGE_CREATE", pet_message("1411600000000000003", CHANNEL, "🦊 Shadow Fox", "job-a")),
        ],
    ));

    let (events_tx, mut events_rx) = mpsc::channel(16);
    let ingestor = DiscordGatewayIngestor::new(
        GatewayConfig {
            gateway_url: url,
            token: "test-token".to_string(),
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        },
        events_tx,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let client = tokio::spawn(async move { ingestor.run(shutdown_rx).await });

    let identify = timeout(WAIT, gateway).await.unwrap().unwrap();
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "test-token");
    assert_eq!(identify["d"]["intents"], DEFAULT_INTENTS);

    let dir = tempfile::tempdir().unwrap();
    let tracker = Tracker::new(
        FieldExtractor::default(),
        Arc::new(BoundedStore::new(20)),
        Arc::new(JsonFileStore::new(dir.path().join("pet_servers.json"))),
        CHANNEL,
    );

    // READY first, then the three decodable messages; the malformed one is skipped.
    let ready = timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(ready, GatewayEvent::Ready { ref user } if user == "pet-watcher"));

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        match timeout(WAIT, events_rx.recv()).await.unwrap().unwrap() {
            GatewayEvent::Message(message) => outcomes.push(tracker.handle_message(&message)),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(
        outcomes,
        vec![
            vec![IngestOutcome::Inserted { persisted: true }],
            vec![],
            vec![IngestOutcome::Duplicate],
        ]
    );

    let records = tracker.store().snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Shadow Fox");
    assert_eq!(records[0].emoji.as_deref(), Some("🦊"));
    assert_eq!(records[0].generation_metric.as_deref(), Some("$150K/s"));
    assert_eq!(records[0].join_link.as_deref(), Some("https://example.com/join?job=abc"));
    assert_eq!(records[0].message_id.as_deref(), Some("1411600000000000001"));
    assert!(records[0].found_at.is_some());

    let _ = shutdown_tx.send(());
    timeout(WAIT, client).await.unwrap().unwrap();
}

#[tokio::test]
async fn authentication_failure_stops_the_ingestor() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let gateway = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": 45000 } })).await;
        let _identify = next_json(&mut ws).await;
        let frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: 4004.into(),
            reason: "Authentication failed.".into(),
        };
        let _ = ws.close(Some(frame)).await;
    });

    let (events_tx, _events_rx) = mpsc::channel(16);
    let ingestor = DiscordGatewayIngestor::new(
        GatewayConfig {
            gateway_url: url,
            token: "bad-token".to_string(),
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        },
        events_tx,
    );
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // No shutdown is sent: run() has to return on its own.
    timeout(WAIT, ingestor.run(shutdown_rx)).await.unwrap();
    gateway.await.unwrap();
}

async fn accept_and_identify(listener: &TcpListener, heartbeat_interval: u64) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_interval } })).await;
    let identify = next_json(&mut ws).await;
    assert_eq!(identify["op"], 2, "every connection starts with a fresh IDENTIFY");
    ws
}

/// Reads until the client drops the connection, returning the heartbeats seen.
async fn heartbeats_until_dropped(ws: &mut WebSocketStream<TcpStream>) -> usize {
    let mut beats = 0;
    while let Some(Ok(frame)) = ws.next().await {
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["op"], 1);
            beats += 1;
        }
    }
    beats
}

#[tokio::test]
async fn gateway_reconnects_on_every_session_ending_signal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let gateway = tokio::spawn(async move {
        // A server-requested heartbeat is answered with the last sequence, then op 7.
        let mut ws = accept_and_identify(&listener, 45000).await;
        send_json(&mut ws, dispatch(5, "GUILD_CREATE", json!({}))).await;
        send_json(&mut ws, json!({ "op": 1, "d": null })).await;
        assert_eq!(next_json(&mut ws).await, json!({ "op": 1, "d": 5 }));
        send_json(&mut ws, json!({ "op": 7, "d": null })).await;
        let _ = heartbeats_until_dropped(&mut ws).await;

        // Heartbeats that are never acknowledged make a zombie.
        let mut ws = accept_and_identify(&listener, 100).await;
        let beats = heartbeats_until_dropped(&mut ws).await;
        assert!(beats >= 1, "the client beat before giving up on the connection");

        // INVALID_SESSION.
        let mut ws = accept_and_identify(&listener, 45000).await;
        send_json(&mut ws, json!({ "op": 9, "d": false })).await;
        let _ = heartbeats_until_dropped(&mut ws).await;

        // An ordinary close.
        let mut ws = accept_and_identify(&listener, 45000).await;
        let _ = ws.close(None).await;
        drop(ws);

        // Still coming back after all of the above.
        accept_and_identify(&listener, 45000).await
    });

    let (events_tx, _events_rx) = mpsc::channel(16);
    let ingestor = DiscordGatewayIngestor::new(
        GatewayConfig {
            gateway_url: url,
            token: "test-token".to_string(),
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        },
        events_tx,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let client = tokio::spawn(async move { ingestor.run(shutdown_rx).await });

    let _last = timeout(WAIT, gateway).await.unwrap().unwrap();

    let _ = shutdown_tx.send(());
    timeout(WAIT, client).await.unwrap().unwrap();
}
