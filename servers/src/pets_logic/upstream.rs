use crate::pets_logic::config::Settings;
use crate::pets_logic::state::AppState;
use lib_common::core::IngestOutcome;
use lib_common::ingestors::discord_gateway::DEFAULT_INTENTS;
use lib_common::ingestors::{DiscordGatewayIngestor, GatewayConfig, GatewayEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{self, JoinHandle};

// Gateway events waiting for the ingestion loop
const EVENT_BUFFER: usize = 256;

pub fn gateway_config(settings: &Settings) -> GatewayConfig {
    GatewayConfig {
        gateway_url: settings.gateway_url.clone(),
        token: settings.discord_token.clone(),
        intents: DEFAULT_INTENTS,
        reconnect_delay: settings.reconnect_delay,
    }
}

/// Runs the gateway client and feeds its events, one at a time, into the
/// tracker. Returns when the client stops.
pub async fn run(settings: Settings, app_state: AppState, shutdown: broadcast::Receiver<()>) {
    let (events_tx, events_rx) = mpsc::channel::<GatewayEvent>(EVENT_BUFFER);
    let ingestor = DiscordGatewayIngestor::new(gateway_config(&settings), events_tx);

    // The ingestor owns the only sender, so the consumer ends once it is dropped.
    let producer = async move {
        ingestor.run(shutdown).await;
    };

    let consumer = spawn_consumer(app_state, events_rx);

    let ((), consumed) = tokio::join!(producer, consumer);
    if let Err(e) = consumed {
        log::error!("Ingestion consumer failed: {}", e);
    }
    log::info!("Upstream ingestion stopped.");
}

/// Drains `events` on a blocking thread, since every insert ends in an
/// fsynced snapshot write. Events are handled strictly in arrival order.
pub fn spawn_consumer(app_state: AppState, mut events: mpsc::Receiver<GatewayEvent>) -> JoinHandle<()> {
    task::spawn_blocking(move || {
        while let Some(event) = events.blocking_recv() {
            handle_event(&app_state, event);
        }
    })
}

pub fn handle_event(app_state: &AppState, event: GatewayEvent) {
    match event {
        GatewayEvent::Ready { user } => {
            log::info!("Logged in to Discord as {}", user);
            log::info!("Monitoring channel: {}", app_state.tracker().source_channel());
            app_state.mark_ready();
        }
        GatewayEvent::Message(message) => {
            for outcome in app_state.tracker().handle_message(&message) {
                match outcome {
                    IngestOutcome::Inserted { persisted: false } => {
                        log::warn!("Record from message {} is tracked in memory only.", message.id);
                    }
                    IngestOutcome::Inserted { persisted: true } => {
                        log::debug!("Record from message {} tracked and saved.", message.id);
                    }
                    IngestOutcome::Duplicate | IngestOutcome::NoMatch => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_common::core::{BoundedStore, Embed, FieldExtractor, InboundMessage, JsonFileStore, RawField, Tracker};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn app_state(dir: &std::path::Path) -> AppState {
        let tracker = Tracker::new(
            FieldExtractor::default(),
            Arc::new(BoundedStore::new(20)),
            Arc::new(JsonFileStore::new(dir.join("pet_servers.json"))),
            "1411527848585330850",
        );
        AppState::new(Arc::new(tracker), Duration::from_secs(900))
    }

    fn pet_message(channel_id: &str, name: &str, job_id: &str) -> InboundMessage {
        InboundMessage {
            id: "1411527848585330851".to_string(),
            channel_id: channel_id.to_string(),
            timestamp: None,
            embeds: vec![Embed {
                fields: vec![
                    RawField::new("🏷️ Name", name, true),
                    RawField::new("🆔 Job ID", job_id, false),
                ],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_ready_event_marks_state_ready() {
        let dir = tempdir().unwrap();
        let state = app_state(dir.path());
        assert!(!state.is_ready());

        handle_event(&state, GatewayEvent::Ready { user: "tracker-bot".to_string() });
        assert!(state.is_ready());
    }

    #[test]
    fn test_message_events_reach_the_store_and_the_snapshot() {
        let dir = tempdir().unwrap();
        let state = app_state(dir.path());

        handle_event(&state, GatewayEvent::Message(pet_message("1411527848585330850", "Dragon", "job-1")));
        handle_event(&state, GatewayEvent::Message(pet_message("1411527848585330850", "Dragon", "job-1")));
        handle_event(&state, GatewayEvent::Message(pet_message("999", "Cat", "job-2")));

        let all = state.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Dragon");
        assert!(dir.path().join("pet_servers.json").exists());
    }

    #[test]
    fn test_gateway_config_follows_settings() {
        let settings = Settings {
            port: 8080,
            log_dir: "./logs".into(),
            log_level: "info".to_string(),
            discord_token: "abc".to_string(),
            channel_id: "1".to_string(),
            gateway_url: "ws://127.0.0.1:1".to_string(),
            store_path: "./pet_servers.json".into(),
            capacity: 20,
            recent_window: Duration::from_secs(900),
            reconnect_delay: Duration::from_millis(250),
            job_id_precedence: Default::default(),
            config_file: crate::pets_logic::config::ConfigFile::Missing("server_pets.conf".into()),
        };

        let config = gateway_config(&settings);
        assert_eq!(config.token, "abc");
        assert_eq!(config.gateway_url, "ws://127.0.0.1:1");
        assert_eq!(config.intents, DEFAULT_INTENTS);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_consumer_drains_events_off_the_runtime() {
        let dir = tempdir().unwrap();
        let state = app_state(dir.path());
        let (tx, rx) = mpsc::channel(4);
        let consumer = spawn_consumer(state.clone(), rx);

        tx.send(GatewayEvent::Ready { user: "tracker-bot".to_string() }).await.unwrap();
        tx.send(GatewayEvent::Message(pet_message("1411527848585330850", "Dragon", "job-1"))).await.unwrap();
        tx.send(GatewayEvent::Message(pet_message("1411527848585330850", "Owl", "job-2"))).await.unwrap();
        drop(tx);

        consumer.await.unwrap();
        assert!(state.is_ready());
        let names: Vec<String> = state.all().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Dragon", "Owl"]);
        assert!(dir.path().join("pet_servers.json").exists());
    }
}
