//! `ble-session`: drives the session core against the system Bluetooth adapter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ble_session_core::config::{CONFIG_FILE_NAME, SessionConfig};
use ble_session_core::core::bluetooth::{BluestRadio, ConnectionState, SessionEvent, event_queues};
use ble_session_core::logging::init_logging;
use ble_session_core::settings::LogSettingsNavigator;
use ble_session_core::store::{JsonFileStore, KeyValueStore, MemoryStore};
use ble_session_core::{CoordinatorHandle, SessionCoordinator};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(name = "ble-session", version, about = "Scan, connect and advertise over BLE")]
struct Cli {
    /// Path to the session config file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan and print the device list as it changes
    Scan {
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
    /// Scan, then connect to the device at INDEX and print received data until Ctrl-C
    Connect {
        index: usize,
        #[arg(short, long, default_value_t = 5)]
        scan_seconds: u64,
        /// Text to write to the subscribed characteristic once ready
        #[arg(short, long)]
        write: Option<String>,
    },
    /// Start advertising the configured local service
    Advertise,
}

fn print_event(event: &SessionEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize event: {}", e),
    }
}

/// Prints events until `duration` elapses, or forever when it is `None`.
async fn print_events(events: &mut broadcast::Receiver<SessionEvent>, duration: Option<Duration>) {
    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    loop {
        let next = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, events.recv()).await.ok(),
                None => Some(events.recv().await),
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return;
            }
            next = next => match next {
                None => return,
                Some(Ok(event)) => print_event(&event),
                Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!("Skipped {} events", skipped)
                }
                Some(Err(broadcast::error::RecvError::Closed)) => return,
            },
        }
    }
}

async fn run(cli: Cli, handle: &CoordinatorHandle, mut events: broadcast::Receiver<SessionEvent>) -> Result<()> {
    match cli.command {
        Commands::Scan { seconds } => {
            print_events(&mut events, Some(Duration::from_secs(seconds))).await;
            handle.stop_scan().await?;
        }
        Commands::Connect {
            index,
            scan_seconds,
            write,
        } => {
            print_events(&mut events, Some(Duration::from_secs(scan_seconds))).await;
            let id = handle.select_peripheral(index).await?;
            info!("Connecting to {}", id);
            if let Some(text) = write {
                loop {
                    let event = events.recv().await?;
                    print_event(&event);
                    if let SessionEvent::ConnectionStateChanged { state, .. } = event {
                        if state.is_terminal() {
                            return Ok(());
                        }
                        if state == ConnectionState::Ready {
                            break;
                        }
                    }
                }
                let snapshot = handle.snapshot().await?;
                if let Some(characteristic) = snapshot.session.and_then(|s| s.discovered_characteristic_id) {
                    handle.write(characteristic, text.into_bytes()).await?;
                }
            }
            print_events(&mut events, None).await;
            handle.disconnect().await?;
        }
        Commands::Advertise => {
            if let Err(e) = handle.start_advertising().await {
                error!("Advertising unavailable: {}", e);
            }
            print_events(&mut events, None).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, None);

    let config = SessionConfig::load_config(&cli.config).await?;
    let store: Arc<dyn KeyValueStore> = match &config.store_path {
        Some(path) => Arc::new(JsonFileStore::open(path).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let (sinks, queues) = event_queues(config.event_queue_capacity);
    let radio = Arc::new(BluestRadio::new(sinks).await?);
    let coordinator = SessionCoordinator::new(radio, store, Arc::new(LogSettingsNavigator), config)?;
    let events = coordinator.subscribe();
    let (handle, task) = coordinator.spawn(queues);

    let result = run(cli, &handle, events).await;
    handle.shutdown();
    if let Err(e) = task.await {
        error!("Coordinator task failed: {}", e);
    }
    result
}
