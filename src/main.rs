use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;

use dx_replica::logging::init_logging;
use dx_replica::models::{Admin, Booking, Feedback, Food, User};
use dx_replica::{
    server, CancelSignal, ChangeBroadcastBridge, EntitySynchronizer, PushHub, PushTransport,
    RemoteStoreClient, ReplicaConfig, StreamListener,
};

#[derive(Parser)]
#[command(name = "replica")]
#[command(about = "Realtime read replica of a remote document store with WebSocket push", version)]
#[command(after_help = "Configuration:
  --config <file>         TOML file with [store], [sync], [server] and [logging] sections
  REPLICA_DATABASE_URL    overrides store.base_url
  REPLICA_AUTH_TOKEN      overrides store.auth_token
  REPLICA_PORT            overrides server.port
  RUST_LOG                overrides logging.level

Channels pushed by `serve` (WebSocket at /hubs/<channel>):
  FoodsUpdated            food
  UsersUpdated            users
  FeedbacksUpdated        feedback
  BookingsUpdated         booking
  AdminsUpdated           adminAccounts")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "replica.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror all collections and push changes to WebSocket clients
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the current content of a remote collection
    Snapshot { collection: String },

    /// Print change events of a remote collection as they arrive
    Watch { collection: String },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ReplicaConfig::load(Some(&cli.config))?;
    let _log_guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            println!(
                "{}",
                format!("🌐 Mirroring {} ...", config.store.base_url)
                    .cyan()
                    .bold()
            );
            serve(config).await?;
        }

        Commands::Snapshot { collection } => {
            let client = RemoteStoreClient::new(config.store.clone())?;
            let body = client.get(&collection, &[]).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Watch { collection } => {
            let client = RemoteStoreClient::new(config.store.clone())?;
            let timing = config.timing();
            let listener = StreamListener::new(client, collection.clone(), timing.reconnect_delay)
                .with_idle_timeout(timing.stream_idle_timeout);
            let cancel = cancel_on_ctrl_c();

            println!(
                "{} Watching {} (Ctrl+C to stop)",
                "👁".cyan(),
                collection.bright_white()
            );
            listener
                .start(&cancel, |event| {
                    println!(
                        "{} {} {}",
                        format!("{:?}", event.kind).yellow(),
                        event.scope.to_string().bright_blue(),
                        event.payload
                    );
                })
                .await;
        }
    }

    Ok(())
}

fn cancel_on_ctrl_c() -> CancelSignal {
    let cancel = CancelSignal::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });
    cancel
}

async fn serve(config: ReplicaConfig) -> Result<()> {
    let client = RemoteStoreClient::new(config.store.clone())?;
    let timing = config.timing();
    let addr: SocketAddr = config
        .server
        .addr()
        .parse()
        .with_context(|| format!("invalid server address {}", config.server.addr()))?;

    let hub = PushHub::new();
    let transport: Arc<dyn PushTransport> = Arc::new(hub.clone());
    let shutdown = CancelSignal::new();

    let foods = EntitySynchronizer::<Food>::new(client.clone(), timing);
    let users = EntitySynchronizer::<User>::new(client.clone(), timing);
    let feedback = EntitySynchronizer::<Feedback>::new(client.clone(), timing);
    let bookings = EntitySynchronizer::<Booking>::new(client.clone(), timing);
    let admins = EntitySynchronizer::<Admin>::new(client, timing);

    let bridges = vec![
        ChangeBroadcastBridge::start(foods.clone(), transport.clone(), "FoodsUpdated").await,
        ChangeBroadcastBridge::start(users.clone(), transport.clone(), "UsersUpdated").await,
        ChangeBroadcastBridge::start(feedback.clone(), transport.clone(), "FeedbacksUpdated").await,
        ChangeBroadcastBridge::start(bookings.clone(), transport.clone(), "BookingsUpdated").await,
        ChangeBroadcastBridge::start(admins.clone(), transport, "AdminsUpdated").await,
    ];

    foods.start_listening(&shutdown);
    users.start_listening(&shutdown);
    feedback.start_listening(&shutdown);
    bookings.start_listening(&shutdown);
    admins.start_listening(&shutdown);

    let result = tokio::select! {
        result = server::start(addr, hub) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("{}", "Shutting down...".yellow());
            Ok(())
        }
    };

    shutdown.cancel();
    for bridge in &bridges {
        bridge.stop();
    }
    result
}
