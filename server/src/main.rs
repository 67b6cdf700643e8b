use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use relay_server::broker::memory::MemoryBroker;
use relay_server::broker::outbox::{spawn_outbox_cleanup, OutboxPublisher};
use relay_server::broker::BrokerPublisher;
use relay_server::config::{generate_config_template, Config, StorageBackend};
use relay_server::subscriptions::memory::MemorySubscriptionStore;
use relay_server::subscriptions::sqlite::SqliteSubscriptionStore;
use relay_server::subscriptions::SubscriptionStore;
use relay_server::{db, routes, state};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);

    tracing::info!("Chat relay v{} starting", env!("CARGO_PKG_VERSION"));

    let (store, broker) = open_backends(&config)?;

    // Both backends must be reachable before we accept connections
    store.health_check().await?;
    broker.health_check().await?;
    tracing::info!(
        store = store.backend_name(),
        broker = broker.backend_name(),
        "Storage backends ready"
    );

    let app_state = state::AppState::new(
        store,
        broker,
        config.chat_set_members,
        &config.dispatch(),
        config.keepalive(),
    );

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay_server=info"))
    };

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }
}

/// Open the subscription store and broker for the configured backend.
/// For SQLite this also starts the hourly outbox purge.
fn open_backends(
    config: &Config,
) -> Result<(Arc<dyn SubscriptionStore>, Arc<dyn BrokerPublisher>), BoxError> {
    match config.storage {
        StorageBackend::Sqlite => {
            let db = db::init_db(&config.data_dir)?;
            let outbox = config.outbox();
            spawn_outbox_cleanup(db.clone(), outbox.retention_days, outbox.cleanup_interval_secs);

            let outbox_publisher = OutboxPublisher::new(db.clone(), config.queue_name.clone());
            tracing::info!(
                queue = outbox_publisher.queue(),
                retention_days = outbox.retention_days,
                "Publishing to SQLite outbox"
            );

            let store: Arc<dyn SubscriptionStore> = Arc::new(SqliteSubscriptionStore::new(db));
            let broker: Arc<dyn BrokerPublisher> = Arc::new(outbox_publisher);
            Ok((store, broker))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, subscriptions are lost on restart");
            let store: Arc<dyn SubscriptionStore> = Arc::new(MemorySubscriptionStore::new());
            let broker: Arc<dyn BrokerPublisher> = Arc::new(MemoryBroker::new());
            Ok((store, broker))
        }
    }
}
