use planpoker_bot::{
    config::BotConfig,
    db::{PgActionRegistry, PgEntityStore, PgSessionStore},
    handlers::BotApp,
    notifier::{LogNotifier, Notifier, Outbox},
    telegram::{Poller, TelegramClient},
};
use planpoker_conversation::{
    ActionRegistry, InMemoryActionRegistry, InMemorySessionStore, SessionStore,
};
use planpoker_estimation::{InMemoryEntityStore, Stores};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pause after a failed `getUpdates` call.
const POLL_BACKOFF: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = BotConfig::from_env().expect("failed to load configuration");
    tracing::info!(dry_run = config.dry_run, "Loaded configuration");

    let (sessions, actions, stores): (Arc<dyn SessionStore>, Arc<dyn ActionRegistry>, Stores) =
        match &config.database {
            Some(database) => {
                let pool = PgPoolOptions::new()
                    .max_connections(database.max_connections)
                    .connect(&database.url)
                    .await
                    .expect("failed to connect to database");

                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .expect("failed to run migrations");

                (
                    Arc::new(PgSessionStore::new(pool.clone())),
                    Arc::new(PgActionRegistry::new(pool.clone())),
                    Stores::from_backend(Arc::new(PgEntityStore::new(pool))),
                )
            }
            None => {
                tracing::warn!("No database configured, state is kept in memory");
                (
                    Arc::new(InMemorySessionStore::new()),
                    Arc::new(InMemoryActionRegistry::new()),
                    Stores::from_backend(Arc::new(InMemoryEntityStore::new())),
                )
            }
        };

    let client = Arc::new(
        TelegramClient::new(&config.telegram).expect("failed to build Telegram client"),
    );
    let bot_id = client.bot_id().await.expect("failed to identify the bot");
    tracing::info!(bot_id, "Connected to Telegram");

    let notifier: Arc<dyn Notifier> = if config.dry_run {
        Arc::new(LogNotifier)
    } else {
        client.clone()
    };
    let (outbox, outbox_worker) = Outbox::spawn(notifier.clone(), config.outbox_capacity);
    let app = BotApp::new(sessions, actions, stores, notifier, outbox);

    let mut poller = Poller::new(bot_id);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            batch = poller.next_batch(&client) => match batch {
                Ok(events) => {
                    for event in events {
                        let app = app.clone();
                        tokio::spawn(async move { app.handle(event).await });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch updates");
                    tokio::time::sleep(POLL_BACKOFF).await;
                }
            },
        }
    }

    // The outbox worker finishes once the last app clone is gone.
    drop(app);
    if let Err(e) = outbox_worker.await {
        tracing::warn!(error = %e, "Outbox worker ended abnormally");
    }
}
