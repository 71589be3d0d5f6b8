use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use scriptura_core::session::LoginThrottle;
use scriptura_core::store::FsChapterStore;
use tracing_subscriber::EnvFilter;

use scriptura_server::app;
use scriptura_server::app::AppState;
use scriptura_server::config::Config;
use scriptura_server::convert;
use scriptura_server::db::Database;
use scriptura_server::mail;
use scriptura_server::timer;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "scriptura-server", about = "Collaborative scripture sync server")]
struct Cli {
    /// Path to the server's TOML config file.
    #[arg(long, default_value = "scriptura-server.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "no config file found, using defaults");
        Config::default()
    };

    let store = Arc::new(FsChapterStore::open(&config.data_dir)?);
    let db = Arc::new(Database::open(&config.database_path)?);
    let notifier: Arc<dyn scriptura_core::notify::Notifier> = if config.smtp.relay.is_empty() {
        Arc::new(scriptura_core::notify::NullNotifier)
    } else {
        Arc::new(mail::SmtpNotifier::new(&config.smtp)?)
    };

    let maintenance_store = store.clone();
    let retention = config.revision_retention;
    let optimize_task = timer::MaintenanceTask::new("optimize-store", 3600, move || {
        if let Err(err) = maintenance_store.optimize(retention) {
            tracing::error!(%err, "store optimization failed");
        }
    });

    let digest_db = db.clone();
    let digest_notifier: Arc<dyn scriptura_core::notify::Notifier> = if config.smtp.relay.is_empty() {
        Arc::new(scriptura_core::notify::NullNotifier)
    } else {
        Arc::new(mail::SmtpNotifier::new(&config.smtp)?)
    };
    let digest_task = timer::MaintenanceTask::new("nightly-digest", 86_400, move || {
        let since = chrono::Utc::now() - chrono::Duration::days(1);
        if let Err(err) = scriptura_core::change::send_nightly_digests(
            digest_db.as_ref(),
            digest_db.as_ref(),
            digest_notifier.as_ref(),
            since,
        ) {
            tracing::error!(%err, "nightly digest failed");
        }
    });

    let _maintenance = timer::spawn(vec![optimize_task, digest_task]);

    let login_throttle = LoginThrottle::new(config.login_cooldown_seconds);
    let state = Arc::new(AppState {
        store,
        db,
        notifier,
        converter: convert::PassthroughConverter,
        login_throttle,
        config: config.clone(),
    });

    let router = app::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_address).await?;
    tracing::info!(address = %config.listen_address, "scriptura-server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
