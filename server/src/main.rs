use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use mailpulse::config::{default_config_path, load_config, Config};
use mailpulse::db::{default_database_path, Database};
use mailpulse::ingest::{router, AppState};
use mailpulse::{logging, MailpulseError, SyncEventBroadcaster, SyncService, WebhookAuthenticator};

#[derive(Parser, Debug)]
#[command(name = "mailpulse", version, about = "Mailbox push-notification sync server")]
struct Args {
    /// Path to the JSON config file (default: ~/.mailpulse/config.json).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides `server.bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mailpulse: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "mailpulse exited with error");
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(args: &Args) -> Result<Config, MailpulseError> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = match path {
        Some(path) if path.exists() => load_config(&path)?,
        Some(path) if args.config.is_some() => load_config(&path)?,
        _ => Config::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    Ok(config)
}

async fn run(config: Config) -> Result<(), MailpulseError> {
    let db_path = config
        .database
        .path
        .as_ref()
        .map(PathBuf::from)
        .or_else(default_database_path)
        .ok_or_else(|| mailpulse::ConfigError::Validation {
            message: "no database path and no home directory".to_string(),
        })?;
    let db = Database::open(&db_path)?;

    let events = SyncEventBroadcaster::default();
    let service = SyncService::from_config(&config, db, events.clone())?;
    let auth = Arc::new(WebhookAuthenticator::from_config(
        &config.webhook,
        Arc::new(mailpulse::SystemClock),
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = service.lease_reaper().spawn(shutdown_rx);
    let event_log = tokio::spawn(log_events(events.subscribe()));

    let app = router(AppState { service, auth }, &config.webhook.path);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|source| MailpulseError::Bind {
            addr: config.server.bind.clone(),
            source,
        })?;
    info!(
        addr = %config.server.bind,
        path = %config.webhook.path,
        database = %db_path.display(),
        "mailpulse listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .map_err(MailpulseError::Serve);

    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper.await {
        warn!(error = %e, "lease reaper ended abnormally");
    }
    event_log.abort();
    served
}

async fn log_events(mut rx: broadcast::Receiver<mailpulse::SyncEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(target: "mailpulse::events", "{}", json),
                Err(e) => debug!(error = %e, "unserializable event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
