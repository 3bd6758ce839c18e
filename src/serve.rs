use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use axum::{Router, extract::FromRef, routing::get};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity, log::LevelFilter};
use figment::{Figment, providers::Format as _};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub use super::error::Error;
use super::{
    config::AppConfig,
    engagement::{EngagementTracker, ViewSessions},
    moderation::ModerationEngine,
    payment::{PaymentGateway, PlatformClient, RelayWallet},
    storage::{ContentStore, SqliteStore},
    submission::{SubmissionTracker, SubmissionWorkflow},
};

/// The application user agent. Concatenates the package name and version. e.g. `pilinks/0.0.0`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// The application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
/// The submission workflow as wired up for the server.
pub type Workflow = SubmissionWorkflow<RelayWallet, PlatformClient, SqliteStore>;

#[derive(Parser, Debug, Clone)]
/// Command line arguments.
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "default.toml")]
    pub config: PathBuf,
    /// The verbosity level.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Clone, FromRef)]
/// The application state, shared across all routes.
pub struct AppState {
    /// The application configuration.
    pub(crate) config: AppConfig,
    /// The post collection.
    pub store: ContentStore<SqliteStore>,
    /// The payment platform's server API. Also verifies access tokens.
    pub platform: PlatformClient,
    /// Wallet callbacks relayed by browsers.
    pub relay: RelayWallet,
    /// Submissions running in the background.
    pub submissions: SubmissionTracker,
    pub workflow: Workflow,
    pub moderation: ModerationEngine<SqliteStore>,
    pub engagement: EngagementTracker<SqliteStore>,
    /// Anonymous viewing sessions, by client address.
    pub views: ViewSessions,
}

impl AppState {
    /// Wire the core services together over `store`.
    pub fn new(config: AppConfig, client: reqwest::Client, store: SqliteStore) -> Self {
        let platform = PlatformClient::new(client, &config.payments);
        let relay = RelayWallet::new();
        let content = ContentStore::new(store.clone());
        let gateway =
            PaymentGateway::new(relay.clone(), platform.clone(), config.payments.timeout());

        Self {
            workflow: SubmissionWorkflow::new(gateway, content.clone(), config.payments.fee),
            moderation: ModerationEngine::new(content.clone()),
            engagement: EngagementTracker::new(store),
            views: ViewSessions::new(),
            store: content,
            platform,
            relay,
            submissions: SubmissionTracker::new(),
            config,
        }
    }
}

/// Build the HTTP router.
pub(crate) fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(super::index))
        .nest("/api", super::endpoints::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the client used for every outbound request.
pub(crate) fn client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build requester client")
}

/// Make sure the directory holding a file-backed SQLite database exists.
async fn ensure_db_dir(url: &str) -> anyhow::Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .map(|p| p.split('?').next().unwrap_or(p))
        .filter(|p| !p.is_empty() && !p.starts_with(":memory:"));

    if let Some(parent) = path.and_then(|p| Path::new(p).parent()) {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    Ok(())
}

/// The main application entry point.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up trace logging to console and account for the user-provided verbosity flag.
    if args.verbosity.log_level_filter() != LevelFilter::Off {
        let lvl = match args.verbosity.log_level_filter() {
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info | LevelFilter::Off => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt().with_max_level(lvl).init();
    }

    if !args.config.exists() {
        // Throw up a warning if the config file does not exist.
        //
        // This is not fatal because users can specify all configuration settings via
        // the environment, but the most likely scenario here is that a user accidentally
        // omitted the config file for some reason (e.g. forgot to mount it into Docker).
        warn!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }

    // Read and parse the user-provided configuration.
    let config: AppConfig = Figment::new()
        .admerge(figment::providers::Toml::file(args.config))
        .admerge(figment::providers::Env::prefixed("LINKS_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if config.payments.api_key.is_empty() {
        warn!("no payment platform API key configured; fee payments will be refused upstream");
    }
    if config.admins.is_empty() {
        warn!("no admins configured; nobody will be able to moderate");
    }

    // Initialize metrics reporting.
    super::metrics::setup(config.metrics.as_ref()).context("failed to set up metrics exporter")?;

    ensure_db_dir(&config.db).await?;
    let store = SqliteStore::open(&config.db)
        .await
        .context("failed to open post database")?;

    let addr = config
        .listen_address
        .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

    let app = app(AppState::new(config, client()?, store));

    info!("listening on {addr}");
    info!("connect to: http://127.0.0.1:{}", addr.port());

    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind address")?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("failed to serve app")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_database_directories() {
        let dir = std::env::temp_dir().join(format!("pilinks-serve-{}", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}/nested/links.db?mode=rwc", dir.display());

        ensure_db_dir(&url).await.unwrap();
        assert!(dir.join("nested").is_dir());

        ensure_db_dir("sqlite::memory:").await.unwrap();
        std::fs::remove_dir_all(dir).unwrap();
    }
}
