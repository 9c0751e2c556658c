mod config;
mod db;
mod error;
mod metrics;
mod paths;
mod routes;
mod services;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use reqwest::Client;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, ServerEnv};
use crate::paths::InstancePaths;
use crate::services::{
    catalog::CatalogService,
    epg::{spawn_epg_updater, EpgHandler},
    pool::{spawn_poolboy, AcePool},
    quality::QualityTracker,
    remote_settings::spawn_remote_settings,
    scraper::{spawn_scraper, AceScraper},
    token::StreamTokenVerifier,
};

/// Application state shared across handlers and background tasks
pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub paths: InstancePaths,
    pub db: SqlitePool,
    pub http: Client,
    pub pool: Arc<AcePool>,
    pub quality: QualityTracker,
    pub catalog: CatalogService,
    pub tokens: StreamTokenVerifier,
    pub epg: Arc<EpgHandler>,
    pub scraper: Arc<AceScraper>,
    pub external_url: String,
    pub admin_key: String,
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ace_gateway=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server_env = ServerEnv::from_env();

    tracing::info!("Starting Ace Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Instance directory layout
    let paths = InstancePaths::new(server_env.instance_dir.clone());
    paths.ensure_dirs()?;

    // One active instance per instance directory
    acquire_instance_lock(&paths)?;

    // Load configuration
    let app_config = match AppConfig::load(&paths, &server_env) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            release_instance_lock(&paths);
            std::process::exit(1);
        }
    };
    app_config.save(&paths)?;

    tracing::info!("Instance dir: {}", paths.instance_dir().display());
    tracing::info!("External URL: {}", app_config.external_url);
    tracing::info!("Engine address: {}", app_config.app.ace_address);

    // Database
    let db = db::create_pool(&paths.database_file()).await?;
    db::run_migrations(&db).await?;
    tracing::info!("SQLite ready");

    // One shared HTTP client; every call sets its own total timeout
    let http = Client::builder()
        .user_agent(format!("ace-gateway/{}", env!("CARGO_PKG_VERSION")))
        .build()?;

    // Services
    let shutdown = CancellationToken::new();
    let catalog = CatalogService::new(db.clone());
    let quality = QualityTracker::new(db.clone());
    let tokens = StreamTokenVerifier::new(db.clone());

    let pool = Arc::new(AcePool::new(
        http.clone(),
        app_config.app.ace_address.clone(),
        app_config.app.ace_max_streams,
        app_config.app.transcode_audio,
        app_config.external_url.clone(),
    ));

    let epg = Arc::new(EpgHandler::new(http.clone(), paths.epg_data_dir()));
    epg.set_sources(&app_config.epgs).await;

    let scraper = Arc::new(AceScraper::new(
        http.clone(),
        paths.scraper_cache_dir(),
        paths.tvg_logos_dir(),
        app_config.app.ace_address.clone(),
        db.clone(),
        catalog.clone(),
        Arc::clone(&epg),
        app_config.scraper.clone(),
    ));

    let external_url = app_config.external_url.clone();
    let state = Arc::new(AppState {
        config: RwLock::new(app_config),
        paths: paths.clone(),
        db,
        http,
        pool: Arc::clone(&pool),
        quality,
        catalog,
        tokens,
        epg: Arc::clone(&epg),
        scraper: Arc::clone(&scraper),
        external_url,
        admin_key: server_env.admin_key.clone(),
        shutdown: shutdown.clone(),
        start_time: Instant::now(),
    });

    // Long-lived tasks
    spawn_poolboy(pool, shutdown.clone());
    spawn_scraper(scraper, shutdown.clone());
    spawn_epg_updater(epg, shutdown.clone());
    spawn_remote_settings(Arc::clone(&state), shutdown.clone());
    tracing::info!("Background tasks started");

    // Build router
    let app = Router::new()
        // Health endpoints
        .route("/health", get(routes::health::health))
        .route("/metrics", get(routes::health::metrics))
        // HLS reverse proxy
        .route("/hls/:path", get(routes::hls::hls_playlist))
        .route("/hls/m/*path", get(routes::hls::hls_multistream))
        .route("/hls/c/*path", get(routes::hls::hls_content))
        .route("/ace/c/*path", get(routes::hls::ace_content))
        .route("/tvg-logo/:path", get(routes::hls::tvg_logo))
        // IPTV output
        .route("/iptv", get(routes::iptv::iptv_playlist))
        .route("/iptv.m3u", get(routes::iptv::iptv_playlist))
        .route("/iptv.m3u8", get(routes::iptv::iptv_playlist))
        .route("/epg.xml", get(routes::iptv::epg_xml))
        // Xtream Codes surface
        .route("/player_api.php", get(routes::xc::player_api))
        .route("/get.php", get(routes::xc::get_php))
        .route("/xmltv.php", get(routes::xc::xmltv_php))
        .route(
            "/live/:username/:password/:xc_stream",
            get(routes::hls::xc_stream),
        )
        .route("/:username/:password/:xc_stream", get(routes::hls::xc_stream))
        // Management surface
        .route("/api/config", get(routes::admin::get_config).put(routes::admin::put_config))
        .route(
            "/api/scraper/sources",
            get(routes::admin::get_sources).post(routes::admin::add_source),
        )
        .route(
            "/api/scraper/sources/:name",
            delete(routes::admin::remove_source),
        )
        .route(
            "/api/overrides/:content_id",
            put(routes::admin::put_override).delete(routes::admin::delete_override),
        )
        .route(
            "/api/remote-settings",
            get(routes::admin::get_remote_settings).put(routes::admin::put_remote_settings),
        )
        .route("/api/pool", get(routes::admin::get_pool))
        .route("/api/pool/stats/pid/:pid", get(routes::admin::pool_stats_by_pid))
        .route(
            "/api/pool/stats/content/:content_id",
            get(routes::admin::pool_stats_by_content_id),
        )
        .route("/api/pool/:content_id", delete(routes::admin::delete_pool_entry))
        .route("/api/quality/recheck", post(routes::admin::start_quality_recheck))
        .route("/api/epg/health", get(routes::admin::epg_health))
        .route("/api/epg/mappings", get(routes::admin::epg_mappings))
        .route("/api/streams", get(routes::admin::get_streams))
        .route("/api/streams/:content_id", delete(routes::admin::delete_stream))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], server_env.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    shutdown_signal.cancel();
                }
                _ = shutdown_signal.cancelled() => {}
            }
        })
        .await?;

    release_instance_lock(&paths);
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Refuse to start while another live process holds the instance lock.
/// A lock left by a dead process is reclaimed with a warning.
fn acquire_instance_lock(paths: &InstancePaths) -> anyhow::Result<()> {
    let lock_file = paths.lock_file();

    if lock_file.is_file() {
        let previous_pid = std::fs::read_to_string(&lock_file)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok());

        if let Some(pid) = previous_pid {
            if std::path::Path::new(&format!("/proc/{pid}")).exists() {
                anyhow::bail!(
                    "Another gateway instance (pid {}) already owns {}; this service does not \
                     support multiple instances per instance directory",
                    pid,
                    lock_file.display()
                );
            }
        }
        tracing::warn!(
            "Stale lock file found at {}, previous run did not shut down cleanly",
            lock_file.display()
        );
    }

    std::fs::write(&lock_file, std::process::id().to_string())?;
    Ok(())
}

fn release_instance_lock(paths: &InstancePaths) {
    let _ = std::fs::remove_file(paths.lock_file());
}
