//! Admin Portal - Entry Point

use admin_portal::{AppState, Config, IdentityProvider, LogFormat, PortalServer, SqliteIdentityStore};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Admin Portal v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: admin-portal");
        println!();
        println!("Environment variables:");
        println!("  PORTAL_BIND_ADDR                 Bind address (default: 127.0.0.1)");
        println!("  PORTAL_PORT                      Port (default: 8080)");
        println!("  PORTAL_DB_PATH                   SQLite path (default: ./admin-portal.db)");
        println!("  PORTAL_AUTH_SECRET               Cookie cache signing secret");
        println!("  PORTAL_TRUSTED_ORIGINS           Comma-separated CORS origins");
        println!("  PORTAL_SECURE_COOKIES            Mark cookies Secure (true/1)");
        println!("  PORTAL_TRUST_PROXY               Rate-limit by X-Forwarded-For (true/1)");
        println!("  PORTAL_SESSION_TTL_SECS          Session lifetime (default: 604800)");
        println!("  PORTAL_COOKIE_CACHE_TTL_SECS     Cookie cache lifetime (default: 300)");
        println!("  PORTAL_POLICY_OVERRIDES          surface=role;... overrides");
        println!("  PORTAL_BOOTSTRAP_ADMIN_EMAIL     Admin created at startup if missing");
        println!("  PORTAL_BOOTSTRAP_ADMIN_PASSWORD");
        println!("  PORTAL_LOG_FORMAT                text (default) or json");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let log_format = LogFormat::from_env()?;
    if log_format == LogFormat::Json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Admin Portal v{}", env!("CARGO_PKG_VERSION"));

    // Subscriber goes up first so config warnings are visible
    let config = Config::from_env()?;

    let store = SqliteIdentityStore::open(&config.db_path)?;
    info!("Identity store at {}", config.db_path.display());
    let provider: Arc<dyn IdentityProvider> = Arc::new(store);

    let state = AppState::new(provider, config.policy.clone(), config.auth_config());

    if let Some(bootstrap) = &config.bootstrap_admin {
        if let Some(user) = state
            .admin
            .bootstrap_admin(&bootstrap.email, &bootstrap.password)
            .await?
        {
            info!("Created bootstrap admin {}", user.email);
        }
    }

    let server = PortalServer::new(config.server.clone(), state);
    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("portal server failed: {}", e))?;

    Ok(())
}
