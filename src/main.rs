use anyhow::Context;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use axctl_license::billing::BillingClient;
use axctl_license::config::Config;
use axctl_license::db::{self, AppState};
use axctl_license::handlers;
use axctl_license::notify::Notifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    if config.billing_webhook_secret.is_empty() {
        tracing::warn!("BILLING_WEBHOOK_SECRET is not set; webhook verification will reject everything");
    }

    let pool = db::create_pool(&config.database_path).context("failed to open database pool")?;
    {
        let conn = pool.get().context("failed to get connection for schema init")?;
        db::init_schema(&conn).context("failed to initialize schema")?;
    }

    let billing = BillingClient::new(&config);
    let notifier = Notifier::new(config.notify_url.clone());
    let addr = config.addr();

    let state = AppState {
        db: pool,
        config,
        billing,
        notifier,
    };

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("axctl-license listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
