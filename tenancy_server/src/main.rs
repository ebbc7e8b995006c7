//! Tenancy server: admin and tenant routes over the PostgreSQL tenant store.
//!
//! Run from repo root: `cargo run -p tenancy-server`

use std::sync::Arc;
use std::time::Duration;
use tenancy_core::sql::Ident;
use tenancy_core::state::SharedStore;
use tenancy_core::{
    admin_routes, common_routes_with_ready, ensure_tenant_tables, logging, tenant_routes, AppState,
    CachingTenantStore, PgTenantStore, TenancyConfig,
};
use tokio::net::TcpListener;

const EXPIRE_TRIALS_EVERY: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TenancyConfig::load()?;
    logging::init_tracing("tenancy_core=info,tenancy_server=info");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let schema = Ident::new(&config.schema)?;
    ensure_tenant_tables(&pool, &schema).await?;

    let store: SharedStore = Arc::new(CachingTenantStore::new(
        PgTenantStore::new(pool.clone(), &schema)?,
        config.cache_ttl,
    ));
    let state = AppState::new(store, &config, Some(pool));

    let service = state.service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EXPIRE_TRIALS_EVERY);
        loop {
            ticker.tick().await;
            if let Err(e) = service.expire_trials(chrono::Utc::now()).await {
                tracing::error!(error = %e, "trial expiry run failed");
            }
        }
    });

    let app = common_routes_with_ready(state.clone())
        .nest("/admin", admin_routes(state.clone()))
        .merge(tenant_routes(state));

    let bind = std::env::var("TENANCY_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!("tenancy server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
