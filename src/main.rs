use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::http::header;
use chrono::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use turnosplus_server::clock::{Clock, SystemClock};
use turnosplus_server::config::Config;
use turnosplus_server::db;
use turnosplus_server::lifecycle::AppointmentService;
use turnosplus_server::models::AppState;
use turnosplus_server::policy::PolicyConfig;
use turnosplus_server::routes;
use turnosplus_server::store::postgres::PgAppointmentStore;
use turnosplus_server::sweeper::ExpirySweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(PgAppointmentStore::new(pool.clone()));
    let policy = PolicyConfig {
        max_active_per_patient: cfg.max_active_appointments,
        cancel_cutoff: Duration::hours(cfg.cancel_cutoff_hours),
        modify_window: Duration::hours(cfg.modify_window_hours),
    };
    let appointments = AppointmentService::new(store, clock.clone(), policy);

    let sweeper = ExpirySweeper::new(
        appointments.clone(),
        clock.clone(),
        Duration::hours(cfg.no_show_grace_hours),
        StdDuration::from_secs(cfg.sweep_interval_minutes * 60),
    );
    tokio::spawn(sweeper.run());

    let state = AppState {
        db: pool,
        appointments,
        session_ttl_hours: cfg.session_ttl_hours,
    };

    // Browser/WebView clients call the API cross-origin; without this the
    // OPTIONS preflight 405s and blocks POST /auth/login.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
