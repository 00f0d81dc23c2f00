use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shop_api::{
    config::AppConfig,
    create_app,
    db::{create_orm_conn, run_migrations},
    limiter::spawn_sweeper,
    notification::{LogNotifier, Notifier},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shop_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let notifier = Notifier::new(Arc::new(LogNotifier));
    let state = AppState::new(orm, &config.rate_limit, notifier, config.jwt_secret.clone());
    spawn_sweeper(
        state.limiters.clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)),
    );

    let app = create_app(state);

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    tracing::info!("listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
