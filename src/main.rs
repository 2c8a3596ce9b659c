use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use booking_server::config::Config;
use booking_server::db::create_pool;
use booking_server::routes::create_routes;
use booking_server::services::notifier::DEFAULT_QUEUE_CAPACITY;
use booking_server::services::{Mailer, Notifier};
use booking_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("booking_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Migrations run successfully");

    let mailer = Mailer::new(&config.email)?;
    let (notifier, _worker) = Notifier::spawn(mailer, config.event.clone(), DEFAULT_QUEUE_CAPACITY);

    let addr = config.socket_addr();
    let state = AppState::new(config, pool, notifier)?;
    let app = create_routes(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server running at http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
