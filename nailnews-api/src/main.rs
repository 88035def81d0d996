use config::Env;
use media::LocalMediaStore;
use nailnews_common::snowflake::{Origin, SnowflakePartOutOfRangeError};
use nailnews_db::client::{DbClient, DbError};
use payment::StripeClient;
use server::{ServerSettings, ServerState};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod media;
mod payment;
mod server;

const MAX_DB_CONNECTIONS: u32 = 16;
const PAYMENT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid worker or process id: {0}")]
    Origin(#[from] SnowflakePartOutOfRangeError),
    #[error("Error connecting to the database: {0}")]
    DbConnect(#[from] sqlx::Error),
    #[error("Error preparing the database: {0}")]
    DbMigrate(#[from] DbError),
    #[error("Error building the HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nailnews_api=debug,\
                nailnews_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down");
            shutdown.cancel();
        }
        Err(err) => error!(error = %err, "Could not listen for Ctrl+C"),
    }
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let origin = Origin::new(env.worker_id, env.process_id)?;
    let pool = PgPoolOptions::new()
        .max_connections(MAX_DB_CONNECTIONS)
        .connect(&env.database_url)
        .await?;
    let db_client = Arc::new(DbClient::new(pool, origin));
    db_client.migrate().await?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("nailnews/", env!("CARGO_PKG_VERSION")))
        .timeout(PAYMENT_TIMEOUT)
        .build()?;

    let state = ServerState {
        db_client,
        payments: Arc::new(StripeClient::new(
            http,
            &env.payment_api_base,
            env.payment_secret_key.clone(),
        )),
        media: Arc::new(LocalMediaStore::new(
            env.media_dir.clone(),
            &env.media_base_url,
        )),
        settings: Arc::new(ServerSettings {
            prices: env.price_schedule(),
            currency: env.currency.clone(),
            session_lifetime: env.session_lifetime(),
        }),
    };

    let app = server::routes()
        .nest_service("/files", ServeDir::new(&env.media_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
