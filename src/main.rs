use actix_web::{
    get, http::StatusCode, post, routes, web, App, HttpResponse, HttpServer, ResponseError,
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::sync::Arc;

mod blob_store;
mod config;
mod message_database;
mod store;
#[cfg(test)]
mod testutils;

use config::{Config, ConfigError};
use message_database::{parse_message, ValidationError};
use store::{MessageStore, StoreError};

struct AppState {
    store: Arc<dyn MessageStore>,
}

/// Failures as the HTTP caller sees them: a reason for bad input, nothing
/// beyond a status for everything else.
#[derive(thiserror::Error, Debug)]
enum ApiError {
    #[error("{0}")]
    Invalid(#[from] ValidationError),
    #[error("Could not store or load messages")]
    Store(#[from] StoreError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

#[routes]
#[get("/messages")]
// Path served by the previous hosted deployment.
#[get("/api/GetMessages")]
async fn get_messages(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let messages = data
        .store
        .list()
        .await
        .inspect_err(|e| error!(error = %e, "could not list messages"))?;

    Ok(HttpResponse::Ok().json(messages))
}

#[routes]
#[post("/message")]
#[post("/api/SendMessage")]
async fn post_message(
    body: web::Bytes,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let message =
        parse_message(&body).inspect_err(|e| info!(reason = %e, "rejected message"))?;

    info!(user = %message.user, "got message");

    let messages = data
        .store
        .append(message)
        .await
        .inspect_err(|e| error!(error = %e, "could not store message, dropping it"))?;

    Ok(HttpResponse::Ok().json(messages))
}

fn services(cfg: &mut web::ServiceConfig) {
    cfg.service(get_messages).service(post_message);
}

#[derive(Parser)]
#[command(about = "Relays short chat messages between clients")]
struct Cli {
    /// YAML config file. Without one, messages are kept in memory.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[actix_web::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let store = store::from_config(&config.store)?;
    let app_data = web::Data::new(AppState { store });

    info!(
        host = %config.listener.host,
        port = config.listener.port,
        store = config.store.kind(),
        "starting chat relay"
    );

    HttpServer::new(move || App::new().app_data(app_data.clone()).configure(services))
        .bind((config.listener.host.as_str(), config.listener.port))?
        .run()
        .await?;

    Ok(())
}
