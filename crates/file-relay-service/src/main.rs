use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use file_relay_api::{
    DeliveryTarget, MessageDeleter, RelayConfig, RelayService, ScheduledAction, UploadRequest,
    API_CONTRACT_VERSION, DEFAULT_STORE_PATH,
};
use file_relay_core::{ContentKind, Handle, Record, RelayError};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const BOT_API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ServiceState {
    relay: RelayService,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
    message: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    records: usize,
}

#[derive(Debug, Clone, Serialize)]
struct UploadResponse {
    handle: Handle,
    display_name: String,
    content_kind: ContentKind,
    deduplicated: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TargetRequest {
    chat_id: i64,
    message_id: i64,
}

#[derive(Debug, Parser)]
#[command(name = "file-relay-service")]
#[command(about = "HTTP front end for the file relay record catalog")]
struct Args {
    #[arg(long, env = "RELAY_STORE", default_value = DEFAULT_STORE_PATH)]
    db: PathBuf,
    #[arg(long, env = "RELAY_BIND", default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,
    #[arg(long, env = "BOT_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,
}

impl From<RelayError> for ServiceError {
    fn from(err: RelayError) -> Self {
        let status = match &err {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::DuplicateHandle(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::ActionDeliveryFailed(_) => StatusCode::BAD_GATEWAY,
        };
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: err.to_string(),
            message: err.user_message(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

/// Removes messages through the Bot API `deleteMessage` method.
struct BotApiDeleter {
    agent: ureq::Agent,
    endpoint: String,
}

impl BotApiDeleter {
    fn new(api_base: &str, token: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(BOT_API_TIMEOUT)
            .timeout_read(BOT_API_TIMEOUT)
            .timeout_write(BOT_API_TIMEOUT)
            .build();
        let endpoint = format!("{}/bot{token}/deleteMessage", api_base.trim_end_matches('/'));
        Self { agent, endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct BotApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

fn bot_api_failure(reply: BotApiReply) -> RelayError {
    RelayError::ActionDeliveryFailed(
        reply.description.unwrap_or_else(|| "deleteMessage was rejected".to_string()),
    )
}

#[async_trait]
impl MessageDeleter for BotApiDeleter {
    async fn delete_message(&self, target: &DeliveryTarget) -> Result<(), RelayError> {
        let request = self.agent.post(&self.endpoint);
        let body = serde_json::json!({
            "chat_id": target.chat_id,
            "message_id": target.message_id,
        });

        let outcome = tokio::task::spawn_blocking(move || match request.send_json(body) {
            Ok(response) => response
                .into_json::<BotApiReply>()
                .map_err(|err| RelayError::ActionDeliveryFailed(format!("bad reply: {err}"))),
            Err(ureq::Error::Status(code, response)) => match response.into_json::<BotApiReply>() {
                Ok(reply) => Err(bot_api_failure(reply)),
                Err(_) => Err(RelayError::ActionDeliveryFailed(format!("http status {code}"))),
            },
            Err(ureq::Error::Transport(err)) => {
                Err(RelayError::ActionDeliveryFailed(format!("transport error: {err}")))
            }
        })
        .await
        .map_err(|err| RelayError::ActionDeliveryFailed(format!("delete task failed: {err}")))?;

        let reply = outcome?;
        if reply.ok {
            Ok(())
        } else {
            Err(bot_api_failure(reply))
        }
    }
}

/// Stand-in used when no bot token is configured; every delete is reported as failed.
struct UnconfiguredDeleter;

#[async_trait]
impl MessageDeleter for UnconfiguredDeleter {
    async fn delete_message(&self, _target: &DeliveryTarget) -> Result<(), RelayError> {
        Err(RelayError::ActionDeliveryFailed("no bot token configured".to_string()))
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/uploads", post(upload))
        .route("/v1/files/:handle", get(file_show))
        .route("/v1/deliveries", post(delivery_notify))
        .route("/v1/notices", post(notice_notify))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let deleter: Arc<dyn MessageDeleter> = match args.bot_token.as_deref() {
        Some(token) => Arc::new(BotApiDeleter::new(&args.api_base, token)),
        None => {
            tracing::warn!("BOT_TOKEN not set, scheduled deletions will fail");
            Arc::new(UnconfiguredDeleter)
        }
    };

    let config = RelayConfig { store_path: args.db, ..RelayConfig::default() };
    let relay = RelayService::open(&config, deleter)?;
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, records = relay.catalog().len(), "file relay listening");
    axum::serve(listener, app(ServiceState { relay })).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok", records: state.relay.catalog().len() }))
}

async fn upload(
    State(state): State<ServiceState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<ServiceEnvelope<UploadResponse>>, ServiceError> {
    let relay = state.relay.clone();
    let outcome = tokio::task::spawn_blocking(move || relay.handle_upload(request))
        .await
        .map_err(|err| RelayError::StoreUnavailable(format!("upload task failed: {err}")))??;
    Ok(Json(envelope(UploadResponse {
        handle: outcome.record.handle,
        display_name: outcome.record.display_name,
        content_kind: outcome.record.content_kind,
        deduplicated: outcome.deduplicated,
    })))
}

async fn file_show(
    State(state): State<ServiceState>,
    Path(handle): Path<String>,
) -> Result<Json<ServiceEnvelope<Record>>, ServiceError> {
    let record = state.relay.handle_retrieve(&handle)?;
    Ok(Json(envelope(record)))
}

async fn delivery_notify(
    State(state): State<ServiceState>,
    Json(request): Json<TargetRequest>,
) -> Json<ServiceEnvelope<ScheduledAction>> {
    let target = DeliveryTarget { chat_id: request.chat_id, message_id: request.message_id };
    Json(envelope(state.relay.notify_delivered(target)))
}

async fn notice_notify(
    State(state): State<ServiceState>,
    Json(request): Json<TargetRequest>,
) -> Json<ServiceEnvelope<ScheduledAction>> {
    let target = DeliveryTarget { chat_id: request.chat_id, message_id: request.message_id };
    Json(envelope(state.relay.notify_received(target)))
}
