use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use lancer_api::middleware::{decode_token, require_auth};
use lancer_api::{AppState, AppStateInner, bids, contracts, messages, notifications, projects};
use lancer_core::bids::BidEngine;
use lancer_core::chat::ChatEngine;
use lancer_core::contracts::ContractEngine;
use lancer_core::mailer::LogMailer;
use lancer_core::notify::Notifier;
use lancer_core::projects::ProjectEngine;
use lancer_escrow::{EscrowAdapter, HttpProcessor};
use lancer_gateway::{Hub, connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lancer=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("LANCER_DB_PATH").unwrap_or_else(|_| "lancer.db".into());
    let host = std::env::var("LANCER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LANCER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let payment_url = std::env::var("LANCER_PAYMENT_URL")
        .unwrap_or_else(|_| "http://localhost:9400".into());

    // Init database
    let db = Arc::new(lancer_db::Database::open(&PathBuf::from(&db_path))?);

    // The hub is constructed once here and injected everywhere that emits
    // live events; there is no process-global handle
    let hub = Hub::new();

    let processor = HttpProcessor::new(payment_url, Duration::from_secs(10))
        .map_err(|e| anyhow::anyhow!("payment processor client: {}", e))?;
    let escrow = EscrowAdapter::new(Arc::new(processor));

    let notifier = Notifier::new(db.clone(), hub.clone());
    let mailer = Arc::new(LogMailer);

    let app_state: AppState = Arc::new(AppStateInner {
        projects: ProjectEngine::new(db.clone()),
        bids: BidEngine::new(db.clone(), notifier.clone(), mailer.clone()),
        contracts: ContractEngine::new(db.clone(), escrow, notifier.clone(), mailer),
        chat: ChatEngine::new(db.clone(), hub.clone(), notifier),
        db,
        hub: hub.clone(),
    });

    // Routes
    let public_routes = Router::new().route("/health", get(|| async { "ok" }));

    let protected_routes = Router::new()
        .route("/projects", post(projects::create_project))
        .route("/projects/{project_id}", get(projects::get_project))
        .route("/projects/{project_id}/bids", post(bids::submit_bid))
        .route("/bids/{bid_id}/accept", post(bids::accept_bid))
        .route("/bids/{bid_id}/reject", post(bids::reject_bid))
        .route("/contracts/{contract_id}", get(contracts::get_contract))
        .route("/contracts/{contract_id}/fund", post(contracts::fund_escrow))
        .route("/contracts/{contract_id}/release", post(contracts::release_payment))
        .route("/contracts/{contract_id}/complete", post(contracts::mark_complete))
        .route("/contracts/{contract_id}/dispute", post(contracts::raise_dispute))
        .route("/contracts/{contract_id}/cancel", post(contracts::cancel_contract))
        .route("/contracts/{contract_id}/timeline", post(contracts::add_timeline_entry))
        .route("/rooms/{room_id}/messages", get(messages::get_messages))
        .route("/rooms/{room_id}/messages", post(messages::send_message))
        .route("/messages/{message_id}", patch(messages::edit_message))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read", post(notifications::mark_read))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(hub);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Lancer server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

/// WebSocket upgrade. The token rides in the query string because browser
/// WebSocket clients cannot set headers; it is validated here, before the
/// upgrade, so the connection loop starts pre-authenticated.
async fn ws_upgrade(
    State(hub): State<Hub>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(claims) = decode_token(&query.token) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, hub, claims.sub))
        .into_response()
}
