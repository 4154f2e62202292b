use crate::models::chat::{ ChatRequest, Turn };
use crate::relay::ChatRelay;
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    body::Body,
    extract::State,
    http::header,
    response::{ IntoResponse, Response },
};
use futures::StreamExt;
use serde::Serialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Serialize)]
struct ChatResponse {
    response: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<Turn>,
}

#[derive(Serialize)]
struct ResetResponse {
    message: String,
}

#[derive(Clone)]
struct AppState {
    relay: Arc<ChatRelay>,
}

pub fn router(relay: Arc<ChatRelay>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/history", get(history_handler))
        .route("/api/reset", post(reset_handler))
        .layer(cors)
        .with_state(AppState { relay })
}

pub async fn start_http_server(
    addr: &str,
    relay: Arc<ChatRelay>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(relay);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Buffered requests answer with one JSON body; streamed requests answer
/// with the relayed NDJSON chunk sequence. Backend failures come back as an
/// error payload, not a protocol fault.
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.stream {
        let chunks = state.relay.chat_streamed(&request).await;
        let body = Body::from_stream(chunks.map(Ok::<_, Infallible>));
        ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
    } else {
        match state.relay.chat_buffered(&request).await {
            Ok(reply) => Json(ChatResponse { response: reply }).into_response(),
            Err(e) => {
                error!("Chat request failed: {}", e);
                Json(ErrorResponse { error: e.to_string() }).into_response()
            }
        }
    }
}

async fn history_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Returning full conversation history");
    Json(HistoryResponse { history: state.relay.history().await })
}

async fn reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.relay.reset().await;
    info!("Chat history reset");
    Json(ResetResponse { message: "Chat history has been reset.".to_string() })
}
