//! Local web page showing a patient's latest location on a map.
//!
//! `/` serves the page, `/location` refetches and returns the current
//! [`LocationView`] as JSON and `/ws` pushes it every refresh period.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

use crate::api::SenseSafeApi;
use crate::error::{ApiError, SenseSafeError};
use crate::location_view::{load_location_view, LocationView};
use crate::model::UserSummary;
use crate::session::SessionState;

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(10);

pub struct MapViewState {
    pub api: Arc<dyn SenseSafeApi>,
    pub session: SessionState,
    pub patient: UserSummary,
    pub refresh: Duration,
}

impl MapViewState {
    async fn fetch(&self) -> Result<LocationView, SenseSafeError> {
        load_location_view(self.api.as_ref(), &self.session, &self.patient).await
    }
}

type SharedState = Arc<MapViewState>;

pub fn router(state: MapViewState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/location", get(location_handler))
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

/// Serve the map on `0.0.0.0:port` until the process stops.
pub async fn serve_map(state: MapViewState, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    log::info!(
        "[map] showing {} at http://{addr}",
        state.patient.display_name()
    );
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: MapViewState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("map_view.html"))
}

async fn location_handler(State(state): State<SharedState>) -> Response {
    match state.fetch().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => {
            log::warn!("[map] location refresh failed: {e}");
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

fn error_status(error: &SenseSafeError) -> StatusCode {
    match error {
        SenseSafeError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        SenseSafeError::WrongRole { .. } => StatusCode::FORBIDDEN,
        SenseSafeError::Api(ApiError::Rejected { status: 404, .. }) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState) {
    loop {
        let message = match state.fetch().await {
            Ok(view) => serde_json::to_string(&view),
            Err(e) => {
                log::warn!("[map] location refresh failed: {e}");
                serde_json::to_string(&serde_json::json!({ "error": e.to_string() }))
            }
        };

        let Ok(json) = message else { break };
        if socket.send(Message::Text(json)).await.is_err() {
            // client went away
            break;
        }

        sleep(state.refresh).await;
    }
}
