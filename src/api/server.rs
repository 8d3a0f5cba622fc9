use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::verify_admin::verify_admin_ident;
use crate::api::middleware::{MiddlewareErr, cors};
use crate::refresh::{RefreshErr, RefreshGate};
use crate::snapshot::{SnapshotErr, SnapshotStore};
use crate::util::env::{EnvErr, Var};
use crate::var;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: SnapshotStore,
    pub refresh_gate: Arc<RefreshGate>,
}

#[instrument(skip(tx))]
pub async fn router(tx: UnboundedSender<SocketAddr>) -> Result<(), RouteError> {
    let state = Arc::new(AppState {
        store: SnapshotStore::new(var!(Var::SnapshotDir).await?),
        refresh_gate: Arc::new(RefreshGate::new()),
    });

    //
    // operator-triggered refresh, behind the shared-secret gate
    let admin_post_routes = Router::new()
        .route("/refresh", post(trigger_refresh))
        .route_layer(middleware::from_fn(verify_admin_ident));

    let app = Router::new()
        .merge(admin_post_routes)
        //
        // general
        .route("/", get(|| async { Response::new(Body::empty()) }))
        //
        // snapshot reads; these never touch the network
        .route("/roster", get(roster_all))
        .route("/roster/search", get(roster_search))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(cors().await?)
        .with_state(state);

    let port = var!(Var::ServerApiPort)
        .await?
        .parse::<u16>()
        .map_err(|_| RouteError::InvalidPort)?;

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tx.send(socket_addr)?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Custom error trace handler for `RouteError`-type responses
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument]
pub async fn start_server(
    tx: UnboundedSender<SocketAddr>,
    mut rx: UnboundedReceiver<SocketAddr>,
) -> Result<Vec<JoinHandle<()>>, RouteError> {
    tracing::info!("starting server");
    let server_handle = tokio::task::spawn(async move {
        if let Err(e) = router(tx).await {
            tracing::error!(error = ?e, "api server exited");
        }
    });

    let logging_handle = tokio::task::spawn(async move {
        while !rx.is_closed() {
            if let Some(msg) = rx.recv().await {
                tracing::info!(
                    server_url = &format!("http://127.0.0.1:{}", msg.port()),
                    "server ready"
                );
                break;
            }
        }
    });

    let handles = vec![server_handle, logging_handle];
    Ok(handles)
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    EnvError(#[from] EnvErr),

    #[error(transparent)]
    MiddlewareError(#[from] MiddlewareErr),

    #[error(transparent)]
    SnapshotError(#[from] SnapshotErr),

    #[error(transparent)]
    RefreshError(#[from] RefreshErr),

    #[error("no roster snapshot has been generated yet")]
    NoSnapshot,

    #[error("SERVER_API_PORT is not a valid port number")]
    InvalidPort,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    ChannelSendError(#[from] SendError<SocketAddr>),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message, err) = match &self {
            RouteError::NoSnapshot => (
                StatusCode::NOT_FOUND,
                String::from("no roster snapshot yet; ask an admin to run a refresh"),
                // expected state on a fresh deployment, not a server fault
                None,
            ),

            RouteError::SnapshotError(snapshot_err) => match snapshot_err {
                SnapshotErr::Corrupt { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    String::from("cached roster snapshot is corrupt; a refresh will replace it"),
                    Some(self),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    snapshot_err.to_string(),
                    Some(self),
                ),
            },

            RouteError::RefreshError(refresh_err) => match refresh_err {
                RefreshErr::AlreadyRunning => (
                    StatusCode::CONFLICT,
                    refresh_err.to_string(),
                    // a second operator racing the first is not our error to log
                    None,
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    refresh_err.to_string(),
                    Some(self),
                ),
            },

            RouteError::EnvError(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error.to_string(),
                Some(self),
            ),

            RouteError::MiddlewareError(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error.to_string(),
                Some(self),
            ),

            RouteError::InvalidPort => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.to_string(),
                Some(self),
            ),

            RouteError::Io(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error.to_string(),
                Some(self),
            ),

            RouteError::ChannelSendError(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error.to_string(),
                Some(self),
            ),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        if let Some(err) = err {
            response.extensions_mut().insert(Arc::new(err));
        }

        response
    }
}
