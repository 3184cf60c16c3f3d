//! Read-only JSON API over the inventory and the stats history.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::{Authorization, HeaderMapExt};
use tokio::net::ToSocketAddrs;
use tokio_util::sync::CancellationToken;

use crate::config::{ApiLogin, Probe};
use crate::container::{self, Container, ContainerID};
use crate::inventory::{self, InventoryStore};
use crate::stats::{self, StatPoint, StatsStore};

mod models;

pub use models::{ProbeInfo, StatsParams};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid credentials")]
    Forbidden,
    #[error("{0}")]
    Internal(String),
    #[error("not implemented")]
    NotImplemented,
}

impl From<container::Error> for Error {
    fn from(err: container::Error) -> Self {
        Error::BadRequest(err.to_string())
    }
}

impl From<inventory::Error> for Error {
    fn from(err: inventory::Error) -> Self {
        if err.is_not_found() {
            Error::NotFound(err.to_string())
        } else {
            Error::Internal(err.to_string())
        }
    }
}

impl From<stats::Error> for Error {
    fn from(err: stats::Error) -> Self {
        if err.is_invalid_input() {
            Error::BadRequest(err.to_string())
        } else {
            Error::Internal(err.to_string())
        }
    }
}

impl From<stats::QueryError> for Error {
    fn from(err: stats::QueryError) -> Self {
        match err {
            stats::QueryError::Inventory(err) => err.into(),
            stats::QueryError::Stats(err) => err.into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Internal(msg) => {
                log::error!("api request failed: {msg}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        };
        let body = models::ErrorBody {
            error: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"probe-monitor\""),
            );
        }
        response
    }
}

type Result<T> = std::result::Result<T, Error>;

pub struct ApiState<I, S> {
    inventory: Arc<I>,
    stats: Arc<S>,
    probes: Vec<ProbeInfo>,
    login: Option<Arc<ApiLogin>>,
}

impl<I, S> ApiState<I, S> {
    pub fn new(inventory: Arc<I>, stats: Arc<S>, probes: &[Probe]) -> Self {
        Self {
            inventory,
            stats,
            probes: probes.iter().map(ProbeInfo::from).collect(),
            login: None,
        }
    }

    /// Requires every request to carry these basic-auth credentials.
    pub fn with_login(mut self, login: Option<ApiLogin>) -> Self {
        self.login = login.map(Arc::new);
        self
    }
}

type AppState<I, S> = State<Arc<ApiState<I, S>>>;

async fn list_probes<I, S>(State(state): AppState<I, S>) -> Json<Vec<ProbeInfo>> {
    Json(state.probes.clone())
}

async fn get_probe<I, S>(
    State(state): AppState<I, S>,
    Path(name): Path<String>,
) -> Result<Json<ProbeInfo>> {
    state
        .probes
        .iter()
        .find(|p| p.name == name)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("probe `{name}` not found")))
}

async fn not_implemented() -> Error {
    Error::NotImplemented
}

async fn get_container<I: InventoryStore, S>(
    State(state): AppState<I, S>,
    Path(cid): Path<String>,
) -> Result<Json<Container>> {
    let id = ContainerID::new(cid)?;
    Ok(Json(state.inventory.get(&id).await?))
}

async fn containers_by_probe<I: InventoryStore, S>(
    State(state): AppState<I, S>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Container>>> {
    Ok(Json(state.inventory.list(&name).await?))
}

async fn stats_by_container<I, S: StatsStore>(
    State(state): AppState<I, S>,
    Path(cid): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Vec<StatPoint>>> {
    let id = ContainerID::new(cid)?;
    let points = stats::stats_by_container(state.stats.as_ref(), &id, &params.options()).await?;
    Ok(Json(points))
}

async fn last_stat<I, S: StatsStore>(
    State(state): AppState<I, S>,
    Path(cid): Path<String>,
) -> Result<Json<StatPoint>> {
    let id = ContainerID::new(cid)?;
    state
        .stats
        .last(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("no stats for container `{id}`")))
}

async fn stats_by_probe<I: InventoryStore, S: StatsStore>(
    State(state): AppState<I, S>,
    Path(name): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Response> {
    let (inventory, stats) = (state.inventory.as_ref(), state.stats.as_ref());
    let options = params.options();
    let response = if params.populate {
        Json(stats::stats_by_probe_populated(inventory, stats, &name, &options).await?)
            .into_response()
    } else {
        Json(stats::stats_by_probe(inventory, stats, &name, &options).await?).into_response()
    };
    Ok(response)
}

/// Answers CORS preflight requests and checks basic auth on everything else.
async fn authorize(
    State(login): State<Option<Arc<ApiLogin>>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        response.headers_mut().insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static("1728000"),
        );
        return response;
    }
    let Some(login) = login else {
        return next.run(request).await;
    };

    match request.headers().typed_get::<Authorization<Basic>>() {
        Some(auth) if login.matches(auth.username(), auth.password()) => next.run(request).await,
        Some(auth) => {
            log::warn!(
                "rejected api request for {} with bad credentials for `{}`",
                request.uri(),
                auth.username()
            );
            Error::Forbidden.into_response()
        }
        None => {
            log::warn!("rejected api request for {} without credentials", request.uri());
            Error::Unauthorized.into_response()
        }
    }
}

async fn add_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type, Cache-Control"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    response
}

pub fn router<I: InventoryStore, S: StatsStore>(state: Arc<ApiState<I, S>>) -> Router {
    let login = state.login.clone();
    Router::new()
        .route("/probes", get(list_probes::<I, S>))
        .route("/probes/{name}", get(get_probe::<I, S>))
        .route("/containers", get(not_implemented))
        .route("/containers/{cid}", get(get_container::<I, S>))
        .route("/containers/probe/{name}", get(containers_by_probe::<I, S>))
        .route("/stats", get(not_implemented))
        .route("/stats/container/{cid}", get(stats_by_container::<I, S>))
        .route("/stats/container/{cid}/last", get(last_stat::<I, S>))
        .route("/stats/probe/{name}", get(stats_by_probe::<I, S>))
        .layer(axum::middleware::from_fn_with_state(login, authorize))
        .layer(axum::middleware::map_response(add_cors_headers))
        .with_state(state)
}

pub struct APIServer {
    router: Router,
}

impl APIServer {
    pub fn new<I: InventoryStore, S: StatsStore>(state: ApiState<I, S>) -> Self {
        Self {
            router: router(Arc::new(state)),
        }
    }

    /// Serves requests on `addr` until `shutdown` is cancelled.
    pub async fn listen(
        self,
        addr: impl ToSocketAddrs,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("api listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}
