//! HTTP surface: JSON in, JSON out. The OpenAPI document is generated from
//! the routes and served at `/api/openapi.json`, with a browsable UI at
//! `/api/docs`.

use std::sync::Arc;

use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::openapi::OpenApi;
use aide::scalar::Scalar;
use aide::OperationOutput;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::{SecondsFormat, Utc};
use cinder_core::{CreateNote, Error, NoteContent, NoteService, NoteStore};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type SharedService = Arc<NoteService<Box<dyn NoteStore>>>;

const OPENAPI_PATH: &str = "/api/openapi.json";

pub fn router(service: SharedService) -> Router {
    let mut api = OpenApi::default();

    ApiRouter::new()
        .api_route(
            "/note",
            post_with(create_note, |op| {
                op.summary("Create a note")
                    .response::<201, Json<Created>>()
                    .response::<400, Json<ErrorBody>>()
            }),
        )
        .api_route(
            "/note/{sign}",
            get_with(read_note, |op| {
                op.summary("Read a note, consuming one visit")
                    .response::<400, Json<ErrorBody>>()
                    .response::<401, Json<ErrorBody>>()
                    .response::<404, Json<ErrorBody>>()
            }),
        )
        .api_route(
            "/health",
            get_with(health, |op| op.summary("Server liveness and clock")),
        )
        .api_route(
            "/stat",
            get_with(stat, |op| op.summary("Number of live notes")),
        )
        .route(OPENAPI_PATH, get(serve_openapi))
        .route(
            "/api/docs",
            get(Scalar::new(OPENAPI_PATH).with_title("Cinder").axum_handler()),
        )
        .finish_api_with(&mut api, |doc| {
            doc.title("Cinder")
                .version(env!("CARGO_PKG_VERSION"))
                .default_response::<Json<ErrorBody>>()
        })
        .layer(Extension(Arc::new(api)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

#[derive(Serialize, JsonSchema)]
struct Created {
    sign: String,
}

#[derive(Deserialize, JsonSchema)]
struct SignPath {
    sign: String,
}

#[derive(Deserialize, JsonSchema)]
struct ReadParams {
    /// Required for encrypted notes.
    password: Option<String>,
}

#[derive(Serialize, JsonSchema)]
struct Health {
    /// RFC 3339, UTC.
    server_time: String,
}

#[derive(Serialize, JsonSchema)]
struct Stat {
    current_notes_count: u64,
}

/// Body of every error response.
#[derive(Serialize, JsonSchema)]
pub struct ErrorBody {
    pub detail: String,
}

async fn create_note(
    State(service): State<SharedService>,
    payload: Result<Json<CreateNote>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let Json(request) = payload?;
    let sign = service.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(Created {
            sign: sign.to_string(),
        }),
    ))
}

async fn read_note(
    State(service): State<SharedService>,
    Path(SignPath { sign }): Path<SignPath>,
    params: Result<Query<ReadParams>, QueryRejection>,
) -> Result<Json<NoteContent>, ApiError> {
    let Query(params) = params?;
    let content = service.read(&sign, params.password.as_deref()).await?;
    Ok(Json(content))
}

async fn health() -> Json<Health> {
    Json(Health {
        server_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

async fn stat(State(service): State<SharedService>) -> Result<Json<Stat>, ApiError> {
    let current_notes_count = service.count().await?;
    Ok(Json(Stat {
        current_notes_count,
    }))
}

async fn serve_openapi(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoResponse {
    Json(api.as_ref()).into_response()
}

/// Error returned by handlers, rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::Core(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(error) => match error {
                Error::Validation(_) | Error::Configuration(_) | Error::SignFormat { .. } => {
                    StatusCode::BAD_REQUEST
                }
                Error::NotFound => StatusCode::NOT_FOUND,
                Error::Password(_) => StatusCode::UNAUTHORIZED,
                Error::Storage(_) | Error::Conflict(_) | Error::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let detail = if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
            "internal server error".to_string()
        } else {
            match self {
                ApiError::BadRequest(message) => message,
                ApiError::Core(Error::Validation(message))
                | ApiError::Core(Error::Configuration(message))
                | ApiError::Core(Error::Password(message)) => message,
                ApiError::Core(error) => error.to_string(),
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl OperationOutput for ApiError {
    type Inner = ErrorBody;

    fn operation_response(
        ctx: &mut aide::generate::GenContext,
        operation: &mut aide::openapi::Operation,
    ) -> Option<aide::openapi::Response> {
        Json::<ErrorBody>::operation_response(ctx, operation)
    }
}
