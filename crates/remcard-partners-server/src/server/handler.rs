//! HTTP handlers for the partner submission endpoint.
//!
//! ## Responsibilities
//!
//! - Answer preflights and the readiness probe.
//! - Refuse submissions while no credential is configured.
//! - Validate submissions before any call to the record store.
//! - Run the append and map its outcome to a JSON response.
//!
//! Error bodies are always `{error, message}` with fixed, user-facing text.
//! Upstream statuses and bodies are logged but never returned.

use crate::server::config::ServerConfig;
use crate::server::submission::{SubmissionError, parse_submission};
use crate::server::telemetry::{
    increment_append_failures, increment_appends, increment_rejected_submissions,
    record_append_conflicts, record_append_duration,
};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::ALLOW;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use remcard_partners::{
    ContentGateway, EMPTY_STORE, Error, GitHubGateway, MemoryGateway, PartnerAppender,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

const NOT_CONFIGURED_HINT: &str = "Добавьте REMCARD_GITHUB_TOKEN (или GITHUB_TOKEN / GH_TOKEN) в переменные окружения сервиса и перезапустите его.";

/// Shared, read-only state of the endpoint.
#[derive(Clone, Debug)]
pub struct AppState {
    /// `None` while no credential is configured.
    appender: Option<PartnerAppender>,
    environment: Arc<str>,
}

impl AppState {
    pub fn new(appender: Option<PartnerAppender>, environment: impl Into<String>) -> Self {
        Self {
            appender,
            environment: environment.into().into(),
        }
    }

    /// Wires the record store selected by `config`.
    pub fn from_config(config: &ServerConfig) -> remcard_partners::Result<Self> {
        let gateway: Option<Arc<dyn ContentGateway>> = if config.in_memory {
            tracing::warn!("serving from an in-memory catalog; submissions are not persisted");
            Some(Arc::new(MemoryGateway::new(EMPTY_STORE)))
        } else if let Some(credential) = &config.credential {
            tracing::info!(
                repo = %config.target.repo,
                path = %config.target.path,
                branch = config.target.branch.as_deref().unwrap_or("(default)"),
                "appending to GitHub"
            );
            Some(Arc::new(GitHubGateway::new(
                config.target.clone(),
                credential.expose(),
                config.upstream_timeout,
            )?))
        } else {
            tracing::warn!("no GitHub token configured; submissions will be refused");
            None
        };

        let appender = gateway.map(|gateway| PartnerAppender::new(gateway, config.retry));
        Ok(Self::new(appender, config.deploy_env.clone()))
    }

    pub const fn is_configured(&self) -> bool {
        self.appender.is_some()
    }
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub configured: bool,
    pub environment: String,
    pub hint: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AddPartnerResponse {
    pub success: bool,
    pub message: &'static str,
    pub partner: PartnerSummary,
}

#[derive(Debug, Serialize)]
pub struct PartnerSummary {
    pub id: u64,
    pub name: String,
}

/// `GET`: whether submissions can currently be accepted.
pub async fn readiness(State(state): State<AppState>) -> Json<Readiness> {
    let configured = state.is_configured();
    Json(Readiness {
        configured,
        environment: state.environment.to_string(),
        hint: if configured { "OK" } else { NOT_CONFIGURED_HINT },
    })
}

/// `OPTIONS`: CORS preflight. Headers are added by the CORS middleware.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `POST`: validates the submission and appends it to the catalog.
#[tracing::instrument(name = "add_partner", skip_all)]
pub async fn add_partner(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AddPartnerResponse>, ApiError> {
    let Some(appender) = &state.appender else {
        tracing::error!("submission refused: no GitHub token configured");
        return Err(ApiError::NotConfigured);
    };

    let draft = parse_submission(&body).map_err(|err| {
        tracing::info!(error = %err, "submission rejected");
        increment_rejected_submissions();
        ApiError::Submission(err)
    })?;

    let started = Instant::now();
    let result = appender.append(draft).await;
    record_append_duration(started.elapsed().as_secs_f64() * 1_000.0);

    match result {
        Ok(outcome) => {
            increment_appends();
            record_append_conflicts(outcome.attempts.saturating_sub(1) as u64);
            Ok(Json(AddPartnerResponse {
                success: true,
                message: "Партнёр добавлен",
                partner: PartnerSummary {
                    id: outcome.record.id,
                    name: outcome.record.name,
                },
            }))
        }
        Err(err) => {
            if err.is_conflict() {
                record_append_conflicts(appender.retry_policy().max_attempts as u64);
            }
            increment_append_failures(failure_kind(&err));
            match err.upstream_detail() {
                Some((status, body)) => {
                    tracing::error!(error = %err, status, body, "append failed");
                }
                None => tracing::error!(error = %err, "append failed"),
            }
            Err(ApiError::Append(err))
        }
    }
}

/// Any method other than `GET`, `OPTIONS` or `POST`.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

const fn failure_kind(err: &Error) -> &'static str {
    match err {
        Error::Validation { .. } => "validation",
        Error::Config { .. } => "config",
        Error::UpstreamRead { .. } => "upstream_read",
        Error::UpstreamWriteConflict { .. } => "conflict",
        Error::UpstreamWrite { .. } => "upstream_write",
        Error::MalformedStore { .. } => "malformed_store",
        Error::Decode { .. } => "decode",
        Error::Transport { .. } => "transport",
    }
}

/// Everything the endpoint can answer with besides success.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("service is not configured")]
    NotConfigured,

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Append(#[from] Error),

    #[error("method not allowed")]
    MethodNotAllowed,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Submission(_) | Self::Append(Error::Validation { .. }) => StatusCode::BAD_REQUEST,
            Self::Append(Error::UpstreamWriteConflict { .. }) => StatusCode::CONFLICT,
            Self::Append(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn body(&self) -> ErrorBody {
        let (error, message) = match self {
            Self::NotConfigured | Self::Append(Error::Config { .. }) => {
                ("API не настроен", NOT_CONFIGURED_HINT.to_string())
            }
            Self::Submission(SubmissionError::InvalidJson { .. } | SubmissionError::NotAnObject) => (
                "Неверный JSON",
                "Тело запроса должно быть JSON-объектом".to_string(),
            ),
            Self::Submission(SubmissionError::MissingFields { fields }) => (
                "Заполните обязательные поля",
                format!("Требуются: {}", fields.join(", ")),
            ),
            Self::Submission(SubmissionError::NotText { field }) => (
                "Неверный формат поля",
                format!("Поле {field} должно быть строкой"),
            ),
            Self::Append(Error::Validation { .. }) => (
                "Некорректная заявка",
                "Проверьте поля формы и отправьте ещё раз".to_string(),
            ),
            Self::Append(Error::UpstreamWriteConflict { .. }) => (
                "Каталог был изменён",
                "Каталог одновременно обновили, отправьте заявку ещё раз".to_string(),
            ),
            Self::Append(_) => (
                "Ошибка при публикации",
                "Не удалось сохранить партнёра, попробуйте позже".to_string(),
            ),
            Self::MethodNotAllowed => ("Метод не разрешён", "Используйте POST".to_string()),
        };
        ErrorBody { error, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, OPTIONS, POST"));
        }
        response
    }
}
