//! HTTP boundary: `POST /identify` and `GET /healthz`.
//!
//! Validates and normalizes the two optional identifiers, then hands them to
//! the identity service on a blocking thread with a connection of its own.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, IdentityError, INTERNAL_ERROR, MISSING_IDENTIFIER};
use crate::projector::ConsolidatedIdentity;
use crate::services::identity::identify;
use crate::state::AppState;

pub const INVALID_EMAIL: &str = "Invalid email";

/// Phone numbers arrive as text or as a bare JSON number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PhoneInput {
    Text(String),
    Number(serde_json::Number),
}

impl PhoneInput {
    fn into_text(self) -> String {
        match self {
            PhoneInput::Text(s) => s,
            // `123456.0` and `1e3` name whole numbers; print them without a fraction
            PhoneInput::Number(n) => n
                .as_f64()
                .filter(|f| n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21)
                .map(|f| format!("{f:.0}"))
                .unwrap_or_else(|| n.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<PhoneInput>,
}

/// A request that passed validation. At least one field is `Some` and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl IdentifyRequest {
    pub fn validate(self) -> Result<Observation, IdentityError> {
        let email = self.email.filter(|e| !e.is_empty());
        if let Some(email) = &email {
            if !is_plausible_email(email) {
                return Err(IdentityError::InvalidInput(INVALID_EMAIL.to_string()));
            }
        }
        let phone = self
            .phone_number
            .map(PhoneInput::into_text)
            .filter(|p| !p.is_empty());

        if email.is_none() && phone.is_none() {
            return Err(IdentityError::InvalidInput(MISSING_IDENTIFIER.to_string()));
        }
        Ok(Observation { email, phone })
    }
}

/// Shape check only: one `@`, a local part, and a dotted domain, no whitespace.
fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn reject(status: StatusCode, err: &IdentityError) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError::from(err)))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/identify", post(identify_contact))
        .with_state(state)
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn identify_contact(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> ApiResult<ConsolidatedIdentity> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            log::debug!("Rejected identify body: {}", rejection.body_text());
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: rejection.body_text(),
                }),
            ));
        }
    };

    let observation = request
        .validate()
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &e))?;

    let joined = tokio::task::spawn_blocking(move || -> Result<_, IdentityError> {
        let db = state.connect()?;
        identify(
            &db,
            observation.email.as_deref(),
            observation.phone.as_deref(),
            state.retry,
        )
    })
    .await;

    match joined {
        Ok(Ok(identity)) => Ok(Json(identity)),
        Ok(Err(e @ IdentityError::InvalidInput(_))) => Err(reject(StatusCode::BAD_REQUEST, &e)),
        Ok(Err(e)) => {
            log::error!("Error in /identify: {}", e);
            Err(reject(StatusCode::INTERNAL_SERVER_ERROR, &e))
        }
        Err(e) => {
            log::error!("Identify task panicked: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: INTERNAL_ERROR.to_string(),
                }),
            ))
        }
    }
}
