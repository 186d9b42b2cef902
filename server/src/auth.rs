use std::sync::Arc;

use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use constant_time_eq::constant_time_eq;
use tracing::debug;
use tracing::warn;

use crate::AppState;
use crate::config::OperatorConfig;
use crate::error::ApiError;

/// The operator a request was authenticated as. Inserted into request
/// extensions by [`require_operator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedOperator {
    pub user_id: String,
}

#[derive(Clone)]
pub struct OperatorRegistry {
    operators: Arc<[OperatorConfig]>,
}

impl OperatorRegistry {
    pub fn new(operators: Vec<OperatorConfig>) -> Self {
        Self {
            operators: operators.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Every configured token is compared, so the time taken does not
    /// depend on which operator (if any) matched.
    pub fn authenticate(&self, token: &str) -> Option<AuthenticatedOperator> {
        let mut matched = None;
        for operator in self.operators.iter() {
            if constant_time_eq(operator.token.as_bytes(), token.as_bytes()) && matched.is_none() {
                matched = Some(AuthenticatedOperator {
                    user_id: operator.user_id.clone(),
                });
            }
        }
        matched
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub(crate) async fn require_operator(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(request.headers()) else {
        debug!(path = %request.uri().path(), "request without bearer token");
        return Err(ApiError::Unauthorized);
    };
    let Some(operator) = state.operators.authenticate(token) else {
        warn!(path = %request.uri().path(), "rejected unknown bearer token");
        return Err(ApiError::Unauthorized);
    };
    request.extensions_mut().insert(operator);
    Ok(next.run(request).await)
}
