//! Authorizer collaborator and a shared-secret implementation.

use std::future::Future;

use axum::http::header::AUTHORIZATION;
use gate_protocol::{ConnectionId, Verdict};
use gate_transport::UpgradeRequest;

/// Decides whether an upgrade may proceed.
///
/// May take arbitrarily long. Returning `Err` is an authorizer fault, which
/// the interceptor treats as a bare rejection.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(
        &self,
        connection_id: ConnectionId,
        request: &UpgradeRequest,
    ) -> impl Future<Output = anyhow::Result<Verdict>> + Send;
}

/// Shared-secret configuration for [`TokenAuthorizer`].
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Expected token. `None` admits every upgrade.
    pub token: Option<String>,
    /// Also accept the token as a `?token=` query parameter
    pub allow_query_token: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            allow_query_token: true,
        }
    }
}

/// Checks `Authorization: Bearer <token>` (or `?token=`) against a shared secret.
#[derive(Debug, Clone)]
pub struct TokenAuthorizer {
    config: AuthConfig,
}

impl TokenAuthorizer {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    fn presented_token(&self, request: &UpgradeRequest) -> Option<String> {
        if let Some(bearer) = request
            .header(AUTHORIZATION.as_str())
            .and_then(|value| value.strip_prefix("Bearer "))
        {
            return Some(bearer.trim().to_string());
        }
        if self.config.allow_query_token {
            return request.query_param("token");
        }
        None
    }
}

impl Authorizer for TokenAuthorizer {
    async fn authorize(
        &self,
        _connection_id: ConnectionId,
        request: &UpgradeRequest,
    ) -> anyhow::Result<Verdict> {
        let Some(expected) = &self.config.token else {
            return Ok(Verdict::allow());
        };

        match self.presented_token(request) {
            Some(token) if &token == expected => Ok(Verdict::allow()),
            _ => Ok(Verdict::deny()
                .with_status(401)
                .with_message("Invalid authentication token")
                .with_header("WWW-Authenticate", "Bearer")),
        }
    }
}
