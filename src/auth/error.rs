use std::fmt;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::session_store::SessionError;
use crate::saml::SamlError;

/// Standard error response body: `{"error": {"type", "code", "message"}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

#[derive(Debug)]
pub enum AuthError {
    /// The IdP response was rejected. The cause is logged, never returned.
    AuthenticationFailed(SamlError),

    /// No `SAMLResponse` parameter on the ACS request
    MissingSamlResponse,

    /// An outbound SAML message could not be built or encoded
    Encoding(SamlError),

    /// Login required: redirect the browser to the IdP
    LoginRequired { redirect_url: String },

    /// Session storage failed
    Session(SessionError),
}

impl From<SamlError> for AuthError {
    fn from(e: SamlError) -> Self {
        match e {
            SamlError::Encoding(_) => AuthError::Encoding(e),
            _ => AuthError::AuthenticationFailed(e),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(e: SessionError) -> Self {
        AuthError::Session(e)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::AuthenticationFailed(cause) => {
                tracing::warn!(error = %cause, "SAML authentication failed");
                (
                    StatusCode::UNAUTHORIZED,
                    "authentication_failed",
                    "Authentication failed",
                )
            }
            AuthError::MissingSamlResponse => (
                StatusCode::UNAUTHORIZED,
                "missing_saml_response",
                "Authentication failed",
            ),
            AuthError::Encoding(cause) => {
                tracing::error!(error = %cause, "Failed to encode SAML request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "saml_encoding_error",
                    "Unable to start single sign-on",
                )
            }
            AuthError::LoginRequired { redirect_url } => {
                // A redirect to the IdP, not an error response
                return (
                    StatusCode::FOUND,
                    [(header::LOCATION, redirect_url.as_str())],
                )
                    .into_response();
            }
            AuthError::Session(cause) => {
                tracing::error!(error = %cause, "Session store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "session_error",
                    "Internal error",
                )
            }
        };

        let body = ErrorResponse::with_type("authentication_error", code, message);
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::AuthenticationFailed(e) => write!(f, "Authentication failed: {}", e),
            AuthError::MissingSamlResponse => write!(f, "SAMLResponse parameter missing"),
            AuthError::Encoding(e) => write!(f, "{}", e),
            AuthError::LoginRequired { redirect_url } => {
                write!(f, "SAML authentication required: {}", redirect_url)
            }
            AuthError::Session(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AuthError {}
