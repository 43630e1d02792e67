//! HTTP error responses for web adapter.

use askama::Template;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};

use crate::domain::error::PapertradeError;

use super::templates::{BasePage, ErrorTemplate};
use super::is_htmx_request;

#[derive(Debug)]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<PapertradeError> for WebError {
    fn from(err: PapertradeError) -> Self {
        Self::new(status_from_error(&err), public_message(&err))
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        render_error(self.status, &self.message, false)
    }
}

pub fn status_from_error(err: &PapertradeError) -> StatusCode {
    match err {
        PapertradeError::InvalidInput { .. }
        | PapertradeError::UnknownSymbol { .. }
        | PapertradeError::UsernameTaken { .. } => StatusCode::BAD_REQUEST,
        PapertradeError::InsufficientFunds { .. } | PapertradeError::InsufficientShares { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PapertradeError::InvalidCredentials => StatusCode::FORBIDDEN,
        PapertradeError::UserNotFound { .. } => StatusCode::NOT_FOUND,
        PapertradeError::Conflict { .. } => StatusCode::CONFLICT,
        PapertradeError::Database { .. }
        | PapertradeError::DatabaseQuery { .. }
        | PapertradeError::ConfigParse { .. }
        | PapertradeError::ConfigMissing { .. }
        | PapertradeError::ConfigInvalid { .. }
        | PapertradeError::Http { .. }
        | PapertradeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Infrastructure details stay in the log; users see a generic message.
fn public_message(err: &PapertradeError) -> String {
    match err {
        PapertradeError::InvalidInput { reason } => reason.clone(),
        PapertradeError::Conflict { .. } => {
            "another request for this account is in progress, please try again".to_string()
        }
        _ if status_from_error(err).is_server_error() => "internal server error".to_string(),
        _ => err.to_string(),
    }
}

pub fn handle_error(err: PapertradeError, headers: &HeaderMap) -> Response {
    let status = status_from_error(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else if err.is_validation() {
        tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
    } else {
        tracing::warn!(error = %err, status = status.as_u16(), "request not completed");
    }
    render_error(status, &public_message(&err), is_htmx_request(headers))
}

fn render_error(status: StatusCode, message: &str, fragment: bool) -> Response {
    let template = ErrorTemplate {
        message,
        status: status.as_u16(),
    };

    let content = match template.render() {
        Ok(html) => html,
        Err(_) => return (status, message.to_string()).into_response(),
    };

    if fragment {
        return (status, Html(content)).into_response();
    }

    let page = BasePage {
        title: "Error",
        content: &content,
        flash: None,
        username: None,
    };
    match page.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(_) => (status, Html(content)).into_response(),
    }
}
