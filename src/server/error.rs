use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::error::KiraError;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream failure: {0}")]
    BadGateway(String),

    #[error("Timed out: {0}")]
    GatewayTimeout(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    error: String,
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HttpError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HttpError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        }
        let body = ErrorBody {
            status: status.as_u16(),
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<KiraError> for HttpError {
    fn from(err: KiraError) -> Self {
        let message = err.to_string();
        match err {
            KiraError::UnknownTaxon(_) | KiraError::SelectionNotFound(_) => {
                HttpError::NotFound(message)
            }
            KiraError::InvalidIdentifier(_) | KiraError::InvalidQuery(_) => {
                HttpError::BadRequest(message)
            }
            KiraError::TransientFetch { .. }
            | KiraError::NcbiHttp(_)
            | KiraError::NcbiStatus { .. }
            | KiraError::NcbiDecode(_)
            | KiraError::CallTimeout(_) => HttpError::BadGateway(message),
            KiraError::SessionTimeout(_) => HttpError::GatewayTimeout(message),
            KiraError::Cancelled => HttpError::ServiceUnavailable(message),
            KiraError::PartialRetrievalFailure { .. }
            | KiraError::Archive(_)
            | KiraError::ConfigRead(_)
            | KiraError::ConfigParse(_)
            | KiraError::Filesystem(_)
            | KiraError::Server(_) => HttpError::Internal(message),
        }
    }
}
