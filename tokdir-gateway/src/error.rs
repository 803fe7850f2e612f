use axum::response::IntoResponse;
use http::StatusCode;
use tokdir_directory::DirectoryError;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("No route for {0}")]
    NoRoute(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        use DirectoryError::*;
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
            GatewayError::Directory(e) => match e {
                NotFound(_) => StatusCode::NOT_FOUND,
                InvalidArgument(_) => StatusCode::BAD_REQUEST,
                RetryBudgetExhausted { .. } => StatusCode::CONFLICT,
                StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ConsistencyFault { .. }
                | Config(_)
                | Storage(_)
                | FanoutIncomplete { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn code(&self) -> &'static str {
        use DirectoryError::*;
        match self {
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::NoRoute(_) => "NO_ROUTE",
            GatewayError::Directory(e) => match e {
                NotFound(_) => "DEVICE_NOT_FOUND",
                InvalidArgument(_) => "INVALID_ARGUMENT",
                RetryBudgetExhausted { .. } => "RETRY_BUDGET_EXHAUSTED",
                StoreUnavailable(_) => "STORE_UNAVAILABLE",
                ConsistencyFault { .. } => "CONSISTENCY_FAULT",
                Config(_) => "CONFIG_ERROR",
                Storage(_) => "STORAGE_ERROR",
                FanoutIncomplete { .. } => "FANOUT_INCOMPLETE",
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        let mut resp = (status, body.to_string()).into_response();
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_errors_map_to_status() {
        let cases = [
            (DirectoryError::NotFound("d".into()), StatusCode::NOT_FOUND),
            (
                DirectoryError::InvalidArgument("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                DirectoryError::RetryBudgetExhausted {
                    op: "register_token",
                    attempts: 3,
                },
                StatusCode::CONFLICT,
            ),
            (
                DirectoryError::StoreUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DirectoryError::ConsistencyFault {
                    device: "d".into(),
                    shards: vec!["a".into(), "b".into()],
                    reason: "dup".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let resp = GatewayError::from(err).into_response();
            assert_eq!(resp.status(), status);
            assert_eq!(
                resp.headers().get(http::header::CONTENT_TYPE).unwrap(),
                "application/json"
            );
        }
    }
}
