use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use orderflow_core::DomainError;
use orderflow_infra::registry::{AskError, CommandError};

pub fn ask_error_to_response(err: AskError) -> axum::response::Response {
    match err {
        AskError::Timeout => json_error(
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
            "timed out waiting for the order to respond",
        ),
        AskError::Delivery => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "delivery_error",
            "order stopped before replying",
        ),
        AskError::Command(CommandError::Domain(e)) => domain_error_to_response(e),
        AskError::Command(CommandError::Store(e)) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::StateConflict(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_state", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_errors_map_to_expected_statuses() {
        assert_eq!(
            ask_error_to_response(AskError::Timeout).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ask_error_to_response(AskError::Delivery).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ask_error_to_response(AskError::Command(CommandError::Domain(
                DomainError::NotFound
            )))
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ask_error_to_response(AskError::Command(CommandError::Domain(
                DomainError::validation("items must not be empty")
            )))
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ask_error_to_response(AskError::Command(CommandError::Domain(
                DomainError::state_conflict("cannot pay an order that is in state paid")
            )))
            .status(),
            StatusCode::BAD_REQUEST
        );
    }
}
