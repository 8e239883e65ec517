use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use orderflow_core::{OrderId, UserId};
use orderflow_orders::order::{CreateOrder, OrderCommand};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
        .route("/:id/confirm", get(confirm_order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let order_id = OrderId::new();

    let cmd = OrderCommand::Create(CreateOrder {
        items: body.items,
        user_id: UserId(body.user_id),
        occurred_at: Utc::now(),
    });

    match services.registry.ask(order_id, cmd).await {
        Ok(summary) => (StatusCode::CREATED, Json(dto::order_to_json(summary))).into_response(),
        Err(e) => errors::ask_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id")
        }
    };

    match services.registry.ask(order_id, OrderCommand::Get).await {
        Ok(summary) => (StatusCode::OK, Json(dto::order_to_json(summary))).into_response(),
        Err(e) => errors::ask_error_to_response(e),
    }
}

/// Confirm (pay) an order; payment kicks off fulfilment.
pub async fn confirm_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id")
        }
    };

    let cmd = OrderCommand::Pay {
        occurred_at: Utc::now(),
    };

    match services.registry.ask(order_id, cmd).await {
        Ok(summary) => (StatusCode::OK, Json(dto::order_to_json(summary))).into_response(),
        Err(e) => errors::ask_error_to_response(e),
    }
}
