//! Request DTOs and JSON mapping helpers.

use serde::Deserialize;

use orderflow_orders::order::OrderSummary;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<String>,
    pub user_id: i64,
}

/// `OrderSummary` already carries its wire representation (camelCase).
pub fn order_to_json(summary: OrderSummary) -> serde_json::Value {
    serde_json::to_value(summary).unwrap_or_else(|_| serde_json::json!({}))
}
