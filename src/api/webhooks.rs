use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::Deserialize;

use crate::api::middleware::session::AppState;
use crate::error::Result;

#[derive(Debug, Default, Deserialize)]
struct NotificationData {
    id: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    topic: Option<String>,
    data: Option<NotificationData>,
}

fn value_to_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls `(topic, payment id)` out of a gateway notification.
///
/// Accepts the JSON body form `{type, data: {id}}` as well as the query
/// forms `?type=&data.id=` and `?topic=&id=`.
fn extract_payment_id(query: &HashMap<String, String>, body: &[u8]) -> Option<(String, String)> {
    let parsed: NotificationBody = serde_json::from_slice(body).unwrap_or_default();

    let topic = parsed
        .kind
        .or(parsed.topic)
        .or_else(|| query.get("type").cloned())
        .or_else(|| query.get("topic").cloned())
        .unwrap_or_else(|| "payment".to_string());

    let id = parsed
        .data
        .and_then(|d| d.id)
        .as_ref()
        .and_then(value_to_id)
        .or_else(|| query.get("data.id").cloned())
        .or_else(|| query.get("id").cloned())
        .filter(|id| !id.is_empty())?;

    Some((topic, id))
}

async fn payment_notification(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<StatusCode> {
    let Some((topic, external_id)) = extract_payment_id(&query, &body) else {
        tracing::warn!("Payment notification without a payment id");
        return Ok(StatusCode::OK);
    };

    if topic != "payment" {
        tracing::debug!(topic = %topic, "Ignoring non-payment notification");
        return Ok(StatusCode::OK);
    }

    tracing::info!(external_id = %external_id, "Payment notification received");

    state.payments.handle_notification(&external_id).await?;

    Ok(StatusCode::OK)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/webhooks/payments", post(payment_notification))
}
