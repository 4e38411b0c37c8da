use axum::{extract::State, http::HeaderMap, response::Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    services::webhooks::{WebhookOutcome, SIGNATURE_HEADER},
    AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// paid, already_paid, duplicate or ignored
    pub outcome: String,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        let outcome = match outcome {
            WebhookOutcome::Paid(_) => "paid",
            WebhookOutcome::AlreadyPaid(_) => "already_paid",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        };
        Self {
            received: true,
            outcome: outcome.to_string(),
        }
    }
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body(content = String, description = "Raw gateway event JSON", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Event processed, duplicate or ignored", body = WebhookAck),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 500, description = "Store failure; the gateway should retry", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.services.webhooks.handle(signature, &body).await?;
    Ok(Json(outcome.into()))
}
