use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::orders::{order_command, OrderLineRequest},
    AppState,
};

/// Single-call checkout body used by the storefront UI.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Option<Vec<OrderLineRequest>>,
    #[serde(default, alias = "addressId")]
    pub address_id: Option<Uuid>,
    #[serde(default, alias = "couponCode")]
    #[validate(length(max = 64, message = "Coupon code is too long"))]
    pub coupon_code: Option<String>,
    #[serde(default, alias = "discountAmount")]
    pub discount_amount: Option<Decimal>,
    /// Resume payment for this existing order instead of creating one
    #[serde(default, alias = "orderId")]
    pub order_id: Option<Uuid>,
    /// Persist the order and stop before opening a payment session
    #[serde(default, alias = "onlyCreateOrder")]
    pub only_create_order: bool,
    #[serde(default)]
    pub ignore_invalid_coupon: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Set when the order was created but the payment page could not be opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_error: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Checkout",
    description = "Create an order and/or open its payment session. With `order_id` the existing pending order is resumed; with `only_create_order` no payment session is opened.",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Payment session opened", body = CheckoutResponse),
        (status = 201, description = "Order created without payment session", body = CheckoutResponse),
        (status = 400, description = "Invalid request or coupon", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Out of stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Order kept but payment provider unavailable", body = CheckoutResponse)
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;

    if let Some(order_id) = payload.order_id {
        let session = state
            .services
            .payment_sessions
            .create_payment_session(&user, order_id)
            .await?;
        return Ok((
            StatusCode::OK,
            Json(CheckoutResponse {
                order_id,
                redirect_url: Some(session.redirect_url),
                payment_error: None,
            }),
        ));
    }

    let command = order_command(
        &state,
        &user,
        payload.items,
        payload.address_id,
        payload.coupon_code,
        payload.discount_amount,
        payload.ignore_invalid_coupon,
    )
    .await?;
    let order_id = state.services.orders.create_order(command).await?.order.id;

    if payload.only_create_order {
        return Ok((
            StatusCode::CREATED,
            Json(CheckoutResponse {
                order_id,
                ..Default::default()
            }),
        ));
    }

    match state
        .services
        .payment_sessions
        .create_payment_session(&user, order_id)
        .await
    {
        Ok(session) => Ok((
            StatusCode::OK,
            Json(CheckoutResponse {
                order_id,
                redirect_url: Some(session.redirect_url),
                payment_error: None,
            }),
        )),
        // The order stays pending; hand back its id so payment can be resumed.
        Err(err @ ServiceError::GatewayUnavailable(_)) => {
            warn!(%order_id, error = %err, "Order created but payment session failed");
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(CheckoutResponse {
                    order_id,
                    redirect_url: None,
                    payment_error: Some(err.response_message()),
                }),
            ))
        }
        Err(err) => Err(err),
    }
}
