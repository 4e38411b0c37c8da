use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    entities::order::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::{
        carts::CartLine,
        orders::{CouponPolicy, CreateOrderCommand, OrderDetails},
        payment_sessions::PaymentSession,
    },
    AppState,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct OrderLineRequest {
    #[serde(alias = "productId")]
    pub product_id: Uuid,
    pub quantity: i32,
}

impl From<OrderLineRequest> for CartLine {
    fn from(line: OrderLineRequest) -> Self {
        CartLine {
            product_id: line.product_id,
            quantity: line.quantity,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    /// Lines to buy; the caller's stored cart is used when omitted
    #[serde(default)]
    pub items: Option<Vec<OrderLineRequest>>,
    #[serde(default, alias = "addressId")]
    pub address_id: Option<Uuid>,
    #[serde(default, alias = "couponCode")]
    #[validate(length(max = 64, message = "Coupon code is too long"))]
    pub coupon_code: Option<String>,
    /// Discount the client computed; the server recomputes it from the coupon
    #[serde(default, alias = "discountAmount")]
    pub discount_amount: Option<Decimal>,
    /// Place the order at full price instead of failing on a bad coupon
    #[serde(default)]
    pub ignore_invalid_coupon: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price_at_time: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: String,
    pub address_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub coupon_code: Option<String>,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        let order = details.order;
        Self {
            id: order.id,
            user_id: order.user_id,
            address_id: order.address_id,
            total_amount: order.total_amount,
            discount_amount: order.discount_amount,
            coupon_code: order.coupon_code,
            payment_status: order.payment_status,
            status: order.status,
            payment_method: order.payment_method,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: details
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price_at_time: item.price_at_time,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Builds the order command, falling back to the caller's stored cart.
pub(crate) async fn order_command(
    state: &AppState,
    user: &AuthUser,
    items: Option<Vec<OrderLineRequest>>,
    address_id: Option<Uuid>,
    coupon_code: Option<String>,
    discount_amount: Option<Decimal>,
    ignore_invalid_coupon: bool,
) -> Result<CreateOrderCommand, ServiceError> {
    let lines: Vec<CartLine> = match items.filter(|items| !items.is_empty()) {
        Some(items) => items.into_iter().map(CartLine::from).collect(),
        None => state.services.carts.lines_for(&user.user_id).await?,
    };

    Ok(CreateOrderCommand {
        user_id: user.user_id.clone(),
        lines,
        address_id,
        coupon_code,
        declared_discount: discount_amount,
        coupon_policy: if ignore_invalid_coupon {
            CouponPolicy::IgnoreCoupon
        } else {
            CouponPolicy::Abort
        },
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Reserve stock and coupon usage and record a pending order at frozen prices",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CreateOrderResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request or coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Out of stock", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
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

    let details = state.services.orders.create_order(command).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: details.order.id,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with its items", body = OrderResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let details = state.services.orders.get_order(&user, id).await?;
    Ok(Json(details.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Cancel unpaid order",
    description = "Delete an order still awaiting payment and release its stock and coupon",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 204, description = "Order cancelled"),
        (status = 400, description = "Order is no longer cancellable", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.orders.cancel_order(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/status",
    summary = "Advance fulfilment status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = OrderResponse),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff only", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order = state
        .services
        .orders
        .advance_status(&user, id, payload.status)
        .await?;
    let items = state.services.orders.items_for(&*state.db, id).await?;
    Ok(Json(OrderDetails { order, items }.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment-session",
    summary = "Open payment session",
    description = "Open a hosted payment page for a pending order; safe to call again after an abandoned attempt",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Redirect to the hosted payment page", body = PaymentSession),
        (status = 400, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn create_payment_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentSession>, ServiceError> {
    let session = state
        .services
        .payment_sessions
        .create_payment_session(&user, id)
        .await?;
    Ok(Json(session))
}
