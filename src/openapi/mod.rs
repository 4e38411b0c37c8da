use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Checkout API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout

Order placement, hosted payment sessions and payment reconciliation.

## Flow

1. `POST /api/v1/orders` reserves stock and any coupon and records a pending order.
2. `POST /api/v1/orders/{id}/payment-session` opens a hosted payment page. Call it again to retry an abandoned payment.
3. The payment provider calls `POST /api/v1/payments/webhook`; the order becomes paid and moves to processing.

Orders left unpaid for longer than the configured TTL are deleted and their reservations released.

## Authentication

Customer and staff endpoints take an HS256 bearer token:

```
Authorization: Bearer <jwt>
```

The webhook is authenticated by its `Stripe-Signature` header instead.

## Errors

```json
{
  "error": "Unprocessable Entity",
  "message": "Out of stock: product ... has 1, requested 2",
  "code": "out_of_stock",
  "request_id": "...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
"#
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::create_payment_session,
        crate::handlers::checkout::checkout,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::coupon::DiscountType,
            crate::handlers::orders::OrderLineRequest,
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::CreateOrderResponse,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemResponse,
            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::handlers::checkout::CheckoutRequest,
            crate::handlers::checkout::CheckoutResponse,
            crate::handlers::coupons::ValidateCouponRequest,
            crate::handlers::payment_webhooks::WebhookAck,
            crate::handlers::health::HealthResponse,
            crate::services::coupons::CouponPreview,
            crate::services::payment_sessions::PaymentSession,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "orders", description = "Order placement and lifecycle"),
        (name = "payments", description = "Payment sessions and gateway callbacks"),
        (name = "coupons", description = "Coupon checks"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
