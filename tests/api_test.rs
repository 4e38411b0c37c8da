//! HTTP surface: routing, auth, status codes and error bodies.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Duration as ChronoDuration;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_checkout::{auth::ROLE_STAFF, entities::coupon::DiscountType};
use uuid::Uuid;

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response_json(response).await["database"], "up");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = response_json(response).await;
    assert!(doc["paths"]["/api/v1/checkout"].is_object());
}

#[tokio::test]
async fn order_endpoints_require_a_token() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::POST, "/api/v1/orders", None, Some(json!({ "items": [] })))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["code"], "unauthorized");
}

#[tokio::test]
async fn create_then_fetch_order() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    let token = app.token_for("user-1", &[]);

    let created = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "items": [{ "productId": tea.id, "quantity": 2 }] })),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let order_id = response_json(created).await["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let fetched = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), Some(&token), None)
        .await;
    assert_eq!(fetched.status(), StatusCode::OK);
    let body = response_json(fetched).await;
    assert_eq!(body["payment_status"], "pending");
    assert_eq!(body["status"], "order_placed");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let other = app.token_for("user-2", &[]);
    let hidden = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), Some(&other), None)
        .await;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_stock_maps_to_unprocessable() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Mug", dec!(250), None, 1).await;
    let token = app.token_for("user-1", &[]);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "items": [{ "product_id": mug.id, "quantity": 3 }] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["code"], "out_of_stock");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn checkout_creates_order_and_returns_redirect() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), 5, ChronoDuration::days(1))
        .await;
    let token = app.token_for("user-1", &[]);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(&token),
            Some(json!({
                "items": [{ "productId": tea.id, "quantity": 2 }],
                "couponCode": "SAVE10",
                "discountAmount": "20"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert!(body["redirect_url"].as_str().unwrap().starts_with("https://"));

    let order_id: Uuid = body["order_id"].as_str().unwrap().parse().unwrap();
    let order = app.order(order_id).await.unwrap();
    assert_eq!(order.total_amount, dec!(180));
    assert_eq!(app.gateway.requests()[0].amount_due(), dec!(180));
}

#[tokio::test]
async fn checkout_keeps_order_when_gateway_is_down() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    let token = app.token_for("user-1", &[]);
    app.gateway.set_failing(true);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(&token),
            Some(json!({ "items": [{ "productId": tea.id, "quantity": 1 }] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response_json(response).await;
    assert!(body["redirect_url"].is_null());
    assert!(!body["payment_error"].as_str().unwrap().contains("503"));
    let order_id = body["order_id"].as_str().unwrap().to_string();

    // Resume once the provider recovers.
    app.gateway.set_failing(false);
    let resumed = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(&token),
            Some(json!({ "orderId": order_id })),
        )
        .await;
    assert_eq!(resumed.status(), StatusCode::OK);
    assert_eq!(response_json(resumed).await["order_id"], order_id);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn checkout_only_create_order_skips_gateway() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    let token = app.token_for("user-1", &[]);

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(&token),
            Some(json!({
                "items": [{ "productId": tea.id, "quantity": 1 }],
                "onlyCreateOrder": true
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(app.gateway.requests().is_empty());
}

#[tokio::test]
async fn coupon_preview_does_not_consume_usage() {
    let app = TestApp::new().await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), 1, ChronoDuration::days(1))
        .await;
    let token = app.token_for("user-1", &[]);

    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                "/api/v1/coupons/validate",
                Some(&token),
                Some(json!({ "code": "save10", "subtotal": "200" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["code"], "SAVE10");
    }
    assert_eq!(app.coupon("SAVE10").await.used_count, 0);

    let missing = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(&token),
            Some(json!({ "code": "NOPE", "subtotal": "200" })),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(missing).await["code"], "invalid_coupon");
}

#[tokio::test]
async fn cancel_endpoint_deletes_pending_order() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    let token = app.token_for("user-1", &[]);
    let created = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({ "items": [{ "productId": tea.id, "quantity": 2 }] })),
        )
        .await;
    let order_id = response_json(created).await["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(Method::DELETE, &format!("/api/v1/orders/{}", order_id), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.product(tea.id).await.stock, 5);
}

#[tokio::test]
async fn only_staff_advance_fulfilment() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    let customer = app.token_for("user-1", &[]);
    let staff = app.token_for("staff-1", &[ROLE_STAFF]);
    let created = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&customer),
            Some(json!({ "items": [{ "productId": tea.id, "quantity": 1 }] })),
        )
        .await;
    let order_id: Uuid = response_json(created).await["order_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let uri = format!("/api/v1/orders/{}/status", order_id);

    let unpaid = app
        .request(Method::PATCH, &uri, Some(&staff), Some(json!({ "status": "shipped" })))
        .await;
    assert_eq!(unpaid.status(), StatusCode::BAD_REQUEST);

    let (payload, signature) = app.signed_completion("evt_ship", order_id);
    app.services()
        .webhooks
        .handle(Some(&signature), payload.as_bytes())
        .await
        .unwrap();

    let forbidden = app
        .request(Method::PATCH, &uri, Some(&customer), Some(json!({ "status": "shipped" })))
        .await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let shipped = app
        .request(Method::PATCH, &uri, Some(&staff), Some(json!({ "status": "shipped" })))
        .await;
    assert_eq!(shipped.status(), StatusCode::OK);
    assert_eq!(response_json(shipped).await["status"], "shipped");
}
