#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use storefront_checkout::{
    app_router,
    auth::{AuthService, AuthUser, ROLE_STAFF},
    config::AppConfig,
    db,
    entities::{
        coupon::{self, DiscountType, Entity as CouponEntity},
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        payment_gateway::{CheckoutSession, CheckoutSessionRequest, PaymentGateway},
        webhooks::sign_payload,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret_value";

/// Gateway double that records every session request.
#[derive(Default)]
pub struct RecordingGateway {
    requests: Mutex<Vec<CheckoutSessionRequest>>,
    fail: AtomicBool,
}

impl RecordingGateway {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().expect("gateway mutex").clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable(
                "/v1/checkout/sessions responded 503 Service Unavailable".to_string(),
            ));
        }
        let mut requests = self.requests.lock().expect("gateway mutex");
        requests.push(request);
        let n = requests.len();
        Ok(CheckoutSession {
            id: format!("cs_test_{}", n),
            url: format!("https://checkout.stripe.test/pay/cs_test_{}", n),
        })
    }
}

/// Application state on a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<RecordingGateway>,
    auth: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "sk_test_123".to_string(),
            WEBHOOK_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection: every pool connection would otherwise get its own empty database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(RecordingGateway::default());
        let state = AppState::new(Arc::new(pool), cfg, event_sender, gateway.clone());
        let auth = state.auth.clone();

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            auth,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &db::DbPool {
        &self.state.db
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    pub fn customer(user_id: &str) -> AuthUser {
        AuthUser {
            user_id: user_id.to_string(),
            roles: vec![],
        }
    }

    pub fn staff() -> AuthUser {
        AuthUser {
            user_id: "staff-1".to_string(),
            roles: vec![ROLE_STAFF.to_string()],
        }
    }

    pub fn token_for(&self, user_id: &str, roles: &[&str]) -> String {
        self.auth
            .issue_token(user_id, roles, ChronoDuration::hours(1))
            .expect("issue token")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        sale_price: Option<Decimal>,
        stock: i32,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            sale_price: Set(sale_price),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed product")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        discount_value: Decimal,
        usage_limit: i32,
        expires_in: ChronoDuration,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_uppercase()),
            discount_type: Set(discount_type),
            discount_value: Set(discount_value),
            expires_at: Set(now + expires_in),
            is_active: Set(true),
            usage_limit: Set(usage_limit),
            used_count: Set(0),
            created_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed coupon")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        ProductEntity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn set_price(&self, id: Uuid, price: Decimal) {
        ProductEntity::update_many()
            .set(product::ActiveModel {
                price: Set(price),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(product::Column::Id.eq(id))
            .exec(self.db())
            .await
            .expect("update price");
    }

    pub async fn coupon(&self, code: &str) -> coupon::Model {
        CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.to_uppercase()))
            .one(self.db())
            .await
            .expect("load coupon")
            .expect("coupon exists")
    }

    pub async fn order(&self, id: Uuid) -> Option<order::Model> {
        OrderEntity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load order")
    }

    pub async fn order_count(&self) -> usize {
        OrderEntity::find()
            .all(self.db())
            .await
            .expect("list orders")
            .len()
    }

    pub async fn item_count(&self, order_id: Uuid) -> usize {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.db())
            .await
            .expect("list items")
            .len()
    }

    /// Moves an order's creation time into the past.
    pub async fn backdate_order(&self, id: Uuid, age: ChronoDuration) {
        OrderEntity::update_many()
            .set(order::ActiveModel {
                created_at: Set(Utc::now() - age),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(id))
            .exec(self.db())
            .await
            .expect("backdate order");
    }

    /// A `checkout.session.completed` event body and a valid signature for it.
    pub fn signed_completion(&self, event_id: &str, order_id: Uuid) -> (String, String) {
        let payload = serde_json::json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "metadata": { "order_id": order_id.to_string() }
                }
            }
        })
        .to_string();
        let signature = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), payload.as_bytes())
            .expect("sign payload");
        (payload, signature)
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn post_webhook(&self, payload: String, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("Stripe-Signature", signature);
        }
        let request = builder.body(Body::from(payload)).expect("build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
