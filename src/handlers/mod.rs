pub mod checkout;
pub mod coupons;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        carts::CartService,
        catalog::CatalogService,
        coupons::CouponLedger,
        orders::OrderService,
        payment_gateway::PaymentGateway,
        payment_sessions::{PaymentSessionService, SessionUrls},
        reaper::ExpiryReaper,
        webhooks::WebhookReconciler,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub coupons: Arc<CouponLedger>,
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payment_sessions: Arc<PaymentSessionService>,
    pub webhooks: Arc<WebhookReconciler>,
    pub reaper: Arc<ExpiryReaper>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new());
        let coupons = Arc::new(CouponLedger::new(db_pool.clone()));
        let carts = Arc::new(CartService::new(db_pool.clone()));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            catalog.clone(),
            coupons.clone(),
            carts.clone(),
            event_sender.clone(),
        ));
        let payment_sessions = Arc::new(PaymentSessionService::new(
            db_pool.clone(),
            orders.clone(),
            catalog.clone(),
            gateway,
            SessionUrls::from(config),
        ));
        let webhooks = Arc::new(WebhookReconciler::new(
            db_pool.clone(),
            event_sender.clone(),
            config.payment_webhook_secret.clone(),
            config.payment_webhook_tolerance_secs,
        ));
        let reaper = Arc::new(ExpiryReaper::new(
            db_pool,
            orders.clone(),
            event_sender,
            config.pending_order_ttl(),
            config.reaper_batch_size,
            config.reaper_restore_reservations,
        ));

        Self {
            catalog,
            coupons,
            carts,
            orders,
            payment_sessions,
            webhooks,
            reaper,
        }
    }
}
