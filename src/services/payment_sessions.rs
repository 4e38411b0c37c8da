use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    services::{
        catalog::CatalogService,
        orders::OrderService,
        payment_gateway::{CheckoutSessionRequest, GatewayLineItem, PaymentGateway},
    },
};

const ORDER_ID_PLACEHOLDER: &str = "{ORDER_ID}";

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PaymentSession {
    pub order_id: Uuid,
    pub session_id: String,
    pub redirect_url: String,
}

/// Redirect settings for hosted payment pages.
#[derive(Debug, Clone)]
pub struct SessionUrls {
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl From<&AppConfig> for SessionUrls {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.currency.clone(),
            success_url: cfg.checkout_success_url.clone(),
            cancel_url: cfg.checkout_cancel_url.clone(),
        }
    }
}

/// Opens hosted payment sessions for existing, still-unpaid orders.
#[derive(Clone)]
pub struct PaymentSessionService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    catalog: Arc<CatalogService>,
    gateway: Arc<dyn PaymentGateway>,
    urls: SessionUrls,
}

impl PaymentSessionService {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        catalog: Arc<CatalogService>,
        gateway: Arc<dyn PaymentGateway>,
        urls: SessionUrls,
    ) -> Self {
        Self {
            db,
            orders,
            catalog,
            gateway,
            urls,
        }
    }

    /// Charges exactly the recorded total: line items use the frozen
    /// `price_at_time`, and the stored discount goes on as a fixed amount.
    /// A gateway failure leaves the order pending and payable later.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn create_payment_session(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<PaymentSession, ServiceError> {
        let order = self
            .orders
            .find_order(&*self.db, order_id)
            .await?
            .filter(|o| user.owns(&o.user_id))
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if !order.is_awaiting_payment() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not awaiting payment",
                order_id
            )));
        }

        let items = self.orders.items_for(&*self.db, order_id).await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has no items",
                order_id
            )));
        }

        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let names: HashMap<Uuid, String> = self
            .catalog
            .find_products(&*self.db, &product_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let line_items = items
            .iter()
            .map(|item| GatewayLineItem {
                name: names.get(&item.product_id).cloned().unwrap_or_else(|| {
                    warn!(product_id = %item.product_id, "Product missing; using placeholder name");
                    format!("Item {}", item.product_id)
                }),
                unit_amount: item.price_at_time,
                quantity: item.quantity,
            })
            .collect();

        let request = CheckoutSessionRequest {
            order_id,
            currency: self.urls.currency.clone(),
            line_items,
            discount: order.discount_amount,
            success_url: fill_order_id(&self.urls.success_url, order_id),
            cancel_url: fill_order_id(&self.urls.cancel_url, order_id),
        };

        if request.amount_due() != order.total_amount {
            error!(
                %order_id,
                amount_due = %request.amount_due(),
                total_amount = %order.total_amount,
                "Order items do not add up to the recorded total"
            );
            return Err(ServiceError::InternalError(format!(
                "Order {} totals are inconsistent",
                order_id
            )));
        }

        let session = self.gateway.create_checkout_session(request).await?;
        info!(%order_id, session_id = %session.id, "Payment session opened");

        Ok(PaymentSession {
            order_id,
            session_id: session.id,
            redirect_url: session.url,
        })
    }
}

fn fill_order_id(template: &str, order_id: Uuid) -> String {
    template.replace(ORDER_ID_PLACEHOLDER, &order_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_template_gets_order_id() {
        let id = Uuid::nil();
        assert_eq!(
            fill_order_id("https://shop.example/orders/{ORDER_ID}?paid=1", id),
            format!("https://shop.example/orders/{}?paid=1", id)
        );
        assert_eq!(fill_order_id("https://shop.example/", id), "https://shop.example/");
    }
}
