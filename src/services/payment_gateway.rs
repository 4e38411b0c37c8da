use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;

/// One priced line shown on the hosted payment page.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayLineItem {
    pub name: String,
    pub unit_amount: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub order_id: Uuid,
    pub currency: String,
    pub line_items: Vec<GatewayLineItem>,
    /// Fixed amount taken off the line items
    pub discount: Decimal,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutSessionRequest {
    /// What the gateway will charge for this request.
    pub fn amount_due(&self) -> Decimal {
        let gross: Decimal = self
            .line_items
            .iter()
            .map(|item| item.unit_amount * Decimal::from(item.quantity))
            .sum();
        (gross - self.discount).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Hosted payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;
}

/// Converts a major-unit amount to the integer minor units the gateway expects.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("Amount {} is out of range", amount)))
}

#[derive(Debug, Deserialize)]
struct GatewayCoupon {
    id: String,
}

/// Stripe Checkout over its form-encoded REST API.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "Payment gateway request failed");
                ServiceError::GatewayUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%url, %status, %body, "Payment gateway returned an error");
            return Err(ServiceError::GatewayUnavailable(format!(
                "{} responded {}",
                path, status
            )));
        }

        response.json::<T>().await.map_err(|e| {
            error!(%url, error = %e, "Unreadable payment gateway response");
            ServiceError::GatewayUnavailable(e.to_string())
        })
    }

    /// One-off amount-off coupon carrying the order's discount.
    async fn create_discount_coupon(
        &self,
        order_id: Uuid,
        currency: &str,
        discount: Decimal,
    ) -> Result<String, ServiceError> {
        let form = vec![
            ("amount_off".to_string(), to_minor_units(discount)?.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            ("duration".to_string(), "once".to_string()),
            ("metadata[order_id]".to_string(), order_id.to_string()),
        ];
        let coupon: GatewayCoupon = self.post_form("/v1/coupons", &form).await?;
        Ok(coupon.id)
    }
}

fn session_form(
    request: &CheckoutSessionRequest,
    coupon_id: Option<&str>,
) -> Result<Vec<(String, String)>, ServiceError> {
    let currency = request.currency.to_lowercase();
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("metadata[order_id]".to_string(), request.order_id.to_string()),
        ("client_reference_id".to_string(), request.order_id.to_string()),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        form.push((format!("{}[price_data][currency]", prefix), currency.clone()));
        form.push((
            format!("{}[price_data][unit_amount]", prefix),
            to_minor_units(item.unit_amount)?.to_string(),
        ));
        form.push((
            format!("{}[price_data][product_data][name]", prefix),
            item.name.clone(),
        ));
        form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
    }

    if let Some(coupon_id) = coupon_id {
        form.push(("discounts[0][coupon]".to_string(), coupon_id.to_string()));
    }
    Ok(form)
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let coupon_id = if request.discount > Decimal::ZERO {
            Some(
                self.create_discount_coupon(request.order_id, &request.currency, request.discount)
                    .await?,
            )
        } else {
            None
        };

        let form = session_form(&request, coupon_id.as_deref())?;
        let session: CheckoutSession = self.post_form("/v1/checkout/sessions", &form).await?;
        info!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }
}
