use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        processed_webhook_event::{self, Entity as ProcessedEventEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// What a delivered event did to the order store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The order moved to (paid, processing)
    Paid(Uuid),
    /// The order was already paid; nothing changed
    AlreadyPaid(Uuid),
    /// This event id was applied before
    Duplicate,
    /// Event type or order state this engine does not act on
    Ignored,
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: GatewayEventData,
}

#[derive(Debug, Deserialize)]
struct GatewayEventData {
    object: GatewayObject,
}

#[derive(Debug, Deserialize)]
struct GatewayObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl GatewayObject {
    fn order_id(&self) -> Result<Uuid, ServiceError> {
        let raw = self
            .metadata
            .get("order_id")
            .or_else(|| self.metadata.get("orderId"))
            .ok_or_else(|| ServiceError::BadRequest("Event carries no order id".to_string()))?;
        Uuid::parse_str(raw)
            .map_err(|_| ServiceError::BadRequest(format!("Malformed order id {}", raw)))
    }
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, ServiceError> {
    Ok(format!(
        "t={},v1={}",
        timestamp,
        compute_signature(secret, timestamp, payload)?
    ))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Checks `t=<unix>,v1=<hex>` against the raw body. Any `v1` may match.
pub fn verify_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now_unix: i64,
) -> Result<(), ServiceError> {
    let header =
        header.ok_or_else(|| ServiceError::SignatureInvalid("Missing signature header".to_string()))?;

    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::SignatureInvalid("Missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(ServiceError::SignatureInvalid("Missing v1 signature".to_string()));
    }
    if (now_unix - timestamp).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::SignatureInvalid(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let expected = compute_signature(secret, timestamp, payload)?;
    if candidates.iter().any(|c| constant_time_eq(&expected, c)) {
        Ok(())
    } else {
        Err(ServiceError::SignatureInvalid("Signature mismatch".to_string()))
    }
}

/// Applies gateway "payment completed" notifications to orders, at most once
/// per event id and at most once per order.
#[derive(Clone)]
pub struct WebhookReconciler {
    db: Arc<DbPool>,
    event_sender: EventSender,
    secret: String,
    tolerance_secs: u64,
}

impl WebhookReconciler {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, secret: String, tolerance_secs: u64) -> Self {
        Self {
            db,
            event_sender,
            secret,
            tolerance_secs,
        }
    }

    #[instrument(skip(self, signature, payload), fields(payload_len = payload.len()))]
    pub async fn handle(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome, ServiceError> {
        if let Err(err) = verify_signature(
            signature,
            payload,
            &self.secret,
            self.tolerance_secs,
            Utc::now().timestamp(),
        ) {
            counter!("storefront_webhooks.rejected", 1, "reason" => "signature");
            warn!(error = %err, "Payment webhook signature verification failed");
            return Err(err);
        }

        let event: GatewayEvent = serde_json::from_slice(payload).map_err(|e| {
            counter!("storefront_webhooks.rejected", 1, "reason" => "payload");
            ServiceError::BadRequest(format!("Invalid webhook payload: {}", e))
        })?;

        if event.event_type != CHECKOUT_COMPLETED {
            info!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event type");
            return Ok(WebhookOutcome::Ignored);
        }

        let order_id = event.data.object.order_id()?;

        let txn = self.db.begin().await?;
        match self.apply_completed(&txn, &event, order_id).await {
            Ok(outcome) => {
                txn.commit().await?;
                counter!("storefront_webhooks.processed", 1);
                match outcome {
                    WebhookOutcome::Paid(order_id) => {
                        info!(%order_id, event_id = %event.id, "Order marked paid");
                        self.event_sender.send_or_log(Event::OrderPaid {
                            order_id,
                            gateway_event_id: event.id.clone(),
                        });
                    }
                    WebhookOutcome::Duplicate => {
                        counter!("storefront_webhooks.duplicate", 1);
                        info!(event_id = %event.id, "Webhook event already processed");
                    }
                    _ => {}
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back webhook processing");
                }
                Err(err)
            }
        }
    }

    async fn apply_completed(
        &self,
        txn: &DatabaseTransaction,
        event: &GatewayEvent,
        order_id: Uuid,
    ) -> Result<WebhookOutcome, ServiceError> {
        let now = Utc::now();
        let recorded = ProcessedEventEntity::insert(processed_webhook_event::ActiveModel {
            event_id: Set(event.id.clone()),
            event_type: Set(event.event_type.clone()),
            order_id: Set(Some(order_id)),
            processed_at: Set(now),
        })
        .on_conflict(
            OnConflict::column(processed_webhook_event::Column::EventId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;
        if recorded == 0 {
            return Ok(WebhookOutcome::Duplicate);
        }

        let order = OrderEntity::find_by_id(order_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                warn!(%order_id, event_id = %event.id, session_id = ?event.data.object.id, "Webhook references unknown order");
                ServiceError::OrderNotFound(order_id)
            })?;

        if order.payment_status == PaymentStatus::Paid {
            return Ok(WebhookOutcome::AlreadyPaid(order_id));
        }
        if order.status != OrderStatus::OrderPlaced {
            warn!(%order_id, status = %order.status, "Unpaid order is not awaiting payment; leaving it");
            return Ok(WebhookOutcome::Ignored);
        }

        Self::mark_paid(txn, order_id, now).await
    }

    /// Moves a pending order to (paid, processing) with one guarded update.
    ///
    /// When the update matches nothing the order is re-read: a missing order
    /// is `OrderNotFound` so the caller rolls back the recorded event, and a
    /// paid one is `AlreadyPaid`.
    pub async fn mark_paid<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, ServiceError> {
        // Both fields move together, and only off (pending, order_placed).
        let result = OrderEntity::update_many()
            .set(order::ActiveModel {
                payment_status: Set(PaymentStatus::Paid),
                status: Set(OrderStatus::Processing),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::Status.eq(OrderStatus::OrderPlaced))
            .exec(conn)
            .await?;
        if result.rows_affected > 0 {
            return Ok(WebhookOutcome::Paid(order_id));
        }

        match OrderEntity::find_by_id(order_id).one(conn).await? {
            None => {
                warn!(%order_id, "Order disappeared before it could be marked paid");
                Err(ServiceError::OrderNotFound(order_id))
            }
            Some(order) if order.payment_status == PaymentStatus::Paid => {
                Ok(WebhookOutcome::AlreadyPaid(order_id))
            }
            Some(_) => Ok(WebhookOutcome::Ignored),
        }
    }
}
