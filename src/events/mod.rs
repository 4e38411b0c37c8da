use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Facts published after the transaction that produced them has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: String,
        total_amount: Decimal,
        coupon_code: Option<String>,
    },
    OrderPaid {
        order_id: Uuid,
        gateway_event_id: String,
    },
    OrderCancelled(Uuid),
    /// Unpaid order removed by the expiry reaper
    OrderReaped {
        order_id: Uuid,
        created_at: DateTime<Utc>,
        reservation_released: bool,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderPaid { .. } => "order_paid",
            Event::OrderCancelled(_) => "order_cancelled",
            Event::OrderReaped { .. } => "order_reaped",
            Event::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishing never fails or waits on the operation that already committed.
    /// A full or closed channel drops the event.
    pub fn send_or_log(&self, event: Event) {
        let name = event.name();
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("storefront_events.dropped", 1, "event" => name, "reason" => "full");
                warn!(event = name, "Event channel full; dropping domain event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                counter!("storefront_events.dropped", 1, "event" => name, "reason" => "closed");
                warn!(event = name, "Event channel closed; dropping domain event");
            }
        }
    }
}

/// Drains the event channel until every sender is gone.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processing loop started");

    while let Some(event) = receiver.recv().await {
        counter!("storefront_events.processed", 1, "event" => event.name());
        match event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount,
                coupon_code,
            } => {
                info!(
                    %order_id,
                    %user_id,
                    %total_amount,
                    coupon = coupon_code.as_deref().unwrap_or("-"),
                    "Order created"
                );
            }
            Event::OrderPaid {
                order_id,
                gateway_event_id,
            } => {
                info!(%order_id, %gateway_event_id, "Order paid");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "Order cancelled by customer");
            }
            Event::OrderReaped {
                order_id,
                created_at,
                reservation_released,
            } => {
                info!(
                    %order_id,
                    %created_at,
                    reservation_released,
                    "Unpaid order expired"
                );
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::OrderCancelled(Uuid::nil()));
        assert!(sender.send(Event::OrderCancelled(Uuid::nil())).await.is_err());
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();
        sender.send_or_log(Event::OrderCancelled(id));
        sender.send_or_log(Event::OrderPaid {
            order_id: id,
            gateway_event_id: "evt_1".into(),
        });
        assert_eq!(rx.recv().await, Some(Event::OrderCancelled(id)));
        assert_eq!(rx.recv().await.map(|e| e.name()), Some("order_paid"));
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let first = Uuid::new_v4();
        sender.send_or_log(Event::OrderCancelled(first));

        // Nobody is draining; this must return immediately.
        tokio::time::timeout(std::time::Duration::from_millis(100), async {
            sender.send_or_log(Event::OrderCancelled(Uuid::new_v4()));
        })
        .await
        .expect("send_or_log blocked on a full channel");

        assert_eq!(rx.recv().await, Some(Event::OrderCancelled(first)));
        assert!(rx.try_recv().is_err());
    }
}
