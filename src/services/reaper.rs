use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::TransactionTrait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{OrderService, Removal},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub examined: usize,
    pub reaped: Vec<Uuid>,
    /// Paid or otherwise changed between listing and delete
    pub skipped: usize,
    pub failed: usize,
}

/// Deletes orders still unpaid after the TTL, independent of any client.
#[derive(Clone)]
pub struct ExpiryReaper {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    event_sender: EventSender,
    ttl: chrono::Duration,
    batch_size: u64,
    restore_reservations: bool,
}

impl ExpiryReaper {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        event_sender: EventSender,
        ttl: chrono::Duration,
        batch_size: u64,
        restore_reservations: bool,
    ) -> Self {
        Self {
            db,
            orders,
            event_sender,
            ttl,
            batch_size,
            restore_reservations,
        }
    }

    /// One pass over orders created before `now - ttl`. A failing order is
    /// logged and counted; the pass carries on with the rest.
    pub async fn reap_once(&self, now: DateTime<Utc>) -> Result<ReapReport, ServiceError> {
        let cutoff = now - self.ttl;
        let expired = self
            .orders
            .list_expired_pending(cutoff, self.batch_size)
            .await?;

        let mut report = ReapReport {
            examined: expired.len(),
            ..Default::default()
        };

        for candidate in expired {
            match self.reap_order(&candidate, cutoff).await {
                Ok(Removal::Removed {
                    reservation_released,
                }) => {
                    counter!("storefront_orders.reaped", 1);
                    report.reaped.push(candidate.id);
                    self.event_sender
                        .send_or_log(Event::OrderReaped {
                            order_id: candidate.id,
                            created_at: candidate.created_at,
                            reservation_released,
                        });
                }
                Ok(Removal::Skipped) => {
                    debug!(order_id = %candidate.id, "Order no longer reapable");
                    report.skipped += 1;
                }
                Err(err) => {
                    counter!("storefront_orders.reap_failed", 1);
                    error!(order_id = %candidate.id, error = %err, "Failed to reap order");
                    report.failed += 1;
                }
            }
        }

        if !report.reaped.is_empty() || report.failed > 0 {
            info!(
                examined = report.examined,
                reaped = report.reaped.len(),
                skipped = report.skipped,
                failed = report.failed,
                "Expiry reaper pass finished"
            );
        }
        Ok(report)
    }

    async fn reap_order(
        &self,
        candidate: &order::Model,
        cutoff: DateTime<Utc>,
    ) -> Result<Removal, ServiceError> {
        let txn = self.db.begin().await?;

        let result = match self.orders.find_order(&txn, candidate.id).await {
            Ok(Some(current)) => {
                self.orders
                    .remove_unpaid_order(&txn, &current, Some(cutoff), self.restore_reservations)
                    .await
            }
            Ok(None) => Ok(Removal::Skipped),
            Err(err) => Err(err),
        };

        match result {
            Ok(Removal::Removed {
                reservation_released,
            }) => {
                txn.commit().await?;
                Ok(Removal::Removed {
                    reservation_released,
                })
            }
            other => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back reaper transaction");
                }
                other
            }
        }
    }

    /// Runs `reap_once` every `interval` until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                ttl_secs = self.ttl.num_seconds(),
                "Expiry reaper started"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.reap_once(Utc::now()).await {
                            warn!(error = %err, "Expiry reaper pass failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Expiry reaper stopped");
        })
    }
}
