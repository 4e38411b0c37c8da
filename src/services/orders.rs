use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus, PAYMENT_METHOD_ONLINE},
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::{CartLine, CartService},
        catalog::CatalogService,
        coupons::{normalize_code, CouponLedger},
        pricing,
    },
};

/// What to do when the supplied coupon is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponPolicy {
    /// Fail the whole order with the coupon error
    #[default]
    Abort,
    /// Place the order at full price
    IgnoreCoupon,
}

#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub user_id: String,
    pub lines: Vec<CartLine>,
    pub address_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    /// Discount the client believes applies; the coupon decides
    pub declared_discount: Option<Decimal>,
    pub coupon_policy: CouponPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Outcome of the guarded delete shared by cancellation and reaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The row no longer matched the guard (paid, gone or too young)
    Skipped,
    Removed { reservation_released: bool },
}

/// Folds repeated products into one line, keeping first-seen order.
pub fn merge_lines(lines: &[CartLine]) -> Result<Vec<CartLine>, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order must contain at least one item".to_string(),
        ));
    }

    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Quantity for product {} is too large",
                        line.product_id
                    ))
                })?
            }
            None => merged.push(*line),
        }
    }
    Ok(merged)
}

struct PricedLine {
    product_id: Uuid,
    quantity: i32,
    unit_price: Decimal,
}

/// Order Builder plus the order store operations around it.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    catalog: Arc<CatalogService>,
    coupons: Arc<CouponLedger>,
    carts: Arc<CartService>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        catalog: Arc<CatalogService>,
        coupons: Arc<CouponLedger>,
        carts: Arc<CartService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            catalog,
            coupons,
            carts,
            event_sender,
        }
    }

    /// Validates the lines against live stock, freezes prices, reserves stock
    /// and the coupon, and empties the cart. All of it commits or none of it does.
    #[instrument(skip(self, command), fields(user_id = %command.user_id))]
    pub async fn create_order(&self, command: CreateOrderCommand) -> Result<OrderDetails, ServiceError> {
        let lines = merge_lines(&command.lines)?;
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        match self.build_order(&txn, &command, &lines, now).await {
            Ok(details) => {
                txn.commit().await.map_err(|e| {
                    error!(error = %e, order_id = %details.order.id, "Failed to commit order creation");
                    ServiceError::DatabaseError(e)
                })?;

                counter!("storefront_orders.created", 1);
                info!(
                    order_id = %details.order.id,
                    total_amount = %details.order.total_amount,
                    discount_amount = %details.order.discount_amount,
                    "Order created"
                );
                self.event_sender
                    .send_or_log(Event::OrderCreated {
                        order_id: details.order.id,
                        user_id: details.order.user_id.clone(),
                        total_amount: details.order.total_amount,
                        coupon_code: details.order.coupon_code.clone(),
                    });
                Ok(details)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back order creation");
                }
                counter!("storefront_orders.rejected", 1, "reason" => err.code());
                warn!(error = %err, "Order creation rejected");
                Err(err)
            }
        }
    }

    async fn build_order(
        &self,
        txn: &DatabaseTransaction,
        command: &CreateOrderCommand,
        lines: &[CartLine],
        now: DateTime<Utc>,
    ) -> Result<OrderDetails, ServiceError> {
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, _> = self
            .catalog
            .find_products(txn, &ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut priced = Vec::with_capacity(lines.len());
        let mut calculated_total = Decimal::ZERO;
        for line in lines {
            let product = products.get(&line.product_id).ok_or_else(|| {
                ServiceError::ValidationError(format!("Unknown product {}", line.product_id))
            })?;
            if product.stock < line.quantity {
                return Err(ServiceError::OutOfStock {
                    product_id: product.id,
                    requested: line.quantity,
                    available: product.stock,
                });
            }
            let unit_price = pricing::effective_price(product);
            calculated_total += unit_price * Decimal::from(line.quantity);
            priced.push(PricedLine {
                product_id: product.id,
                quantity: line.quantity,
                unit_price,
            });
        }

        let code = command
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let declared = command.declared_discount.unwrap_or(Decimal::ZERO);
        if declared < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Discount amount cannot be negative".to_string(),
            ));
        }

        let redeemed = match code {
            Some(code) => match self.coupons.redeem(txn, code, now).await {
                Ok(coupon) => Some(coupon),
                Err(err)
                    if err.is_coupon_rejection()
                        && command.coupon_policy == CouponPolicy::IgnoreCoupon =>
                {
                    warn!(code = %normalize_code(code), error = %err, "Placing order without rejected coupon");
                    None
                }
                Err(err) => return Err(err),
            },
            None if declared > Decimal::ZERO => {
                return Err(ServiceError::ValidationError(
                    "A discount requires a valid coupon".to_string(),
                ));
            }
            None => None,
        };

        let discount_amount = match &redeemed {
            Some(coupon) => {
                let discount = pricing::apply_discount(
                    calculated_total,
                    coupon.discount_type,
                    coupon.discount_value,
                );
                if command.declared_discount.is_some() && declared != discount {
                    warn!(
                        code = %coupon.code,
                        %declared,
                        %discount,
                        "Client-declared discount differs from coupon; using coupon"
                    );
                }
                discount
            }
            None => Decimal::ZERO,
        };
        let total_amount = pricing::final_amount(calculated_total, discount_amount);

        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(command.user_id.clone()),
            address_id: Set(command.address_id),
            total_amount: Set(total_amount),
            discount_amount: Set(discount_amount),
            coupon_code: Set(redeemed.as_ref().map(|c| c.code.clone())),
            payment_status: Set(PaymentStatus::Pending),
            status: Set(OrderStatus::OrderPlaced),
            payment_method: Set(PAYMENT_METHOD_ONLINE.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        let mut items = Vec::with_capacity(priced.len());
        for line in &priced {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price_at_time: Set(line.unit_price),
            }
            .insert(txn)
            .await?;
            self.catalog
                .decrement_stock(txn, line.product_id, line.quantity)
                .await?;
            items.push(item);
        }

        self.carts.clear(txn, &command.user_id).await?;

        Ok(OrderDetails { order, items })
    }

    pub async fn find_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(conn).await?)
    }

    pub async fn items_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await?)
    }

    /// Owner or staff. Other callers see the order as missing.
    pub async fn get_order(&self, user: &AuthUser, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self
            .find_order(&*self.db, order_id)
            .await?
            .filter(|o| user.owns(&o.user_id) || user.is_staff())
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        let items = self.items_for(&*self.db, order_id).await?;
        Ok(OrderDetails { order, items })
    }

    /// Customer cancellation of an order still awaiting payment. The order
    /// is deleted and its stock and coupon redemption are given back.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn cancel_order(&self, user: &AuthUser, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        match self.cancel_in_txn(&txn, user, order_id).await {
            Ok(()) => {
                txn.commit().await?;
                counter!("storefront_orders.cancelled", 1);
                info!(%order_id, "Order cancelled");
                self.event_sender
                    .send_or_log(Event::OrderCancelled(order_id));
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back order cancellation");
                }
                Err(err)
            }
        }
    }

    async fn cancel_in_txn(
        &self,
        txn: &DatabaseTransaction,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let order = self
            .find_order(txn, order_id)
            .await?
            .filter(|o| user.owns(&o.user_id))
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if !order.is_awaiting_payment() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} can no longer be cancelled ({:?}, {})",
                order_id, order.payment_status, order.status
            )));
        }

        match self.remove_unpaid_order(txn, &order, None, true).await? {
            Removal::Removed { .. } => Ok(()),
            Removal::Skipped => Err(ServiceError::Conflict(format!(
                "Order {} changed while cancelling",
                order_id
            ))),
        }
    }

    /// Deletes `order` only while it is still unpaid (and older than
    /// `created_before`, when given). On `Skipped` the caller must roll back,
    /// since the item rows were already removed on `txn`.
    pub async fn remove_unpaid_order(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        created_before: Option<DateTime<Utc>>,
        release_reservation: bool,
    ) -> Result<Removal, ServiceError> {
        let items = self.items_for(txn, order.id).await?;

        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order.id))
            .exec(txn)
            .await?;

        let mut delete = OrderEntity::delete_many()
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending));
        if let Some(cutoff) = created_before {
            delete = delete.filter(order::Column::CreatedAt.lt(cutoff));
        }
        if delete.exec(txn).await?.rows_affected == 0 {
            return Ok(Removal::Skipped);
        }

        // Only an order_placed order still holds its reservation.
        let reservation_released = release_reservation && order.status == OrderStatus::OrderPlaced;
        if reservation_released {
            for item in &items {
                self.catalog
                    .restore_stock(txn, item.product_id, item.quantity)
                    .await?;
            }
            if let Some(code) = &order.coupon_code {
                self.coupons.decrement_usage(txn, code).await?;
            }
        }

        Ok(Removal::Removed {
            reservation_released,
        })
    }

    /// Staff-driven fulfilment moves: processing -> shipped -> delivered.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn advance_status(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        if !user.is_staff() {
            return Err(ServiceError::Forbidden(
                "Only store staff can change order status".to_string(),
            ));
        }

        let order = self
            .find_order(&*self.db, order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let staff_move = matches!(
            (order.status, next),
            (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        );
        if !staff_move || !order.status.can_transition_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot move order from {} to {}",
                order.status, next
            )));
        }

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .set(order::ActiveModel {
                status: Set(next),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(order.status))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} changed concurrently",
                order_id
            )));
        }

        info!(%order_id, from = %order.status, to = %next, "Order status advanced");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: order.status.to_string(),
                new_status: next.to_string(),
            });

        Ok(order::Model {
            status: next,
            updated_at: now,
            ..order
        })
    }

    /// Unpaid orders created before `cutoff`, oldest first.
    pub async fn list_expired_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .order_by_asc(order::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn line(product_id: Uuid, quantity: i32) -> CartLine {
        CartLine {
            product_id,
            quantity,
        }
    }

    #[test]
    fn merge_lines_sums_duplicates_in_first_seen_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let merged = merge_lines(&[line(a, 1), line(b, 2), line(a, 3)]).unwrap();
        assert_eq!(merged, vec![line(a, 4), line(b, 2)]);
    }

    #[test]
    fn merge_lines_rejects_empty_and_non_positive() {
        assert_matches!(merge_lines(&[]), Err(ServiceError::ValidationError(_)));
        assert_matches!(
            merge_lines(&[line(Uuid::new_v4(), 0)]),
            Err(ServiceError::ValidationError(_))
        );
    }
}
