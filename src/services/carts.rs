use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::cart_item::{self, Entity as CartItemEntity},
    errors::ServiceError,
};

/// A (product, quantity) pair as the order builder consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Per-user server-side cart.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn lines_for(&self, user_id: &str) -> Result<Vec<CartLine>, ServiceError> {
        let rows = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| CartLine {
                product_id: row.product_id,
                quantity: row.quantity,
            })
            .collect())
    }

    /// Upserts a line; quantity 0 removes it.
    #[instrument(skip(self))]
    pub async fn set_line(
        &self,
        user_id: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".to_string(),
            ));
        }

        if quantity == 0 {
            CartItemEntity::delete_many()
                .filter(cart_item::Column::UserId.eq(user_id))
                .filter(cart_item::Column::ProductId.eq(product_id))
                .exec(&*self.db)
                .await?;
            return Ok(());
        }

        let now = Utc::now();
        let row = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id.to_string()),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        };

        CartItemEntity::insert(row)
            .on_conflict(
                OnConflict::columns([cart_item::Column::UserId, cart_item::Column::ProductId])
                    .update_columns([cart_item::Column::Quantity, cart_item::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    /// Empties the user's cart on whatever connection the caller is using,
    /// typically the order-creation transaction.
    pub async fn clear<C: ConnectionTrait>(&self, conn: &C, user_id: &str) -> Result<u64, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
