use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};

/// Reads and conditionally mutates product stock. Every mutation is a single
/// guarded `UPDATE`, so concurrent checkouts can never push stock below zero.
/// It runs on whatever connection or transaction the caller holds.
#[derive(Clone, Default)]
pub struct CatalogService;

impl CatalogService {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_product<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
    ) -> Result<Option<product::Model>, ServiceError> {
        Ok(ProductEntity::find_by_id(product_id).one(conn).await?)
    }

    pub async fn find_products<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_ids: &[Uuid],
    ) -> Result<Vec<product::Model>, ServiceError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids.iter().copied()))
            .all(conn)
            .await?)
    }

    /// `stock = stock - qty` only while `stock >= qty`.
    #[instrument(skip(self, conn))]
    pub async fn decrement_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be positive, got {}",
                quantity
            )));
        }

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 1 {
            return Ok(());
        }

        match self.find_product(conn, product_id).await? {
            Some(current) => Err(ServiceError::OutOfStock {
                product_id,
                requested: quantity,
                available: current.stock,
            }),
            None => Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            ))),
        }
    }

    /// Returns held units to stock. `false` when the product no longer exists.
    #[instrument(skip(self, conn))]
    pub async fn restore_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        if quantity <= 0 {
            return Ok(true);
        }

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(%product_id, quantity, "Cannot restore stock for missing product");
            return Ok(false);
        }
        Ok(true)
    }
}
