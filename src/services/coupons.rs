use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::{
    db::DbPool,
    entities::coupon::{self, DiscountType, Entity as CouponEntity},
    errors::ServiceError,
    services::pricing,
};

/// Result of checking a code against a subtotal without redeeming it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CouponPreview {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Coupon validation and usage accounting.
#[derive(Clone)]
pub struct CouponLedger {
    db: Arc<DbPool>,
}

impl CouponLedger {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Checks a loaded coupon against `now`. Never touches `used_count`.
    pub fn check(coupon: &coupon::Model, now: DateTime<Utc>) -> Result<(), ServiceError> {
        if !coupon.is_active {
            return Err(ServiceError::InvalidCoupon(coupon.code.clone()));
        }
        if now > coupon.expires_at {
            return Err(ServiceError::CouponExpired(coupon.code.clone()));
        }
        if coupon.used_count >= coupon.usage_limit {
            return Err(ServiceError::CouponQuotaExceeded(coupon.code.clone()));
        }
        Ok(())
    }

    pub async fn find_by_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(CouponEntity::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(conn)
            .await?)
    }

    pub async fn validate(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        self.validate_with(&*self.db, code, Utc::now()).await
    }

    pub async fn validate_with<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<coupon::Model, ServiceError> {
        let coupon = self
            .find_by_code(conn, code)
            .await?
            .ok_or_else(|| ServiceError::InvalidCoupon(normalize_code(code)))?;
        Self::check(&coupon, now)?;
        Ok(coupon)
    }

    /// Validates and consumes one redemption in a single guarded `UPDATE`.
    /// At the last free slot only one concurrent caller succeeds.
    #[instrument(skip(self, conn))]
    pub async fn redeem<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<coupon::Model, ServiceError> {
        let coupon = self.validate_with(conn, code, now).await?;
        self.consume_slot(conn, coupon, now).await
    }

    /// Takes one usage slot of an already validated coupon. The row is
    /// re-checked by the `UPDATE` itself, so a stale `coupon` cannot overshoot
    /// `usage_limit`.
    pub async fn consume_slot<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon: coupon::Model,
        now: DateTime<Utc>,
    ) -> Result<coupon::Model, ServiceError> {
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(coupon::Column::ExpiresAt.gte(now))
            .filter(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::UsageLimit)))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Lost a race: report whatever the row says now.
            warn!(code = %coupon.code, "Coupon changed before redemption");
            if let Some(current) = CouponEntity::find_by_id(coupon.id).one(conn).await? {
                Self::check(&current, now)?;
            }
            return Err(ServiceError::CouponQuotaExceeded(coupon.code));
        }

        debug!(code = %coupon.code, "Coupon redeemed");
        Ok(coupon::Model {
            used_count: coupon.used_count + 1,
            ..coupon
        })
    }

    /// Gives a redemption back. `false` when the code is gone or already at zero.
    #[instrument(skip(self, conn))]
    pub async fn decrement_usage<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<bool, ServiceError> {
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).sub(1),
            )
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .filter(coupon::Column::UsedCount.gt(0))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(code = %normalize_code(code), "Coupon usage not decremented");
            return Ok(false);
        }
        Ok(true)
    }

    /// What the coupon would take off `subtotal`, for form validation.
    pub async fn preview(&self, code: &str, subtotal: Decimal) -> Result<CouponPreview, ServiceError> {
        if subtotal < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Subtotal cannot be negative".to_string(),
            ));
        }
        let coupon = self.validate(code).await?;
        let discount_amount =
            pricing::apply_discount(subtotal, coupon.discount_type, coupon.discount_value);

        Ok(CouponPreview {
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            discount_amount,
            final_amount: pricing::final_amount(subtotal, discount_amount),
        })
    }
}
