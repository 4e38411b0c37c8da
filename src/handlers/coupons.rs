use axum::{extract::State, response::Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{auth::AuthUser, errors::ServiceError, services::coupons::CouponPreview, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Coupon code must be 1-64 characters"))]
    pub code: String,
    /// Cart subtotal the discount is computed against
    pub subtotal: Decimal,
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    summary = "Preview coupon",
    description = "Check a coupon and compute its discount without consuming a redemption",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon applies", body = CouponPreview),
        (status = 400, description = "Invalid, expired or exhausted coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<Json<CouponPreview>, ServiceError> {
    payload.validate()?;
    let preview = state
        .services
        .coupons
        .preview(&payload.code, payload.subtotal)
        .await?;
    Ok(Json(preview))
}
