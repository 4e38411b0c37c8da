use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::request_context::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    #[schema(example = "Unprocessable Entity")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Out of stock: product 550e8400-e29b-41d4-a716-446655440000 has 1, requested 2")]
    pub message: String,
    /// Machine-readable code for client-side branching (e.g., "out_of_stock", "coupon_expired")
    #[schema(example = "out_of_stock")]
    pub code: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Out of stock: product {product_id} has {available}, requested {requested}")]
    OutOfStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("Coupon expired: {0}")]
    CouponExpired(String),

    #[error("Coupon usage limit reached: {0}")]
    CouponQuotaExceeded(String),

    #[error("Invalid webhook signature: {0}")]
    SignatureInvalid(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) | Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::InvalidStatus(_)
            | Self::BadRequest(_)
            | Self::InvalidCoupon(_)
            | Self::CouponExpired(_)
            | Self::CouponQuotaExceeded(_)
            | Self::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::OutOfStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable code, mirrored into `ErrorResponse::code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::OrderNotFound(_) => "order_not_found",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::InvalidCoupon(_) => "invalid_coupon",
            Self::CouponExpired(_) => "coupon_expired",
            Self::CouponQuotaExceeded(_) => "coupon_quota_exceeded",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::InvalidStatus(_) => "invalid_status",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// True for the coupon validation family, which callers may choose to
    /// downgrade to "order without discount".
    pub fn is_coupon_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidCoupon(_) | Self::CouponExpired(_) | Self::CouponQuotaExceeded(_)
        )
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            // The gateway's raw error body stays in the logs
            Self::GatewayUnavailable(_) => {
                "Payment provider is temporarily unavailable, please retry payment".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.code().to_string(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
