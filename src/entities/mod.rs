//! SeaORM entities backing the checkout engine.

pub mod cart_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod processed_webhook_event;
pub mod product;

pub use order::{OrderStatus, PaymentStatus};
