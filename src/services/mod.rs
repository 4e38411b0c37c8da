// Engine components, leaf first
pub mod pricing;
pub mod catalog;
pub mod coupons;
pub mod carts;
pub mod orders;
pub mod payment_gateway;
pub mod payment_sessions;
pub mod webhooks;
pub mod reaper;
