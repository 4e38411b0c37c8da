//! Order creation against a real schema: frozen prices, stock and coupon
//! reservations, and all-or-nothing behaviour under failure and contention.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_checkout::{
    entities::{
        coupon::DiscountType,
        order::{OrderStatus, PaymentStatus},
    },
    errors::ServiceError,
    services::{
        carts::CartLine,
        orders::{CouponPolicy, CreateOrderCommand},
    },
};
use uuid::Uuid;

fn command(user_id: &str, lines: Vec<CartLine>, coupon: Option<&str>) -> CreateOrderCommand {
    CreateOrderCommand {
        user_id: user_id.to_string(),
        lines,
        address_id: None,
        coupon_code: coupon.map(str::to_string),
        declared_discount: None,
        coupon_policy: CouponPolicy::Abort,
    }
}

fn line(product_id: Uuid, quantity: i32) -> CartLine {
    CartLine {
        product_id,
        quantity,
    }
}

#[tokio::test]
async fn order_freezes_list_price_and_reserves_stock() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;

    let details = app
        .services()
        .orders
        .create_order(command("user-1", vec![line(tea.id, 2)], None))
        .await
        .unwrap();

    assert_eq!(details.order.total_amount, dec!(200));
    assert_eq!(details.order.discount_amount, dec!(0));
    assert_eq!(details.order.payment_status, PaymentStatus::Pending);
    assert_eq!(details.order.status, OrderStatus::OrderPlaced);
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].price_at_time, dec!(100));
    assert_eq!(app.product(tea.id).await.stock, 3);
}

#[tokio::test]
async fn sale_price_wins_over_list_price() {
    let app = TestApp::new().await;
    let kettle = app
        .seed_product("Kettle", dec!(500), Some(dec!(400)), 3)
        .await;

    let details = app
        .services()
        .orders
        .create_order(command("user-1", vec![line(kettle.id, 1)], None))
        .await
        .unwrap();

    assert_eq!(details.items[0].price_at_time, dec!(400));
    assert_eq!(details.order.total_amount, dec!(400));
}

#[tokio::test]
async fn percentage_coupon_is_applied_and_redeemed() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), 5, ChronoDuration::days(1))
        .await;

    let mut cmd = command("user-1", vec![line(tea.id, 2)], Some(" save10 "));
    // The client's figure is advisory only
    cmd.declared_discount = Some(dec!(50));
    let details = app.services().orders.create_order(cmd).await.unwrap();

    assert_eq!(details.order.discount_amount, dec!(20));
    assert_eq!(details.order.total_amount, dec!(180));
    assert_eq!(details.order.coupon_code.as_deref(), Some("SAVE10"));
    assert_eq!(app.coupon("SAVE10").await.used_count, 1);
}

#[tokio::test]
async fn fixed_coupon_never_makes_total_negative() {
    let app = TestApp::new().await;
    let pin = app.seed_product("Pin", dec!(30), None, 5).await;
    app.seed_coupon("BIG", DiscountType::Fixed, dec!(50), 5, ChronoDuration::days(1))
        .await;

    let details = app
        .services()
        .orders
        .create_order(command("user-1", vec![line(pin.id, 1)], Some("BIG")))
        .await
        .unwrap();

    assert_eq!(details.order.discount_amount, dec!(30));
    assert_eq!(details.order.total_amount, dec!(0));
}

#[tokio::test]
async fn out_of_stock_rolls_back_every_reservation() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    let mug = app.seed_product("Mug", dec!(250), None, 1).await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), 5, ChronoDuration::days(1))
        .await;

    let result = app
        .services()
        .orders
        .create_order(command(
            "user-1",
            vec![line(tea.id, 2), line(mug.id, 2)],
            Some("SAVE10"),
        ))
        .await;

    assert_matches!(
        result,
        Err(ServiceError::OutOfStock { product_id, requested: 2, available: 1 }) if product_id == mug.id
    );
    assert_eq!(app.product(tea.id).await.stock, 5);
    assert_eq!(app.product(mug.id).await.stock, 1);
    assert_eq!(app.coupon("SAVE10").await.used_count, 0);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn expired_coupon_aborts_or_is_dropped_per_policy() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    app.seed_coupon("OLD", DiscountType::Fixed, dec!(10), 5, ChronoDuration::days(-1))
        .await;

    let aborted = app
        .services()
        .orders
        .create_order(command("user-1", vec![line(tea.id, 1)], Some("OLD")))
        .await;
    assert_matches!(aborted, Err(ServiceError::CouponExpired(_)));
    assert_eq!(app.product(tea.id).await.stock, 5);

    let mut cmd = command("user-1", vec![line(tea.id, 1)], Some("OLD"));
    cmd.coupon_policy = CouponPolicy::IgnoreCoupon;
    let details = app.services().orders.create_order(cmd).await.unwrap();
    assert_eq!(details.order.total_amount, dec!(100));
    assert_eq!(details.order.coupon_code, None);
    assert_eq!(app.coupon("OLD").await.used_count, 0);
}

#[tokio::test]
async fn unknown_coupon_and_unbacked_discount_are_rejected() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;

    let unknown = app
        .services()
        .orders
        .create_order(command("user-1", vec![line(tea.id, 1)], Some("NOPE")))
        .await;
    assert_matches!(unknown, Err(ServiceError::InvalidCoupon(code)) if code == "NOPE");

    let mut cmd = command("user-1", vec![line(tea.id, 1)], None);
    cmd.declared_discount = Some(dec!(10));
    let unbacked = app.services().orders.create_order(cmd).await;
    assert_matches!(unbacked, Err(ServiceError::ValidationError(_)));
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn duplicate_lines_are_merged_into_one_item() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;

    let details = app
        .services()
        .orders
        .create_order(command(
            "user-1",
            vec![line(tea.id, 1), line(tea.id, 2)],
            None,
        ))
        .await
        .unwrap();

    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 3);
    assert_eq!(app.product(tea.id).await.stock, 2);
}

#[tokio::test]
async fn stored_cart_is_emptied_by_order() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    app.services()
        .carts
        .set_line("user-1", tea.id, 2)
        .await
        .unwrap();

    let lines = app.services().carts.lines_for("user-1").await.unwrap();
    app.services()
        .orders
        .create_order(command("user-1", lines, None))
        .await
        .unwrap();

    assert!(app.services().carts.lines_for("user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_orders_never_oversell() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let orders = app.services().orders.clone();
        let cmd = command(&format!("user-{}", i), vec![line(tea.id, 1)], None);
        handles.push(tokio::spawn(async move { orders.create_order(cmd).await }));
    }

    let mut created = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(ServiceError::OutOfStock { .. }) => out_of_stock += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 5);
    assert_eq!(out_of_stock, 5);
    assert_eq!(app.product(tea.id).await.stock, 0);
    assert_eq!(app.order_count().await, 5);
}

#[tokio::test]
async fn last_coupon_slot_goes_to_one_order() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 10).await;
    app.seed_coupon("LAST", DiscountType::Fixed, dec!(10), 1, ChronoDuration::days(1))
        .await;

    let first = {
        let orders = app.services().orders.clone();
        let cmd = command("user-a", vec![line(tea.id, 1)], Some("LAST"));
        tokio::spawn(async move { orders.create_order(cmd).await })
    };
    let second = {
        let orders = app.services().orders.clone();
        let cmd = command("user-b", vec![line(tea.id, 1)], Some("LAST"));
        tokio::spawn(async move { orders.create_order(cmd).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ServiceError::CouponQuotaExceeded(_)))));
    assert_eq!(app.coupon("LAST").await.used_count, 1);
    assert_eq!(app.product(tea.id).await.stock, 9);
}

#[tokio::test]
async fn cancel_releases_stock_and_coupon_once() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), 5, ChronoDuration::days(1))
        .await;
    let details = app
        .services()
        .orders
        .create_order(command("user-1", vec![line(tea.id, 2)], Some("SAVE10")))
        .await
        .unwrap();
    let owner = TestApp::customer("user-1");

    let stranger = app
        .services()
        .orders
        .cancel_order(&TestApp::customer("user-2"), details.order.id)
        .await;
    assert_matches!(stranger, Err(ServiceError::OrderNotFound(_)));

    app.services()
        .orders
        .cancel_order(&owner, details.order.id)
        .await
        .unwrap();
    assert!(app.order(details.order.id).await.is_none());
    assert_eq!(app.item_count(details.order.id).await, 0);
    assert_eq!(app.product(tea.id).await.stock, 5);
    assert_eq!(app.coupon("SAVE10").await.used_count, 0);

    let again = app.services().orders.cancel_order(&owner, details.order.id).await;
    assert_matches!(again, Err(ServiceError::OrderNotFound(_)));
    assert_eq!(app.product(tea.id).await.stock, 5);
}

#[tokio::test]
async fn get_order_hides_other_customers_orders() {
    let app = TestApp::new().await;
    let tea = app.seed_product("Assam tea", dec!(100), None, 5).await;
    let details = app
        .services()
        .orders
        .create_order(command("user-1", vec![line(tea.id, 1)], None))
        .await
        .unwrap();

    let owner_view = app
        .services()
        .orders
        .get_order(&TestApp::customer("user-1"), details.order.id)
        .await
        .unwrap();
    assert_eq!(owner_view.order.id, details.order.id);
    assert_eq!(owner_view.order.total_amount, dec!(100));
    assert_eq!(owner_view.items.len(), 1);

    assert_matches!(
        app.services()
            .orders
            .get_order(&TestApp::customer("user-2"), details.order.id)
            .await,
        Err(ServiceError::OrderNotFound(_))
    );
    assert!(app
        .services()
        .orders
        .get_order(&TestApp::staff(), details.order.id)
        .await
        .is_ok());
}

#[tokio::test]
async fn stock_decrement_beyond_available_changes_nothing() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Mug", dec!(250), None, 3).await;

    let result = app
        .services()
        .catalog
        .decrement_stock(app.db(), mug.id, 4)
        .await;

    assert_matches!(
        result,
        Err(ServiceError::OutOfStock { product_id, requested: 4, available: 3 }) if product_id == mug.id
    );
    assert_eq!(app.product(mug.id).await.stock, 3);

    let missing = app
        .services()
        .catalog
        .decrement_stock(app.db(), Uuid::new_v4(), 1)
        .await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn stale_coupon_cannot_take_a_slot_already_gone() {
    let app = TestApp::new().await;
    app.seed_coupon("LAST1", DiscountType::Fixed, dec!(10), 1, ChronoDuration::days(1))
        .await;
    let ledger = &app.services().coupons;

    let validated = ledger.validate("LAST1").await.unwrap();
    assert_eq!(validated.used_count, 0);

    // Another checkout redeems the last slot after our validation.
    ledger.redeem(app.db(), "LAST1", Utc::now()).await.unwrap();

    let result = ledger.consume_slot(app.db(), validated, Utc::now()).await;
    assert_matches!(result, Err(ServiceError::CouponQuotaExceeded(code)) if code == "LAST1");
    assert_eq!(app.coupon("LAST1").await.used_count, 1);
}
