mod common;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use common::{
    FailingNotifier, RecordingNotifier, create_product, operator, setup_state, setup_state_with,
    shopper, stock_of, update_product,
};
use sea_orm::{ActiveValue::Set, EntityTrait};
use shop_api::{
    config::RateLimitConfig,
    dto::{
        cart::AddCartItemRequest,
        orders::{OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest},
    },
    entity::Carts,
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus},
    notification::Notifier,
    routes::params::{AdminOrderQuery, OrderListQuery},
    services::{admin_service, cart_service, catalog_service, order_service},
    state::AppState,
};
use uuid::Uuid;

async fn add(state: &AppState, user: &AuthUser, product_id: Uuid, quantity: i32) -> anyhow::Result<()> {
    cart_service::add_item(
        state,
        user,
        AddCartItemRequest {
            product_id,
            quantity,
        },
    )
    .await?;
    Ok(())
}

async fn checkout(state: &AppState, user: &AuthUser) -> Result<OrderWithItems, AppError> {
    let resp = order_service::place_order(state, user, PlaceOrderRequest::default()).await?;
    Ok(resp.data.expect("order data"))
}

#[tokio::test]
async fn checkout_reserves_stock_and_clears_the_cart() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &user, product.id, 2).await?;

    let placed = checkout(&state, &user).await?;

    assert_eq!(placed.order.status, OrderStatus::Created);
    assert_eq!(placed.order.payment_status, PaymentStatus::Paid);
    assert_eq!(placed.order.user_id, user.user_id);
    assert!(placed.order.payment_reference.starts_with("PAY-"));
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].quantity, 2);
    assert_eq!(placed.items[0].price_each, 2_500);
    assert_eq!(placed.items[0].product_name, "Kettle");
    assert_eq!(placed.order.total_amount, 5_000);
    let subtotals: i64 = placed.items.iter().map(|item| item.subtotal).sum();
    assert_eq!(subtotals, placed.order.total_amount);

    assert_eq!(stock_of(&state, product.id).await?, 8);
    let cart = cart_service::get_or_create_cart(&state, &user)
        .await?
        .data
        .expect("cart data");
    assert!(cart.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn checkout_uses_the_current_price() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 1_000, 10).await?;
    add(&state, &user, product.id, 3).await?;

    let product = update_product(&state, &product, |p| p.price = Set(1_200)).await?;
    let placed = checkout(&state, &user).await?;
    assert_eq!(placed.order.total_amount, 3_600);

    // Later price changes leave the order snapshot alone.
    update_product(&state, &product, |p| p.price = Set(9_999)).await?;
    let stored = order_service::get_order(&state, &user, placed.order.id)
        .await?
        .data
        .expect("order data");
    assert_eq!(stored.items[0].price_each, 1_200);
    assert_eq!(stored.order.total_amount, 3_600);
    Ok(())
}

#[tokio::test]
async fn empty_or_missing_cart_cannot_be_checked_out() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = shopper(&state, "ada@example.com").await?;

    let err = checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));

    cart_service::get_or_create_cart(&state, &user).await?;
    let err = checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    Ok(())
}

#[tokio::test]
async fn failed_checkout_changes_nothing() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = shopper(&state, "ada@example.com").await?;
    let kettle = create_product(&state, "Kettle", 2_500, 10).await?;
    let toaster = create_product(&state, "Toaster", 4_000, 10).await?;
    add(&state, &user, kettle.id, 2).await?;
    add(&state, &user, toaster.id, 1).await?;

    update_product(&state, &toaster, |p| p.active = Set(false)).await?;
    let err = checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::Unavailable(_)), "got {err:?}");

    assert_eq!(stock_of(&state, kettle.id).await?, 10);
    assert_eq!(stock_of(&state, toaster.id).await?, 10);
    let cart = cart_service::get_or_create_cart(&state, &user)
        .await?
        .data
        .expect("cart data");
    assert_eq!(cart.items.len(), 2);

    let orders = order_service::list_orders(&state, &user, OrderListQuery::default())
        .await?
        .data
        .expect("orders");
    assert!(orders.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn stock_that_ran_out_after_adding_fails_checkout() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 5).await?;
    add(&state, &user, product.id, 4).await?;

    update_product(&state, &product, |p| p.stock = Set(3)).await?;
    let err = checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { available: 3, .. }));
    assert_eq!(stock_of(&state, product.id).await?, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_checkouts_never_oversell() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let first = shopper(&state, "ada@example.com").await?;
    let second = shopper(&state, "bob@example.com").await?;
    let product = create_product(&state, "Last kettle", 2_500, 1).await?;
    add(&state, &first, product.id, 1).await?;
    add(&state, &second, product.id, 1).await?;

    let handles: Vec<_> = [first, second]
        .into_iter()
        .map(|user| {
            let state = state.clone();
            tokio::spawn(async move { checkout(&state, &user).await })
        })
        .collect();

    let mut placed = 0;
    let mut short = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => placed += 1,
            Err(AppError::InsufficientStock { available, .. }) => {
                assert_eq!(available, 0);
                short += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!((placed, short), (1, 1));
    assert_eq!(stock_of(&state, product.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn cancelling_restores_stock_once() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &user, product.id, 3).await?;
    let placed = checkout(&state, &user).await?;
    assert_eq!(stock_of(&state, product.id).await?, 7);

    let cancelled = order_service::cancel_order(&state, &user, placed.order.id)
        .await?
        .data
        .expect("order data");
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, product.id).await?, 10);

    let err = order_service::cancel_order(&state, &user, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(stock_of(&state, product.id).await?, 10);
    Ok(())
}

#[tokio::test]
async fn stock_is_conserved_across_orders_and_cancellations() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let ada = shopper(&state, "ada@example.com").await?;
    let bob = shopper(&state, "bob@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;

    add(&state, &ada, product.id, 3).await?;
    let ada_order = checkout(&state, &ada).await?;
    add(&state, &bob, product.id, 2).await?;
    checkout(&state, &bob).await?;
    order_service::cancel_order(&state, &ada, ada_order.order.id).await?;

    // initial - ordered in live orders
    assert_eq!(stock_of(&state, product.id).await?, 10 - 2);
    Ok(())
}

#[tokio::test]
async fn only_the_owner_can_cancel() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let owner = shopper(&state, "ada@example.com").await?;
    let stranger = shopper(&state, "eve@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &owner, product.id, 1).await?;
    let placed = checkout(&state, &owner).await?;

    let err = order_service::cancel_order(&state, &stranger, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = order_service::get_order(&state, &stranger, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = order_service::cancel_order(&state, &owner, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert_eq!(stock_of(&state, product.id).await?, 9);
    Ok(())
}

#[tokio::test]
async fn orders_are_listed_per_user() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let ada = shopper(&state, "ada@example.com").await?;
    let bob = shopper(&state, "bob@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;

    for _ in 0..2 {
        add(&state, &ada, product.id, 1).await?;
        checkout(&state, &ada).await?;
    }
    add(&state, &bob, product.id, 1).await?;
    checkout(&state, &bob).await?;

    let resp = order_service::list_orders(&state, &ada, OrderListQuery::default()).await?;
    let meta = resp.meta.expect("meta");
    assert_eq!(meta.total, Some(2));
    assert_eq!(meta.page, Some(1));
    let orders = resp.data.expect("orders");
    assert!(orders.items.iter().all(|o| o.user_id == ada.user_id));

    let first_page = order_service::list_orders(
        &state,
        &ada,
        OrderListQuery {
            per_page: Some(1),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert_eq!(first_page.items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn order_notification_is_sent_after_commit() -> anyhow::Result<()> {
    let (notifier, mut received) = RecordingNotifier::channel();
    let state = setup_state_with(notifier, RateLimitConfig::default()).await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &user, product.id, 2).await?;

    let placed = checkout(&state, &user).await?;

    let notice = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await?
        .expect("notice");
    assert_eq!(notice.order_id, placed.order.id);
    assert_eq!(notice.user_id, user.user_id);
    assert_eq!(notice.email, "ada@example.com");
    assert_eq!(notice.total_amount, 5_000);
    assert_eq!(notice.payment_reference, placed.order.payment_reference);
    Ok(())
}

#[tokio::test]
async fn failing_notifier_does_not_fail_the_order() -> anyhow::Result<()> {
    let notifier = Notifier::new(Arc::new(FailingNotifier));
    let state = setup_state_with(notifier, RateLimitConfig::default()).await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &user, product.id, 1).await?;

    let placed = checkout(&state, &user).await?;
    assert_eq!(placed.order.status, OrderStatus::Created);
    assert_eq!(stock_of(&state, product.id).await?, 9);
    Ok(())
}

#[tokio::test]
async fn operator_can_move_orders_between_live_states() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let admin = operator(&state).await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &user, product.id, 2).await?;
    let placed = checkout(&state, &user).await?;

    let err = admin_service::update_order_status(
        &state,
        &user,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let delivered = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Delivered,
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(delivered.status, OrderStatus::Delivered);

    // Delivered orders are no longer cancellable by their owner.
    let err = order_service::cancel_order(&state, &user, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let shipped = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert_eq!(stock_of(&state, product.id).await?, 8);
    Ok(())
}

#[tokio::test]
async fn cancelled_status_restocks_and_is_final() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let admin = operator(&state).await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &user, product.id, 4).await?;
    let placed = checkout(&state, &user).await?;

    let cancelled = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Cancelled,
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, product.id).await?, 10);

    let err = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Created,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = admin_service::cancel_order_admin(&state, &admin, placed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(stock_of(&state, product.id).await?, 10);
    Ok(())
}

#[tokio::test]
async fn operator_lists_and_filters_all_orders() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let admin = operator(&state).await?;
    let ada = shopper(&state, "ada@example.com").await?;
    let bob = shopper(&state, "bob@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;

    add(&state, &ada, product.id, 1).await?;
    let ada_order = checkout(&state, &ada).await?;
    add(&state, &bob, product.id, 1).await?;
    checkout(&state, &bob).await?;
    admin_service::cancel_order_admin(&state, &admin, ada_order.order.id).await?;

    let err = admin_service::list_all_orders(&state, &ada, AdminOrderQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let all = admin_service::list_all_orders(&state, &admin, AdminOrderQuery::default())
        .await?
        .data
        .expect("orders");
    assert_eq!(all.items.len(), 2);

    let cancelled = admin_service::list_all_orders(
        &state,
        &admin,
        AdminOrderQuery {
            status: Some(OrderStatus::Cancelled),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert_eq!(cancelled.items.len(), 1);
    assert_eq!(cancelled.items[0].id, ada_order.order.id);

    let future = admin_service::list_all_orders(
        &state,
        &admin,
        AdminOrderQuery {
            start_date: Some(Utc::now() + chrono::Duration::days(1)),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("orders");
    assert!(future.items.is_empty());

    let err = admin_service::list_all_orders(
        &state,
        &admin,
        AdminOrderQuery {
            start_date: Some(Utc::now()),
            end_date: Some(Utc::now() - chrono::Duration::days(1)),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let detail = admin_service::get_order_admin(&state, &admin, ada_order.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(detail.items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn checkout_keeps_the_cart_row() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = shopper(&state, "ada@example.com").await?;
    let product = create_product(&state, "Kettle", 2_500, 10).await?;
    add(&state, &user, product.id, 1).await?;
    checkout(&state, &user).await?;

    let carts = Carts::find().all(&state.orm).await?;
    assert_eq!(carts.len(), 1);
    assert_eq!(carts[0].user_id, user.user_id);
    Ok(())
}

#[tokio::test]
async fn reservation_is_all_or_nothing() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let product = create_product(&state, "Kettle", 2_500, 2).await?;

    let err = catalog_service::reserve_stock(&state.orm, product.id, 3)
        .await
        .unwrap_err();
    match err {
        AppError::InsufficientStock {
            product_id,
            available,
        } => {
            assert_eq!(product_id, product.id);
            assert_eq!(available, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(stock_of(&state, product.id).await?, 2);

    catalog_service::reserve_stock(&state.orm, product.id, 2).await?;
    assert_eq!(stock_of(&state, product.id).await?, 0);

    let err = catalog_service::reserve_stock(&state.orm, product.id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { available: 0, .. }));
    assert_eq!(stock_of(&state, product.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn inactive_products_cannot_be_reserved() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let product = create_product(&state, "Retired kettle", 2_500, 5).await?;
    update_product(&state, &product, |p| p.active = Set(false)).await?;

    let err = catalog_service::reserve_stock(&state.orm, product.id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unavailable(ref name) if name == "Retired kettle"));
    assert_eq!(stock_of(&state, product.id).await?, 5);

    let err = catalog_service::reserve_stock(&state.orm, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn restock_adds_back_and_rejects_unknown_products() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let product = create_product(&state, "Kettle", 2_500, 0).await?;

    catalog_service::restock(&state.orm, product.id, 4).await?;
    assert_eq!(stock_of(&state, product.id).await?, 4);

    let err = catalog_service::restock(&state.orm, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}
