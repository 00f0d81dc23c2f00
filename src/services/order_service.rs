use anyhow::anyhow;
use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderList, OrderWithItems, PlaceOrderRequest},
    entity::{
        CartItems, Orders, OrderItems, Products,
        cart_items::Column as CartItemCol,
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Model as OrderModel},
        products::Model as ProductModel,
        timestamp_now,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentStatus},
    notification::OrderPlacedNotice,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{cart_service, catalog_service, identity_service},
    state::AppState,
};

struct CheckoutLine {
    product: ProductModel,
    quantity: i32,
    subtotal: i64,
}

/// Turns the caller's cart into an order.
///
/// Validation, stock reservation, order creation and cart clearing share one
/// transaction: either all of it commits or none of it does.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let account = identity_service::require_user(&txn, user.user_id).await?;
    let cart = cart_service::lock_cart(&txn, user.user_id)
        .await?
        .ok_or(AppError::EmptyCart)?;

    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .find_also_related(Products)
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut lines = Vec::with_capacity(rows.len());
    let mut total_amount: i64 = 0;
    for (item, product) in rows {
        let product = product.ok_or_else(|| AppError::not_found("Product"))?;
        if !product.active {
            return Err(AppError::Unavailable(product.name));
        }
        if product.stock < item.quantity {
            return Err(AppError::InsufficientStock {
                product_id: product.id,
                available: product.stock,
            });
        }
        // Priced at checkout time, not at add-to-cart time.
        let subtotal = product
            .price
            .checked_mul(i64::from(item.quantity))
            .ok_or_else(|| anyhow!("subtotal overflow for product {}", product.id))?;
        total_amount = total_amount
            .checked_add(subtotal)
            .ok_or_else(|| anyhow!("order total overflow"))?;
        lines.push(CheckoutLine {
            product,
            quantity: item.quantity,
            subtotal,
        });
    }

    // Fixed product order keeps concurrent checkouts from deadlocking on row locks.
    lines.sort_by_key(|line| line.product.id);
    for line in &lines {
        catalog_service::reserve_stock(&txn, line.product.id, line.quantity).await?;
    }

    let order_id = Uuid::new_v4();
    let now = timestamp_now();
    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Created),
        // Payment is mocked and always succeeds.
        payment_status: Set(PaymentStatus::Paid),
        payment_reference: Set(build_payment_reference(order_id)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product.id),
            product_name: Set(line.product.name),
            quantity: Set(line.quantity),
            price_each: Set(line.product.price),
            subtotal: Set(line.subtotal),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;
        order_items.push(OrderItem::from(item));
    }

    cart_service::clear_lines(&txn, cart.id).await?;
    cart_service::touch_cart(&txn, cart).await?;

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %user.user_id,
        total_amount = order.total_amount,
        payment_method = payload.payment_method.as_deref().unwrap_or("default"),
        "order placed"
    );

    state.notifier.order_placed(OrderPlacedNotice {
        user_id: account.id,
        email: account.email,
        name: account.name,
        order_id: order.id,
        total_amount: order.total_amount,
        payment_reference: order.payment_reference.clone(),
    });

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems {
            order: Order::from(order),
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;
    identity_service::require_user(&txn, user.user_id).await?;

    let order = lock_order(&txn, id).await?;
    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let data = cancel_locked(&txn, order).await?;
    txn.commit().await?;

    tracing::info!(order_id = %id, user_id = %user.user_id, "order cancelled by owner");

    Ok(ApiResponse::success(
        "Order cancelled",
        data,
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))?;

    if order.user_id != user.user_id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    let items = load_items(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, per_page) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or_default() {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let paginator = finder.paginate(&state.orm, per_page);
    let total = paginator.num_items().await?;
    let items = paginator
        .fetch_page(page - 1)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(Meta::new(page, per_page, total)),
    ))
}

/// Loads an order with a row lock held for the rest of the transaction.
pub(crate) async fn lock_order<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<OrderModel> {
    Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))
}

/// Restocks every line of a locked order and marks it cancelled.
pub(crate) async fn cancel_locked<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
) -> AppResult<OrderWithItems> {
    if !order.status.is_cancellable() {
        return Err(AppError::InvalidState(format!(
            "order {} is {:?} and cannot be cancelled",
            order.id, order.status
        )));
    }

    let mut items = load_items(conn, order.id).await?;
    items.sort_by_key(|item| item.product_id);
    for item in &items {
        catalog_service::restock(conn, item.product_id, item.quantity).await?;
    }

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled);
    active.updated_at = Set(timestamp_now());
    let order = active.update(conn).await?;

    Ok(OrderWithItems {
        order: Order::from(order),
        items,
    })
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItem>> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect())
}

/// Payment references embed the order id, so no two orders share one.
fn build_payment_reference(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    format!("PAY-{}-{}", date, order_id.simple()).to_uppercase()
}
