use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        Orders,
        orders::{ActiveModel as OrderActive, Column as OrderCol},
        timestamp_now,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{AdminOrderQuery, SortOrder},
    services::order_service,
    state::AppState,
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: AdminOrderQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, per_page) = query.pagination().normalize();

    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(AppError::BadRequest(
                "start_date must not be after end_date".into(),
            ));
        }
    }

    let mut condition = Condition::all();
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }
    if let Some(start) = query.start_date {
        condition = condition.add(OrderCol::CreatedAt.gte(start.fixed_offset()));
    }
    if let Some(end) = query.end_date {
        condition = condition.add(OrderCol::CreatedAt.lte(end.fixed_offset()));
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
        "Orders",
        OrderList { items },
        Some(Meta::new(page, per_page, total)),
    ))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))?;

    let items = order_service::load_items(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "Order found",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Sets any status on an order. Transitions between live states are not
/// checked; moving to `CANCELLED` restocks through the cancellation path and
/// a cancelled order stays cancelled.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    if payload.status == OrderStatus::Cancelled {
        let resp = cancel_order_admin(state, user, id).await?;
        let data = resp
            .data
            .map(|d| d.order)
            .ok_or_else(|| AppError::not_found("Order"))?;
        return Ok(ApiResponse::success("Order updated", data, Some(Meta::empty())));
    }

    let txn = state.orm.begin().await?;
    let existing = order_service::lock_order(&txn, id).await?;
    if existing.status == OrderStatus::Cancelled {
        return Err(AppError::InvalidState(format!(
            "order {id} is cancelled"
        )));
    }

    let previous = existing.status;
    let mut active: OrderActive = existing.into();
    active.status = Set(payload.status);
    active.updated_at = Set(timestamp_now());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        operator_id = %user.user_id,
        from = ?previous,
        to = ?order.status,
        "order status updated"
    );

    Ok(ApiResponse::success(
        "Order updated",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;

    let txn = state.orm.begin().await?;
    let order = order_service::lock_order(&txn, id).await?;
    let data = order_service::cancel_locked(&txn, order).await?;
    txn.commit().await?;

    tracing::info!(order_id = %id, operator_id = %user.user_id, "order cancelled by operator");

    Ok(ApiResponse::success(
        "Order cancelled",
        data,
        Some(Meta::empty()),
    ))
}
