use anyhow::anyhow;
use chrono::Utc;
use sea_orm::sea_query::{LockType, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddCartItemRequest, UpdateCartItemRequest},
    entity::{
        CartItems, Carts, Products,
        cart_items::{ActiveModel as CartItemActive, Column as CartItemCol},
        carts::{ActiveModel as CartActive, Column as CartCol, Model as CartModel},
        timestamp_now,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartItem},
    response::{ApiResponse, Meta},
    services::{catalog_service, identity_service},
    state::AppState,
};

pub async fn get_or_create_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    identity_service::require_user(&state.orm, user.user_id).await?;
    let cart = ensure_cart(&state.orm, user.user_id).await?;
    let view = load_cart_view(&state.orm, cart).await?;
    Ok(ApiResponse::success("OK", view, Some(Meta::empty())))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;
    identity_service::require_user(&txn, user.user_id).await?;
    let product = catalog_service::get_product(&txn, payload.product_id).await?;
    if !product.active || product.stock <= 0 {
        return Err(AppError::Unavailable(product.name));
    }

    ensure_cart(&txn, user.user_id).await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Cart"))?;

    let existing = CartItems::find()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart.id))
                .add(CartItemCol::ProductId.eq(product.id)),
        )
        .one(&txn)
        .await?;

    match existing {
        Some(item) => {
            let quantity = item
                .quantity
                .checked_add(payload.quantity)
                .filter(|q| *q <= product.stock)
                .ok_or(AppError::InsufficientStock {
                    product_id: product.id,
                    available: product.stock,
                })?;
            let mut active: CartItemActive = item.into();
            active.quantity = Set(quantity);
            active.update(&txn).await?;
        }
        None => {
            if payload.quantity > product.stock {
                return Err(AppError::InsufficientStock {
                    product_id: product.id,
                    available: product.stock,
                });
            }
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(payload.quantity),
                price_at_add_time: Set(product.price),
                created_at: Set(timestamp_now()),
            }
            .insert(&txn)
            .await?;
        }
    }

    let cart = touch_cart(&txn, cart).await?;
    txn.commit().await?;

    tracing::debug!(
        user_id = %user.user_id,
        product_id = %payload.product_id,
        quantity = payload.quantity,
        "cart item added"
    );

    let view = load_cart_view(&state.orm, cart).await?;
    Ok(ApiResponse::success("Item added", view, Some(Meta::empty())))
}

pub async fn update_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest(
            "quantity must be at least 1".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;
    identity_service::require_user(&txn, user.user_id).await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Cart"))?;

    let item = CartItems::find_by_id(item_id)
        .filter(CartItemCol::CartId.eq(cart.id))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("Cart item"))?;

    // Stock is re-read here rather than trusted from when the line was added.
    let product = catalog_service::get_product(&txn, item.product_id).await?;
    if payload.quantity > product.stock {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
            available: product.stock,
        });
    }

    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    active.update(&txn).await?;

    let cart = touch_cart(&txn, cart).await?;
    txn.commit().await?;

    let view = load_cart_view(&state.orm, cart).await?;
    Ok(ApiResponse::success("Item updated", view, Some(Meta::empty())))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;
    identity_service::require_user(&txn, user.user_id).await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Cart"))?;

    let result = CartItems::delete_many()
        .filter(
            Condition::all()
                .add(CartItemCol::Id.eq(item_id))
                .add(CartItemCol::CartId.eq(cart.id)),
        )
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::not_found("Cart item"));
    }

    let cart = touch_cart(&txn, cart).await?;
    txn.commit().await?;

    let view = load_cart_view(&state.orm, cart).await?;
    Ok(ApiResponse::success(
        "Removed from cart",
        view,
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;
    identity_service::require_user(&txn, user.user_id).await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Cart"))?;

    clear_lines(&txn, cart.id).await?;
    let cart = touch_cart(&txn, cart).await?;
    txn.commit().await?;

    let view = load_cart_view(&state.orm, cart).await?;
    Ok(ApiResponse::success("Cart cleared", view, Some(Meta::empty())))
}

/// Returns the user's cart, creating an empty one on first access.
pub(crate) async fn ensure_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<CartModel> {
    if let Some(cart) = find_cart(conn, user_id).await? {
        return Ok(cart);
    }

    let now = timestamp_now();
    let cart = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: Set(now),
        updated_at: Set(now),
    };
    // A concurrent first access may have created it already.
    Carts::insert(cart)
        .on_conflict(OnConflict::column(CartCol::UserId).do_nothing().to_owned())
        .exec_without_returning(conn)
        .await?;

    find_cart(conn, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Cart"))
}

async fn find_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<Option<CartModel>> {
    Ok(Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?)
}

/// Row-locks the cart so mutations of the same cart are serialized.
pub(crate) async fn lock_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> AppResult<Option<CartModel>> {
    Ok(Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .lock(LockType::Update)
        .one(conn)
        .await?)
}

pub(crate) async fn clear_lines<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> AppResult<()> {
    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(())
}

pub(crate) async fn touch_cart<C: ConnectionTrait>(conn: &C, cart: CartModel) -> AppResult<CartModel> {
    let mut active: CartActive = cart.into();
    active.updated_at = Set(timestamp_now());
    Ok(active.update(conn).await?)
}

async fn load_cart_view<C: ConnectionTrait>(conn: &C, cart: CartModel) -> AppResult<Cart> {
    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .find_also_related(Products)
        .all(conn)
        .await?;

    let items = rows
        .into_iter()
        .map(|(item, product)| {
            Ok(CartItem {
                id: item.id,
                product_id: item.product_id,
                product_name: product.map(|p| p.name).unwrap_or_default(),
                quantity: item.quantity,
                price_at_add_time: item.price_at_add_time,
                line_total: line_total(item.price_at_add_time, item.quantity)?,
            })
        })
        .collect::<AppResult<Vec<CartItem>>>()?;

    Ok(Cart {
        id: cart.id,
        user_id: cart.user_id,
        total_amount: cart_total(&items)?,
        items,
        updated_at: cart.updated_at.with_timezone(&Utc),
    })
}

pub fn line_total(price: i64, quantity: i32) -> AppResult<i64> {
    price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| AppError::Internal(anyhow!("cart line total overflow")))
}

/// Sum of `price_at_add_time * quantity` over every line.
pub fn cart_total(items: &[CartItem]) -> AppResult<i64> {
    items.iter().try_fold(0i64, |total, item| {
        total
            .checked_add(item.line_total)
            .ok_or_else(|| AppError::Internal(anyhow!("cart total overflow")))
    })
}
