use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::{
    dto::products::ProductList,
    entity::{
        Products,
        products::{ActiveModel as ProductActive, Column as ProdCol, Model as ProductModel},
    },
    error::{AppError, AppResult},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

pub async fn get_product<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<ProductModel> {
    Products::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found("Product"))
}

/// Inserts or updates a product record. Stock changes made by orders go
/// through [`reserve_stock`] and [`restock`] instead.
pub async fn save_product<C: ConnectionTrait>(
    conn: &C,
    mut product: ProductActive,
) -> AppResult<ProductModel> {
    let existing_id = match product.id {
        ActiveValue::Set(id) | ActiveValue::Unchanged(id) => Some(id),
        ActiveValue::NotSet => None,
    };

    let exists = match existing_id {
        Some(id) => Products::find_by_id(id).one(conn).await?.is_some(),
        None => {
            product.id = ActiveValue::Set(Uuid::new_v4());
            false
        }
    };

    if exists {
        Ok(product.update(conn).await?)
    } else {
        Ok(product.insert(conn).await?)
    }
}

/// Takes `quantity` units out of stock in one conditional update.
///
/// The row only changes while the product is active and holds at least
/// `quantity` units, so concurrent reservations can never drive stock below
/// zero. A rejected reservation leaves the row untouched.
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<()> {
    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Active.eq(true))
        .filter(ProdCol::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        return Ok(());
    }

    let product = get_product(conn, product_id).await?;
    if !product.active {
        return Err(AppError::Unavailable(product.name));
    }
    Err(AppError::InsufficientStock {
        product_id,
        available: product.stock,
    })
}

/// Puts `quantity` units back into stock in one additive update.
pub async fn restock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<()> {
    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::not_found("Product"));
    }
    Ok(())
}

pub async fn list_products(
    state: &AppState,
    pagination: Pagination,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, per_page) = pagination.normalize();
    let paginator = Products::find()
        .filter(ProdCol::Active.eq(true))
        .order_by_asc(ProdCol::Name)
        .paginate(&state.orm, per_page);

    let total = paginator.num_items().await?;
    let items = paginator
        .fetch_page(page - 1)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(Meta::new(page, per_page, total)),
    ))
}

pub async fn find_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let product = get_product(&state.orm, id).await?;
    Ok(ApiResponse::success(
        "Product",
        Product::from(product),
        Some(Meta::empty()),
    ))
}
