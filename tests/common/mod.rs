#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectOptions, EntityTrait};
use shop_api::{
    config::RateLimitConfig,
    db::{connect_with, run_migrations},
    entity::{
        Products, timestamp_now,
        products::{ActiveModel as ProductActive, Model as ProductModel},
        users::ActiveModel as UserActive,
    },
    middleware::auth::{ADMIN_ROLE, AuthUser, USER_ROLE},
    notification::{NotificationSink, Notifier, OrderPlacedNotice, UserRegisteredNotice},
    services::{auth_service::hash_password, catalog_service},
    state::AppState,
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret";
pub const PASSWORD: &str = "correct-horse";

pub async fn setup_state() -> anyhow::Result<AppState> {
    setup_state_with(Notifier::default(), RateLimitConfig::default()).await
}

pub async fn setup_state_with(
    notifier: Notifier,
    rate_limit: RateLimitConfig,
) -> anyhow::Result<AppState> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // One connection keeps the in-memory database alive and shared.
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let orm = connect_with(options).await?;
    run_migrations(&orm).await?;
    Ok(AppState::new(orm, &rate_limit, notifier, JWT_SECRET))
}

pub async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<AuthUser> {
    let password_hash = hash_password(PASSWORD).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        name: Set(email.split('@').next().unwrap_or("shopper").to_string()),
        password_hash: Set(password_hash),
        role: Set(role.to_string()),
        created_at: Set(timestamp_now()),
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        role: user.role,
    })
}

pub async fn shopper(state: &AppState, email: &str) -> anyhow::Result<AuthUser> {
    create_user(state, USER_ROLE, email).await
}

pub async fn operator(state: &AppState) -> anyhow::Result<AuthUser> {
    create_user(state, ADMIN_ROLE, "ops@example.com").await
}

pub async fn create_product(
    state: &AppState,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<ProductModel> {
    let product = catalog_service::save_product(
        &state.orm,
        ProductActive {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            stock: Set(stock),
            active: Set(true),
            created_at: Set(timestamp_now()),
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(product)
}

pub async fn update_product(
    state: &AppState,
    product: &ProductModel,
    change: impl FnOnce(&mut ProductActive),
) -> anyhow::Result<ProductModel> {
    let mut active: ProductActive = product.clone().into();
    change(&mut active);
    catalog_service::save_product(&state.orm, active)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

pub async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {product_id} missing"))?;
    Ok(product.stock)
}

/// Forwards every order notification to a channel.
pub struct RecordingNotifier {
    sender: mpsc::UnboundedSender<OrderPlacedNotice>,
}

impl RecordingNotifier {
    pub fn channel() -> (Notifier, mpsc::UnboundedReceiver<OrderPlacedNotice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Notifier::new(Arc::new(Self { sender })), receiver)
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify_order_placed(&self, notice: &OrderPlacedNotice) -> anyhow::Result<()> {
        self.sender.send(notice.clone())?;
        Ok(())
    }

    async fn notify_user_registered(&self, _notice: &UserRegisteredNotice) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A sink whose delivery always fails.
pub struct FailingNotifier;

#[async_trait]
impl NotificationSink for FailingNotifier {
    async fn notify_order_placed(&self, _notice: &OrderPlacedNotice) -> anyhow::Result<()> {
        anyhow::bail!("smtp unavailable")
    }

    async fn notify_user_registered(&self, _notice: &UserRegisteredNotice) -> anyhow::Result<()> {
        anyhow::bail!("smtp unavailable")
    }
}
