use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{config::RateLimitConfig, limiter::RateLimiters, notification::Notifier};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub limiters: Arc<RateLimiters>,
    pub notifier: Notifier,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        orm: DatabaseConnection,
        rate_limit: &RateLimitConfig,
        notifier: Notifier,
        jwt_secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            orm,
            limiters: Arc::new(RateLimiters::from_config(rate_limit)),
            notifier,
            jwt_secret: jwt_secret.into(),
        }
    }
}
