//! Best-effort user notifications.
//!
//! Delivery runs on a detached task; the caller never waits for it and a
//! failed delivery is only logged.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrderPlacedNotice {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub order_id: Uuid,
    pub total_amount: i64,
    pub payment_reference: String,
}

#[derive(Debug, Clone)]
pub struct UserRegisteredNotice {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_order_placed(&self, notice: &OrderPlacedNotice) -> anyhow::Result<()>;

    async fn notify_user_registered(&self, notice: &UserRegisteredNotice) -> anyhow::Result<()>;
}

/// Writes notifications to the log instead of a mail transport.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify_order_placed(&self, notice: &OrderPlacedNotice) -> anyhow::Result<()> {
        tracing::info!(
            user_id = %notice.user_id,
            email = %notice.email,
            order_id = %notice.order_id,
            total_amount = notice.total_amount,
            payment_reference = %notice.payment_reference,
            "order confirmation sent"
        );
        Ok(())
    }

    async fn notify_user_registered(&self, notice: &UserRegisteredNotice) -> anyhow::Result<()> {
        tracing::info!(
            user_id = %notice.user_id,
            email = %notice.email,
            "welcome message sent"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn order_placed(&self, notice: OrderPlacedNotice) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(err) = sink.notify_order_placed(&notice).await {
                tracing::warn!(
                    error = %err,
                    order_id = %notice.order_id,
                    "order confirmation failed"
                );
            }
        });
    }

    pub fn user_registered(&self, notice: UserRegisteredNotice) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(err) = sink.notify_user_registered(&notice).await {
                tracing::warn!(
                    error = %err,
                    user_id = %notice.user_id,
                    "welcome message failed"
                );
            }
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
