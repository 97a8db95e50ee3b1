// service/notification_service.rs
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    db::{db::DBClient, store::StoreError},
    models::lifecyclemodel::NotificationEvent,
    service::error::ServiceError,
};

/// Outbound seam for lifecycle notifications. Called after the state change
/// has committed; a failure here never undoes it.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), ServiceError>;
}

/// Sends every event and logs the ones that fail.
pub async fn dispatch_all(dispatcher: &dyn NotificationDispatcher, events: &[NotificationEvent]) {
    for event in events {
        if let Err(e) = dispatcher.notify(event).await {
            tracing::warn!(
                "Failed to deliver {} notification to {}: {}",
                event.kind.to_str(),
                event.recipient_id,
                e
            );
        }
    }
}

/// Writes notifications to the `notifications` table for the in-app feed.
#[derive(Debug, Clone)]
pub struct NotificationService {
    db_client: Arc<DBClient>,
}

impl NotificationService {
    pub fn new(db_client: Arc<DBClient>) -> Self {
        Self { db_client }
    }
}

#[async_trait]
impl NotificationDispatcher for NotificationService {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), ServiceError> {
        tracing::info!(
            "Notification {} for user {} on {}",
            event.kind.to_str(),
            event.recipient_id,
            event.content_id
        );

        sqlx::query(
            r#"
            INSERT INTO notifications
            (user_id, type, content_id, title, message, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(event.recipient_id)
        .bind(event.kind.to_str())
        .bind(event.content_id)
        .bind(&event.title)
        .bind(&event.message)
        .execute(&self.db_client.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(())
    }
}

/// Used when no database is configured.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), ServiceError> {
        tracing::info!(
            "Notification {} for user {}: {}",
            event.kind.to_str(),
            event.recipient_id,
            event.title
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Keeps every event it is handed.
    #[derive(Debug, Default)]
    pub struct RecordingDispatcher {
        pub events: Mutex<Vec<NotificationEvent>>,
    }

    impl RecordingDispatcher {
        pub async fn taken(&self) -> Vec<NotificationEvent> {
            std::mem::take(&mut *self.events.lock().await)
        }
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn notify(&self, event: &NotificationEvent) -> Result<(), ServiceError> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct FailingDispatcher;

    #[async_trait]
    impl NotificationDispatcher for FailingDispatcher {
        async fn notify(&self, _event: &NotificationEvent) -> Result<(), ServiceError> {
            Err(ServiceError::Notification("push gateway unavailable".to_string()))
        }
    }
}
