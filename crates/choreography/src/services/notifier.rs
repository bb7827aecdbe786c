//! Notification provider capability: trait and simulated implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use common::CorrelationId;
use domain::UserId;

use crate::error::ChoreographyError;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Email,
    Webhook,
}

/// A message for a user about an asynchronous outcome.
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: UserId,
    pub channel: NotificationChannel,
    pub subject: String,
    pub body: String,
    pub correlation_id: CorrelationId,
}

/// Provider acknowledgment of an accepted notification.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
}

/// External notification-sending capability.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<SendReceipt, ChoreographyError>;
}

#[derive(Debug, Default)]
struct SimulatedOutbox {
    sent: Vec<Notification>,
    next_id: u32,
    fail_with: Option<String>,
}

/// Simulated notification provider that records what it sent.
#[derive(Debug, Clone, Default)]
pub struct SimulatedNotificationProvider {
    outbox: Arc<RwLock<SimulatedOutbox>>,
}

impl SimulatedNotificationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every send with the given error until cleared.
    pub fn set_fail(&self, error: Option<&str>) {
        self.outbox.write().unwrap().fail_with = error.map(str::to_string);
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.outbox.read().unwrap().sent.clone()
    }
}

#[async_trait]
impl NotificationProvider for SimulatedNotificationProvider {
    async fn send(&self, notification: Notification) -> Result<SendReceipt, ChoreographyError> {
        let mut outbox = self.outbox.write().unwrap();

        if let Some(error) = &outbox.fail_with {
            return Err(ChoreographyError::Notification(error.clone()));
        }

        outbox.next_id += 1;
        let message_id = format!("msg-{:04}", outbox.next_id);
        outbox.sent.push(notification);
        Ok(SendReceipt { message_id })
    }
}
