use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{db::notification::Notification, mongodb::Id};

/// Notification details, for the caller's inbox.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDescription {
    pub id: Id,
    pub title: String,
    pub message: String,
    pub read: bool,
    #[serde(default)]
    pub election_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationDescription {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            title: notification.notification.title,
            message: notification.notification.message,
            read: notification.notification.read,
            election_id: notification.notification.election_id,
            created_at: notification.notification.created_at,
        }
    }
}
