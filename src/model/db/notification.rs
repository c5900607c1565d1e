use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A stored notification record.
///
/// Delivery (email etc.) belongs to an external service; this collection is
/// just the record of what should be shown to whom.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCore {
    pub user_id: Id,
    pub title: String,
    pub message: String,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_id: Option<Id>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl NotificationCore {
    pub fn new(
        user_id: Id,
        title: impl Into<String>,
        message: impl Into<String>,
        election_id: impl Into<Option<Id>>,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            message: message.into(),
            read: false,
            election_id: election_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// A notification without an ID.
pub type NewNotification = NotificationCore;

/// A notification from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub notification: NotificationCore,
}

impl Deref for Notification {
    type Target = NotificationCore;

    fn deref(&self) -> &Self::Target {
        &self.notification
    }
}

impl DerefMut for Notification {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.notification
    }
}
