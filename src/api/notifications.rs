use mongodb::{bson::doc, options::FindOptions};
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::{
    error::{Error, Result},
    model::{
        api::{auth::AuthToken, notification::NotificationDescription},
        db::notification::Notification,
        mongodb::{Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![my_notifications, mark_read]
}

/// The caller's notifications, newest first.
#[get("/notifications")]
async fn my_notifications(
    token: AuthToken,
    notifications: Coll<Notification>,
) -> Result<Json<Vec<NotificationDescription>>> {
    let filter = doc! { "user_id": *token.user_id };
    let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let inbox = notifications
        .find(filter, options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;

    Ok(Json(inbox))
}

/// Mark one of the caller's notifications as read.
#[post("/notifications/<notification_id>/read")]
async fn mark_read(
    token: AuthToken,
    notification_id: Id,
    notifications: Coll<Notification>,
) -> Result<()> {
    // Scoped to the caller; other users' notifications don't exist for them.
    let filter = doc! {
        "_id": *notification_id,
        "user_id": *token.user_id,
    };
    let update = doc! { "$set": { "read": true } };
    let result = notifications.update_one(filter, update, None).await?;
    if result.matched_count != 1 {
        return Err(Error::not_found(format!(
            "Notification {}",
            notification_id
        )));
    }
    Ok(())
}
