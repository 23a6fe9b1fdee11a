use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::decisions::TraderBody;
use super::AppState;
use crate::domain::{NotificationId, TraderId, TraderNotification};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pub trader_id: i64,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<TraderNotification>,
    pub unread: usize,
}

pub async fn get_notifications(
    Query(params): Query<NotificationsQuery>,
    State(state): State<AppState>,
) -> Result<Json<NotificationsResponse>, AppError> {
    let notifications = state
        .ledger
        .notifications(TraderId(params.trader_id), params.unread_only)
        .await;
    let unread = notifications.iter().filter(|n| !n.read).count();
    Ok(Json(NotificationsResponse {
        notifications,
        unread,
    }))
}

pub async fn mark_read(
    Path(id): Path<u64>,
    State(state): State<AppState>,
    Json(body): Json<TraderBody>,
) -> Result<Json<TraderNotification>, AppError> {
    Ok(Json(
        state
            .ledger
            .mark_read(NotificationId(id), body.trader_id)
            .await?,
    ))
}
