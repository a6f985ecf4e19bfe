//! Push notifications shown on behalf of the worker.

use chrono::Utc;
use serde::Serialize;

const DEFAULT_TITLE: &str = "CRM System";
const DEFAULT_BODY: &str = "New CRM update available";
const ICON: &str = "/icons/icon-192x192.png";
const BADGE: &str = "/icons/icon-72x72.png";

/// Action id that opens the app.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses.
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Milliseconds since the epoch when the push arrived
  pub date_of_arrival: i64,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Build the notification for a push payload. Empty payloads get the
  /// default body.
  pub fn from_push(payload: Option<&str>) -> Self {
    let body = payload
      .map(str::trim)
      .filter(|text| !text.is_empty())
      .unwrap_or(DEFAULT_BODY);

    Self {
      title: DEFAULT_TITLE.to_string(),
      body: body.to_string(),
      icon: ICON.to_string(),
      badge: BADGE.to_string(),
      vibrate: vec![100, 50, 100],
      date_of_arrival: Utc::now().timestamp_millis(),
      actions: vec![
        NotificationAction {
          action: ACTION_EXPLORE.to_string(),
          title: "View details".to_string(),
          icon: "/icons/checkmark.png".to_string(),
        },
        NotificationAction {
          action: ACTION_CLOSE.to_string(),
          title: "Close".to_string(),
          icon: "/icons/xmark.png".to_string(),
        },
      ],
    }
  }
}

/// Whether a click with the given action should open the app.
///
/// Clicking the body (no action) behaves like "explore"; unknown actions are
/// ignored.
pub fn click_opens_app(action: Option<&str>) -> bool {
  match action {
    None | Some("") => true,
    Some(ACTION_EXPLORE) => true,
    _ => false,
  }
}
