//! Login alert shown right after a successful login.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{LoginAuditEntry, LoginType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginAlertType {
    FirstLogin,
    Normal,
    SessionTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAlert {
    pub alert_type: LoginAlertType,
    pub last_logout_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl LoginAlert {
    /// Derive the alert from one account's login history (any order).
    ///
    /// Exactly one LOGIN on record means this is the first session. Otherwise
    /// the latest LOGOUT tells how long the account was away; without one the
    /// previous session ended without a logout.
    pub fn from_history(history: &[LoginAuditEntry], now: DateTime<Utc>) -> Self {
        let logins = history
            .iter()
            .filter(|e| e.login_type == LoginType::Login)
            .count();
        if logins == 1 {
            return Self {
                alert_type: LoginAlertType::FirstLogin,
                last_logout_at: None,
                message: "Welcome! This is your first login to the system.".to_string(),
            };
        }

        let last_logout = history
            .iter()
            .filter(|e| e.login_type == LoginType::Logout)
            .max_by_key(|e| (e.event_time, e.sequence));

        match last_logout {
            Some(logout) => Self {
                alert_type: LoginAlertType::Normal,
                last_logout_at: Some(logout.event_time),
                message: format!(
                    "Welcome back! You last logged out {}.",
                    format_elapsed(now - logout.event_time)
                ),
            },
            None => Self {
                alert_type: LoginAlertType::SessionTimeout,
                last_logout_at: None,
                message: "Welcome back! Your last session ended without a proper logout.".to_string(),
            },
        }
    }
}

fn unit(n: i64, singular: &str, plural: &str) -> String {
    format!("{n} {}", if n == 1 { singular } else { plural })
}

/// "2 days 3 hours ago", "1 minute ago", "0 minutes ago".
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_minutes = elapsed.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(unit(days, "day", "days"));
    }
    if hours > 0 {
        parts.push(unit(hours, "hour", "hours"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(unit(minutes, "minute", "minutes"));
    }
    parts.push("ago".to_string());
    parts.join(" ")
}
