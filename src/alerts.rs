//! User-facing alerts derived from a key's revocation and expiry state.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Expiring;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Danger,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Danger => "danger",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted as `{"severity": "...", "text": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub text: String,
}

impl Alert {
    pub fn danger(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Danger,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Alerts for a primary key: at most one.
///
/// A revoked key gets only the revocation alert, whatever its expiry.
pub fn make_alerts<K: Expiring>(key: &K, revoked: bool, today: NaiveDate) -> Vec<Alert> {
    let alert = if revoked {
        Some(Alert::danger(
            "Primary key has been revoked and should no longer be used",
        ))
    } else {
        expiry_alert(key, today)
    };
    alert.into_iter().collect()
}

fn expiry_alert<K: Expiring>(key: &K, today: NaiveDate) -> Option<Alert> {
    let (Some(expiry), Some(days)) = (key.expiry_date(), key.days_till_expiry(today)) else {
        return Some(Alert::warning("Primary key doesn't have an expiry date set"));
    };
    let date = friendly_date(expiry);

    match days {
        31.. => None,
        3..=30 => Some(Alert::warning(format!("Primary key expires in {days} days"))),
        2 => Some(Alert::danger(format!(
            "Primary key expires on {date} ({days} days)"
        ))),
        1 => Some(Alert::danger(format!("Primary key expires tomorrow, {date}"))),
        0 => Some(Alert::danger(format!("Primary key expired today, {date}"))),
        _ => Some(Alert::danger(format!(
            "Primary key expired {} days ago",
            -days
        ))),
    }
}

/// e.g. `May 15, 2018`
fn friendly_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}
