use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Broker credential state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub valid: bool,
}

impl Session {
    pub fn new(access_token: String, created_at: DateTime<Utc>, validity: chrono::Duration) -> Self {
        Self {
            access_token,
            created_at,
            expires_at: created_at + validity,
            valid: true,
        }
    }

    /// Valid and not past its expiry at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.valid && now < self.expires_at
    }
}

/// Closing prices for one trading session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EodSnapshot {
    /// Trading session (market timezone) the closes belong to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_date: Option<NaiveDate>,
    pub prices: HashMap<String, f64>,
}

impl EodSnapshot {
    /// Whether the closes cover `session` or a later one.
    pub fn is_fresh_for(&self, session: NaiveDate) -> bool {
        self.session_date.is_some_and(|held| held >= session)
    }

    pub fn close(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_session_expiry() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let session = Session::new("tok".to_string(), created, Duration::hours(24));

        assert!(session.is_usable(created + Duration::hours(23)));
        assert!(!session.is_usable(created + Duration::hours(24)));
    }

    #[test]
    fn test_invalidated_session_is_not_usable() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut session = Session::new("tok".to_string(), created, Duration::hours(24));
        session.valid = false;

        assert!(!session.is_usable(created));
    }

    #[test]
    fn test_eod_snapshot_freshness() {
        let friday = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut snapshot = EodSnapshot::default();
        assert!(!snapshot.is_fresh_for(friday));

        snapshot.session_date = Some(friday);
        snapshot.prices.insert("TCS".to_string(), 4_000.0);
        assert!(snapshot.is_fresh_for(friday));
        assert!(!snapshot.is_fresh_for(monday));

        snapshot.session_date = Some(monday);
        assert!(snapshot.is_fresh_for(friday));
        assert_eq!(snapshot.close("TCS"), Some(4_000.0));
        assert_eq!(snapshot.close("INFY"), None);
    }
}
