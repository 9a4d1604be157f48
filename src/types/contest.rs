use super::{AssetType, ValuationSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Contest lifecycle phase. Ordering follows the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Registration,
    PortfolioSelection,
    Live,
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Registration => write!(f, "registration"),
            Phase::PortfolioSelection => write!(f, "portfolio_selection"),
            Phase::Live => write!(f, "live"),
            Phase::Completed => write!(f, "completed"),
        }
    }
}

/// Booleans the UI and ledger gate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseFlags {
    pub registration_open: bool,
    pub selection_open: bool,
    pub market_live: bool,
    pub locked: bool,
    /// Settlement window has passed (`now >= end_time`).
    pub results_final: bool,
}

/// Identity supplied by the caller when a user enters a contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantIdentity {
    pub user_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A user entered in a contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub portfolio_id: String,
    /// Unix timestamp in milliseconds.
    pub joined_at: i64,
    #[serde(default)]
    pub snapshot: ValuationSnapshot,
    /// 0 until the first ranking pass.
    #[serde(default)]
    pub rank: u32,
}

impl Participant {
    pub fn new(identity: ParticipantIdentity, portfolio_id: String, joined_at: i64) -> Self {
        Self {
            user_id: identity.user_id,
            display_name: identity.display_name,
            avatar: identity.avatar,
            portfolio_id,
            joined_at,
            snapshot: ValuationSnapshot::default(),
            rank: 0,
        }
    }

    pub fn total_return(&self) -> f64 {
        self.snapshot.total_return()
    }
}

/// Request to create a contest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContest {
    pub title: String,
    #[serde(default)]
    pub entry_fee: f64,
    #[serde(default)]
    pub prize_pool: f64,
    pub registration_deadline: DateTime<Utc>,
    pub market_start_time: DateTime<Utc>,
    pub market_end_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub virtual_cash: Option<f64>,
    #[serde(default)]
    pub asset_type: AssetType,
}

/// A time-boxed fantasy trading contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contest {
    pub id: String,
    pub title: String,
    pub entry_fee: f64,
    pub prize_pool: f64,
    pub registration_deadline: DateTime<Utc>,
    pub market_start_time: DateTime<Utc>,
    pub market_end_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub virtual_cash: f64,
    pub asset_type: AssetType,
    /// Last phase the scheduler observed.
    pub phase: Phase,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl Contest {
    /// Build a contest from a request. Schedule ordering is checked by the caller.
    pub fn new(request: NewContest, default_virtual_cash: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: request.title,
            entry_fee: request.entry_fee,
            prize_pool: request.prize_pool,
            registration_deadline: request.registration_deadline,
            market_start_time: request.market_start_time,
            market_end_time: request.market_end_time,
            end_time: request.end_time,
            virtual_cash: request.virtual_cash.unwrap_or(default_virtual_cash),
            asset_type: request.asset_type,
            phase: Phase::Registration,
            participants: Vec::new(),
        }
    }

    /// `registration_deadline <= market_start_time <= market_end_time <= end_time`.
    pub fn has_ordered_schedule(&self) -> bool {
        self.registration_deadline <= self.market_start_time
            && self.market_start_time <= self.market_end_time
            && self.market_end_time <= self.end_time
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}
