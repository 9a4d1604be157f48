//! Contest Phase Scheduler
//!
//! Phase is a pure function of the clock and the contest schedule, so a late
//! or skipped tick is corrected by the next one. The periodic task only
//! persists the derived phase and locks portfolios when a contest first
//! leaves registration.

use super::clock::Clock;
use super::contest::ContestService;
use crate::types::{Contest, Phase, PhaseFlags};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Phase of `contest` at `now`.
pub fn derive_phase(now: DateTime<Utc>, contest: &Contest) -> Phase {
    if now < contest.registration_deadline {
        Phase::Registration
    } else if now < contest.market_start_time {
        Phase::PortfolioSelection
    } else if now < contest.market_end_time {
        Phase::Live
    } else {
        Phase::Completed
    }
}

/// Gating booleans for a phase.
pub fn phase_flags(phase: Phase, now: DateTime<Utc>, contest: &Contest) -> PhaseFlags {
    PhaseFlags {
        registration_open: phase == Phase::Registration,
        selection_open: phase == Phase::Registration,
        market_live: phase == Phase::Live,
        locked: phase >= Phase::PortfolioSelection,
        results_final: phase == Phase::Completed && now >= contest.end_time,
    }
}

/// A contest moving to a later phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    pub contest_id: String,
    pub from: Phase,
    pub to: Phase,
}

/// Periodically re-derives every contest's phase.
pub struct PhaseScheduler {
    contests: Arc<ContestService>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl PhaseScheduler {
    pub fn new(contests: Arc<ContestService>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            contests,
            clock,
            interval,
        }
    }

    /// Run one evaluation at the clock's current instant.
    pub fn tick(&self) -> Vec<PhaseTransition> {
        let transitions = self.contests.advance_phases(self.clock.now());
        for t in &transitions {
            info!("Contest {} moved {} -> {}", t.contest_id, t.from, t.to);
        }
        transitions
    }

    /// Spawn the periodic evaluation loop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                let transitions = self.tick();
                debug!("Phase check done, {} transitions", transitions.len());
            }
        })
    }
}
