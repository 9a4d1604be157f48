//! Contest service.
//!
//! Owns every contest and the ledger behind each participant's portfolio.
//! Ledgers live in a `DashMap` keyed by portfolio id and every mutation runs
//! inside a single `get_mut` guard with no `.await`, so ticks and user orders
//! for the same portfolio never interleave. When both maps are needed the
//! contest entry is taken before the ledger entry.

use super::clock::Clock;
use super::leaderboard;
use super::ledger::{LedgerError, PortfolioLedger};
use super::scheduler::{derive_phase, phase_flags, PhaseTransition};
use super::store::{SnapshotStore, StoreError};
use crate::types::{
    Contest, NewContest, Participant, ParticipantIdentity, Phase, PhaseFlags, Portfolio, Quote,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Contest service errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContestError {
    #[error("Contest not found: {0}")]
    ContestNotFound(String),

    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Registration is closed for contest {0}")]
    RegistrationClosed(String),

    #[error("User {user_id} already joined contest {contest_id}")]
    AlreadyJoined { contest_id: String, user_id: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Contests, participants and their portfolio ledgers.
pub struct ContestService {
    contests: DashMap<String, Contest>,
    ledgers: DashMap<String, PortfolioLedger>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<SnapshotStore>>,
    default_virtual_cash: f64,
}

impl ContestService {
    pub fn new(clock: Arc<dyn Clock>, default_virtual_cash: f64) -> Self {
        Self {
            contests: DashMap::new(),
            ledgers: DashMap::new(),
            clock,
            store: None,
            default_virtual_cash,
        }
    }

    /// Write contests and portfolios through to `store`.
    pub fn with_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load every stored contest and portfolio. Returns (contests, portfolios).
    pub fn restore(&self) -> Result<(usize, usize), StoreError> {
        let Some(store) = &self.store else {
            return Ok((0, 0));
        };

        let contests = store.load_contests()?;
        let portfolios = store.load_portfolios()?;
        let counts = (contests.len(), portfolios.len());

        for contest in contests {
            self.contests.insert(contest.id.clone(), contest);
        }
        for portfolio in portfolios {
            self.ledgers
                .insert(
                    portfolio.id.clone(),
                    PortfolioLedger::from_record(portfolio).with_clock(self.clock.clone()),
                );
        }

        info!("Restored {} contests and {} portfolios", counts.0, counts.1);
        Ok(counts)
    }

    // ========== Contests ==========

    pub fn create_contest(&self, request: NewContest) -> Result<Contest, ContestError> {
        if request.title.trim().is_empty() {
            return Err(ContestError::InvalidSchedule("title is empty".to_string()));
        }
        let mut contest = Contest::new(request, self.default_virtual_cash);
        if !contest.has_ordered_schedule() {
            return Err(ContestError::InvalidSchedule(
                "expected registration deadline <= market start <= market end <= end".to_string(),
            ));
        }
        if !(contest.virtual_cash.is_finite() && contest.virtual_cash > 0.0) {
            return Err(ContestError::InvalidSchedule(format!(
                "virtual cash must be positive, got {}",
                contest.virtual_cash
            )));
        }

        contest.phase = derive_phase(self.clock.now(), &contest);
        self.persist_contest(&contest);
        self.contests.insert(contest.id.clone(), contest.clone());

        info!("Created contest {} ({}) in {}", contest.id, contest.title, contest.phase);
        Ok(contest)
    }

    pub fn get_contest(&self, contest_id: &str) -> Result<Contest, ContestError> {
        self.contests
            .get(contest_id)
            .map(|c| c.clone())
            .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))
    }

    /// All contests, soonest market start first.
    pub fn list_contests(&self) -> Vec<Contest> {
        let mut contests: Vec<Contest> = self.contests.iter().map(|c| c.clone()).collect();
        contests.sort_by(|a, b| {
            a.market_start_time
                .cmp(&b.market_start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        contests
    }

    /// Phase in effect now: the stored phase, or later if the clock has moved on.
    pub fn current_phase(&self, contest_id: &str) -> Result<Phase, ContestError> {
        let contest = self
            .contests
            .get(contest_id)
            .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))?;
        Ok(contest.phase.max(derive_phase(self.clock.now(), &contest)))
    }

    pub fn phase_flags(&self, contest_id: &str) -> Result<PhaseFlags, ContestError> {
        let now = self.clock.now();
        let contest = self
            .contests
            .get(contest_id)
            .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))?;
        let phase = contest.phase.max(derive_phase(now, &contest));
        Ok(phase_flags(phase, now, &contest))
    }

    /// Enter a user into a contest, creating their portfolio.
    pub fn join_contest(
        &self,
        contest_id: &str,
        identity: ParticipantIdentity,
    ) -> Result<Participant, ContestError> {
        let now = self.clock.now();
        let mut contest = self
            .contests
            .get_mut(contest_id)
            .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))?;

        if contest.phase.max(derive_phase(now, &contest)) != Phase::Registration {
            return Err(ContestError::RegistrationClosed(contest_id.to_string()));
        }
        if contest.participant(&identity.user_id).is_some() {
            return Err(ContestError::AlreadyJoined {
                contest_id: contest_id.to_string(),
                user_id: identity.user_id,
            });
        }

        let ledger = PortfolioLedger::new(Portfolio::new(
            contest.id.clone(),
            identity.user_id.clone(),
            contest.virtual_cash,
            now.timestamp_millis(),
        ))
        .with_clock(self.clock.clone());
        let mut participant =
            Participant::new(identity, ledger.portfolio().id.clone(), now.timestamp_millis());
        participant.snapshot = ledger.snapshot();

        contest.participants.push(participant.clone());
        self.persist_portfolio(ledger.portfolio());
        self.ledgers.insert(participant.portfolio_id.clone(), ledger);
        self.persist_contest(&contest);

        info!(
            "User {} joined contest {} with portfolio {}",
            participant.user_id, contest_id, participant.portfolio_id
        );
        Ok(participant)
    }

    // ========== Portfolios ==========

    pub fn portfolio(&self, portfolio_id: &str) -> Result<Portfolio, ContestError> {
        self.ledgers
            .get(portfolio_id)
            .map(|l| l.record())
            .ok_or_else(|| ContestError::PortfolioNotFound(portfolio_id.to_string()))
    }

    pub fn buy(
        &self,
        portfolio_id: &str,
        symbol: &str,
        quantity: f64,
        price: f64,
    ) -> Result<Portfolio, ContestError> {
        let symbol = symbol.trim().to_uppercase();
        self.mutate(portfolio_id, |ledger| ledger.buy(&symbol, quantity, price))
    }

    pub fn set_top_picks(
        &self,
        portfolio_id: &str,
        first: Option<&str>,
        second: Option<&str>,
        third: Option<&str>,
    ) -> Result<Portfolio, ContestError> {
        let normalize = |s: Option<&str>| {
            s.map(|v| v.trim().to_uppercase())
                .filter(|v| !v.is_empty())
        };
        let (first, second, third) = (normalize(first), normalize(second), normalize(third));
        self.mutate(portfolio_id, |ledger| {
            ledger.set_top_picks(first.as_deref(), second.as_deref(), third.as_deref())
        })
    }

    /// Restore a portfolio to its starting cash and unlock it.
    pub fn reset_portfolio(&self, portfolio_id: &str) -> Result<Portfolio, ContestError> {
        let record = {
            let mut ledger = self
                .ledgers
                .get_mut(portfolio_id)
                .ok_or_else(|| ContestError::PortfolioNotFound(portfolio_id.to_string()))?;
            ledger.reset();
            ledger.record()
        };
        self.persist_portfolio(&record);
        info!("Portfolio {} reset", portfolio_id);
        Ok(record)
    }

    /// Revalue every portfolio holding the quoted symbol. Returns how many changed.
    pub fn apply_quote(&self, quote: &Quote) -> usize {
        let mut changed = Vec::new();
        for mut entry in self.ledgers.iter_mut() {
            if entry.apply_price_update(
                &quote.symbol,
                quote.last_price,
                quote.day_change,
                quote.day_change_pct,
            ) {
                changed.push(entry.record());
            }
        }
        for record in &changed {
            self.persist_portfolio(record);
        }
        if !changed.is_empty() {
            debug!(
                "{} @ {:.2} ({}) revalued {} portfolios",
                quote.symbol,
                quote.last_price,
                quote.source,
                changed.len()
            );
        }
        changed.len()
    }

    /// Every symbol held by any portfolio, sorted.
    pub fn held_symbols(&self) -> Vec<String> {
        self.ledgers
            .iter()
            .flat_map(|l| l.portfolio().holdings.keys().cloned().collect::<Vec<_>>())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    // ========== Standings ==========

    /// Re-snapshot every participant and re-rank the contest.
    pub fn refresh_standings(&self, contest_id: &str) -> Result<Vec<Participant>, ContestError> {
        let mut contest = self
            .contests
            .get_mut(contest_id)
            .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))?;

        let mut participants = std::mem::take(&mut contest.participants);
        for participant in participants.iter_mut() {
            if let Some(ledger) = self.ledgers.get(&participant.portfolio_id) {
                participant.snapshot = ledger.snapshot();
            }
        }
        contest.participants = leaderboard::rank(participants);
        self.persist_contest(&contest);
        Ok(contest.participants.clone())
    }

    pub fn refresh_all_standings(&self) {
        for contest_id in self.contest_ids() {
            if let Err(e) = self.refresh_standings(&contest_id) {
                warn!("Standings refresh for {} failed: {}", contest_id, e);
            }
        }
    }

    /// Current ranked standings.
    pub fn leaderboard(&self, contest_id: &str) -> Result<Vec<Participant>, ContestError> {
        self.refresh_standings(contest_id)
    }

    // ========== Phases ==========

    /// Move every contest to the phase in effect at `now`, locking portfolios
    /// of contests that leave registration.
    pub fn advance_phases(&self, now: DateTime<Utc>) -> Vec<PhaseTransition> {
        let mut transitions = Vec::new();

        for contest_id in self.contest_ids() {
            let Some(mut contest) = self.contests.get_mut(&contest_id) else {
                continue;
            };
            let next = contest.phase.max(derive_phase(now, &contest));
            if next == contest.phase {
                continue;
            }

            let from = contest.phase;
            contest.phase = next;

            if from < Phase::PortfolioSelection && next >= Phase::PortfolioSelection {
                for participant in &contest.participants {
                    if let Some(mut ledger) = self.ledgers.get_mut(&participant.portfolio_id) {
                        if !ledger.is_locked() {
                            ledger.lock();
                            self.persist_portfolio(ledger.portfolio());
                        }
                    }
                }
                info!(
                    "Locked {} portfolios in contest {}",
                    contest.participants.len(),
                    contest_id
                );
            }

            self.persist_contest(&contest);
            transitions.push(PhaseTransition {
                contest_id: contest_id.clone(),
                from,
                to: next,
            });
        }

        transitions
    }

    // ========== Internals ==========

    fn contest_ids(&self) -> Vec<String> {
        self.contests.iter().map(|c| c.key().clone()).collect()
    }

    fn contest_of(&self, portfolio_id: &str) -> Result<String, ContestError> {
        self.ledgers
            .get(portfolio_id)
            .map(|l| l.portfolio().contest_id.clone())
            .ok_or_else(|| ContestError::PortfolioNotFound(portfolio_id.to_string()))
    }

    /// Run a user mutation, refusing it once the contest has left registration.
    fn mutate<F>(&self, portfolio_id: &str, op: F) -> Result<Portfolio, ContestError>
    where
        F: FnOnce(&mut PortfolioLedger) -> Result<(), LedgerError>,
    {
        let contest_id = self.contest_of(portfolio_id)?;
        let open = match self.current_phase(&contest_id) {
            Ok(phase) => phase == Phase::Registration,
            Err(_) => {
                warn!("Portfolio {} belongs to unknown contest {}", portfolio_id, contest_id);
                true
            }
        };

        let mut ledger = self
            .ledgers
            .get_mut(portfolio_id)
            .ok_or_else(|| ContestError::PortfolioNotFound(portfolio_id.to_string()))?;

        if !open {
            // Scheduler may not have ticked yet.
            if !ledger.is_locked() {
                ledger.lock();
                self.persist_portfolio(ledger.portfolio());
            }
            return Err(LedgerError::Locked.into());
        }

        op(ledger.value_mut())?;
        let record = ledger.record();
        drop(ledger);

        self.persist_portfolio(&record);
        Ok(record)
    }

    fn persist_contest(&self, contest: &Contest) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_contest(contest) {
                warn!("Failed to persist contest {}: {}", contest.id, e);
            }
        }
    }

    fn persist_portfolio(&self, portfolio: &Portfolio) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_portfolio(portfolio) {
                warn!("Failed to persist portfolio {}: {}", portfolio.id, e);
            }
        }
    }
}
