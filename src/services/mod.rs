pub mod clock;
pub mod contest;
pub mod leaderboard;
pub mod ledger;
pub mod market_data;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod subscription;

pub use clock::{Clock, ManualClock, MarketHours, SystemClock};
pub use contest::{ContestError, ContestService};
pub use leaderboard::rank;
pub use ledger::{LedgerError, PortfolioLedger};
pub use market_data::MarketDataGateway;
pub use scheduler::{derive_phase, phase_flags, PhaseScheduler, PhaseTransition};
pub use session::{SessionError, SessionManager, TokenIssuer};
pub use store::{SnapshotStore, StoreError};
pub use subscription::TickSubscription;
