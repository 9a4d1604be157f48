//! Market Data Gateway
//!
//! Single entry point for instruments, quotes and indices:
//! - Primary source chosen once at construction (broker when credentialed, else simulated)
//! - Closed market answers from the EOD close cache with zero change
//! - Any upstream failure degrades to simulated or cached values, never to an error
//! - Recurring tick delivery through a cancellable [`TickSubscription`]

use super::clock::{Clock, MarketHours};
use super::session::{SessionError, SessionManager, TokenIssuer};
use super::store::SnapshotStore;
use super::subscription::TickSubscription;
use crate::config::Config;
use crate::sources::universe::{self, INDICES};
use crate::sources::{BrokerAuth, LiveSource, MarketSource, SimulatedSource};
use crate::types::{DataSource, DataStatus, EodSnapshot, Index, Instrument, Quote, Session};
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Close lookups in flight at once during an EOD refresh.
const EOD_FETCH_CONCURRENCY: usize = 4;

/// Unifies the live and simulated sources behind one interface.
pub struct MarketDataGateway {
    primary: Arc<dyn MarketSource>,
    simulated: Arc<SimulatedSource>,
    session: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    hours: MarketHours,
    store: Option<Arc<SnapshotStore>>,
    eod: RwLock<EodSnapshot>,
    eod_refresh: Mutex<()>,
    instruments: RwLock<Vec<Instrument>>,
    status: std::sync::RwLock<(DataSource, Option<i64>)>,
    tick_interval: Duration,
    closed_poll_interval: Duration,
}

impl MarketDataGateway {
    /// Build the gateway from configuration, picking the live source when
    /// broker credentials are present.
    pub fn new(config: &Config, clock: Arc<dyn Clock>, store: Option<Arc<SnapshotStore>>) -> Self {
        let issuer = BrokerAuth::from_config(&config.broker)
            .map(|auth| Arc::new(auth) as Arc<dyn TokenIssuer>);
        let session = Arc::new(SessionManager::new(
            issuer,
            store.clone(),
            clock.clone(),
            chrono::Duration::hours(config.session_validity_hours),
        ));

        let simulated = Arc::new(SimulatedSource::new().with_clock(clock.clone()));
        let primary: Arc<dyn MarketSource> = if config.has_broker_credentials() {
            info!("Broker credentials found, using live market data");
            Arc::new(LiveSource::new(&config.broker, session.clone(), clock.clone()))
        } else {
            info!("No broker credentials, using simulated market data");
            simulated.clone()
        };

        let gateway = Self::with_source(primary, simulated, clock, config.market_hours.clone())
            .with_session(session)
            .with_intervals(
                Duration::from_secs(config.tick_interval_secs()),
                Duration::from_secs(config.poll_tick_secs),
            );

        match store {
            Some(store) => gateway.with_store(store),
            None => gateway,
        }
    }

    /// Gateway over an explicit primary source. Starts without a session
    /// issuer, a store, or cached closes.
    pub fn with_source(
        primary: Arc<dyn MarketSource>,
        simulated: Arc<SimulatedSource>,
        clock: Arc<dyn Clock>,
        hours: MarketHours,
    ) -> Self {
        let session = Arc::new(SessionManager::new(
            None,
            None,
            clock.clone(),
            chrono::Duration::hours(24),
        ));
        Self {
            primary,
            simulated,
            session,
            clock,
            hours,
            store: None,
            eod: RwLock::new(EodSnapshot::default()),
            eod_refresh: Mutex::new(()),
            instruments: RwLock::new(Vec::new()),
            status: std::sync::RwLock::new((DataSource::Simulated, None)),
            tick_interval: Duration::from_secs(5),
            closed_poll_interval: Duration::from_secs(60),
        }
    }

    pub fn with_session(mut self, session: Arc<SessionManager>) -> Self {
        self.session = session;
        self
    }

    /// Attach a store and restore the cached closes from it.
    pub fn with_store(mut self, store: Arc<SnapshotStore>) -> Self {
        match store.load_eod() {
            Ok(Some(snapshot)) => {
                for (symbol, close) in &snapshot.prices {
                    self.simulated.set_reference(symbol, *close);
                }
                info!(
                    "Restored EOD cache for session {:?} ({} prices)",
                    snapshot.session_date,
                    snapshot.prices.len()
                );
                *self.eod.get_mut() = snapshot;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to restore EOD cache: {}", e),
        }
        self.store = Some(store);
        self
    }

    pub fn with_intervals(mut self, tick: Duration, closed_poll: Duration) -> Self {
        self.tick_interval = tick;
        self.closed_poll_interval = closed_poll;
        self
    }

    /// Ensure a broker session exists. The only error this gateway surfaces.
    pub async fn ensure_session(&self) -> Result<Session, SessionError> {
        self.session.ensure_session().await
    }

    /// Whether a real upstream is in use.
    pub fn is_live_source_configured(&self) -> bool {
        self.primary.tag() == DataSource::Live
    }

    pub fn is_market_open(&self) -> bool {
        self.hours.is_open(self.clock.now())
    }

    pub fn market_hours(&self) -> &MarketHours {
        &self.hours
    }

    /// Provenance of the most recent quote batch.
    pub fn data_status(&self) -> DataStatus {
        let (source, last_update_time) = match self.status.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        DataStatus {
            source,
            last_update_time,
            market_open: self.is_market_open(),
            live_configured: self.is_live_source_configured(),
        }
    }

    /// Tradable universe. Falls back to the built-in list on upstream failure.
    pub async fn list_instruments(&self, exchange: Option<&str>) -> Vec<Instrument> {
        match self.primary.instruments(exchange).await {
            Ok(list) if !list.is_empty() => {
                if exchange.is_none() {
                    *self.instruments.write().await = list.clone();
                }
                list
            }
            Ok(_) => {
                warn!("{} returned no instruments, using built-in list", self.primary.name());
                universe::builtin_instruments(exchange)
            }
            Err(e) => {
                warn!("Instrument fetch from {} failed: {}", self.primary.name(), e);
                universe::builtin_instruments(exchange)
            }
        }
    }

    /// One quote per requested symbol, never failing the batch.
    pub async fn get_quotes(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if symbols.is_empty() {
            return HashMap::new();
        }

        let now = self.clock.now().timestamp_millis();

        if !self.is_market_open() {
            let eod = self.eod.read().await;
            let quotes = symbols
                .iter()
                .map(|symbol| {
                    let close = eod
                        .close(symbol)
                        .unwrap_or_else(|| self.simulated.reference_price(symbol));
                    (symbol.clone(), Quote::end_of_day(symbol, close, now))
                })
                .collect();
            self.set_status(DataSource::Eod, now);
            return quotes;
        }

        let mut quotes = match self.primary.quotes(&symbols).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("Quote fetch from {} failed: {}", self.primary.name(), e);
                HashMap::new()
            }
        };

        let answered = quotes.len();
        for symbol in &symbols {
            if !quotes.contains_key(symbol) {
                debug!("Synthesizing quote for {}", symbol);
                quotes.insert(symbol.clone(), self.simulated.quote(symbol));
            }
        }

        let source = if answered == symbols.len() {
            self.primary.tag()
        } else {
            DataSource::Simulated
        };
        self.set_status(source, now);
        quotes
    }

    /// The three benchmark indices, with the same open/closed policy as quotes.
    pub async fn get_indices(&self) -> Vec<Index> {
        if !self.is_market_open() {
            let eod = self.eod.read().await;
            return INDICES
                .iter()
                .map(|(name, _)| Index {
                    name: name.to_string(),
                    value: eod
                        .close(&universe::index_key(name))
                        .unwrap_or_else(|| self.simulated.index_reference(name)),
                    change: 0.0,
                    change_pct: 0.0,
                    source: DataSource::Eod,
                })
                .collect();
        }

        match self.primary.indices().await {
            Ok(indices) if !indices.is_empty() => indices,
            Ok(_) => self.simulated.index_values(),
            Err(e) => {
                warn!("Index fetch from {} failed: {}", self.primary.name(), e);
                self.simulated.index_values()
            }
        }
    }

    /// Snapshot of the close cache.
    pub async fn eod_snapshot(&self) -> EodSnapshot {
        self.eod.read().await.clone()
    }

    /// Refresh the close cache unless it already holds the latest
    /// completed session.
    ///
    /// Returns whether a refresh ran. Concurrent callers wait on the same
    /// refresh instead of fetching twice.
    pub async fn refresh_eod_prices_if_stale(&self) -> bool {
        let session_date = self.hours.last_session_date(self.clock.now());
        if self.eod.read().await.is_fresh_for(session_date) {
            return false;
        }

        let _guard = self.eod_refresh.lock().await;
        if self.eod.read().await.is_fresh_for(session_date) {
            return false;
        }

        let instruments = self.eod_universe().await;
        info!(
            "Refreshing EOD closes for {} instruments (session {})",
            instruments.len(),
            session_date
        );

        let results: Vec<_> = stream::iter(instruments.iter().cloned())
            .map(move |instrument| async move {
                let close = self.primary.daily_close(&instrument, session_date).await;
                (instrument, close)
            })
            .buffered(EOD_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut prices = HashMap::with_capacity(instruments.len());
        let mut fetched = 0usize;
        for (instrument, result) in results {
            let close = match result {
                Ok(close) if close.is_finite() && close > 0.0 => {
                    fetched += 1;
                    close
                }
                Ok(close) => {
                    warn!("Ignoring close {} for {}", close, instrument.symbol);
                    self.simulated.reference_price(&instrument.symbol)
                }
                Err(e) => {
                    warn!("Close fetch for {} failed: {}", instrument.symbol, e);
                    self.simulated.reference_price(&instrument.symbol)
                }
            };
            prices.insert(instrument.symbol.clone(), close);
        }

        if fetched == 0 && !instruments.is_empty() {
            warn!("No closes fetched from {}, will retry on next check", self.primary.name());
            return false;
        }

        for (symbol, close) in &prices {
            self.simulated.set_reference(symbol, *close);
        }
        let snapshot = EodSnapshot {
            session_date: Some(session_date),
            prices,
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.save_eod(&snapshot) {
                warn!("Failed to persist EOD cache: {}", e);
            }
        }
        *self.eod.write().await = snapshot;

        info!("EOD cache refreshed for session {} ({} fetched)", session_date, fetched);
        true
    }

    /// Deliver quotes for a fixed symbol list until the handle is closed.
    pub fn subscribe_ticks<F>(self: &Arc<Self>, symbols: Vec<String>, on_tick: F) -> TickSubscription
    where
        F: Fn(Quote) + Send + Sync + 'static,
    {
        self.subscribe_ticks_with(move || symbols.clone(), on_tick)
    }

    /// Deliver quotes for whatever `symbols` yields at each tick.
    ///
    /// While open, a batch goes out every tick interval. While closed, the
    /// EOD batch goes out once per symbol set and close session, and the
    /// market state is re-checked every closed poll interval.
    pub fn subscribe_ticks_with<S, F>(self: &Arc<Self>, symbols: S, on_tick: F) -> TickSubscription
    where
        S: Fn() -> Vec<String> + Send + Sync + 'static,
        F: Fn(Quote) + Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let gateway = Arc::clone(self);

        let handle = tokio::spawn(async move {
            // Symbols and close session of the last closed-market batch.
            let mut closed_batch: Option<(Vec<String>, Option<NaiveDate>)> = None;

            loop {
                let wanted = symbols();
                let wait = if gateway.is_market_open() {
                    closed_batch = None;
                    if !gateway.deliver(&wanted, &on_tick, &shutdown_rx).await {
                        break;
                    }
                    gateway.tick_interval
                } else {
                    let batch = (wanted, gateway.eod.read().await.session_date);
                    if closed_batch.as_ref() != Some(&batch) {
                        if !gateway.deliver(&batch.0, &on_tick, &shutdown_rx).await {
                            break;
                        }
                        closed_batch = Some(batch);
                    }
                    gateway.closed_poll_interval
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            debug!("Tick delivery stopped");
        });

        TickSubscription::new(shutdown_tx, handle)
    }

    /// Fetch and hand out one batch in symbol order. False once shut down.
    async fn deliver<F>(&self, symbols: &[String], on_tick: &F, shutdown: &watch::Receiver<bool>) -> bool
    where
        F: Fn(Quote) + Send + Sync,
    {
        if symbols.is_empty() {
            return !*shutdown.borrow();
        }
        let quotes = self.get_quotes(symbols).await;
        let mut batch: Vec<Quote> = quotes.into_values().collect();
        batch.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        for quote in batch {
            if *shutdown.borrow() {
                return false;
            }
            on_tick(quote);
        }
        !*shutdown.borrow()
    }

    /// Built-in universe, preferring upstream tokens once instruments were listed.
    async fn eod_universe(&self) -> Vec<Instrument> {
        let listed = self.instruments.read().await;
        universe::builtin_instruments(None)
            .into_iter()
            .map(|builtin| {
                listed
                    .iter()
                    .find(|i| i.symbol == builtin.symbol)
                    .cloned()
                    .unwrap_or(builtin)
            })
            .collect()
    }

    fn set_status(&self, source: DataSource, at: i64) {
        match self.status.write() {
            Ok(mut guard) => *guard = (source, Some(at)),
            Err(poisoned) => *poisoned.into_inner() = (source, Some(at)),
        }
    }
}
