//! Keeps an in-memory list of auctions in sync with the contract.
//!
//! A full refresh re-reads every auction. An incremental refresh only
//! re-reads the auctions that were active at the last refresh plus the ones
//! created since then, because ended auctions can no longer change in ways
//! the list shows. To bound staleness, the incremental mode falls back to a
//! full refresh periodically.

use {
    crate::{
        auction::{AuctionRecord, RecordPolicy},
        chain::{self, ChainRead},
        shutdown::Shutdown,
    },
    chrono::Utc,
    futures::{StreamExt, TryStreamExt, stream},
    std::{
        collections::{BTreeMap, BTreeSet, HashMap},
        sync::Arc,
        time::Duration,
    },
    tokio::{
        sync::{Mutex, watch},
        time::Instant,
    },
};

/// Lower bound of the poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_FULL_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound of concurrent `getAuction` calls.
const MAX_CONCURRENT_READS: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Every refresh re-reads all auctions.
    Full,
    /// Refreshes re-read active and new auctions only.
    #[default]
    Incremental,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    /// In incremental mode a full refresh happens once this much time passed
    /// since the last one.
    pub full_sync_interval: Duration,
    pub policy: RecordPolicy,
    /// Whether to count `BidPlaced` events for every refreshed auction.
    pub count_bids: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            full_sync_interval: DEFAULT_FULL_SYNC_INTERVAL,
            policy: RecordPolicy::default(),
            count_bids: false,
        }
    }
}

/// Read-only view of the synchronized state.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Sorted ascending by id.
    pub auctions: Vec<AuctionRecord>,
    pub is_loading: bool,
    /// Message of the last failed refresh, cleared when a refresh starts.
    pub error: Option<String>,
    pub last_full_sync: Option<Instant>,
}

/// What a successful refresh did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refresh {
    Full { count: u64 },
    Incremental { fetched: usize },
    /// Nothing was active and no auction was created.
    Unchanged,
}

impl Refresh {
    fn kind(&self) -> &'static str {
        match self {
            Self::Full { .. } => "full",
            Self::Incremental { .. } | Self::Unchanged => "incremental",
        }
    }
}

/// Bookkeeping for deciding what the next refresh has to read.
#[derive(Debug, Default)]
struct Watermark {
    active_ids: BTreeSet<u64>,
    last_count: u64,
    last_full_sync: Option<Instant>,
}

pub struct Synchronizer {
    chain: Arc<dyn ChainRead>,
    config: Config,
    /// Held for the whole duration of a refresh so that at most one is in
    /// flight.
    watermark: Mutex<Watermark>,
    state: watch::Sender<Snapshot>,
    metrics: &'static Metrics,
}

impl Synchronizer {
    pub fn new(chain: Arc<dyn ChainRead>, config: Config) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            chain,
            config,
            watermark: Default::default(),
            state,
            metrics: Metrics::instance(observe::metrics::get_storage_registry())
                .expect("unexpected error getting metrics instance"),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    /// Notifies about every change of the snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    /// Re-reads every auction and replaces the list.
    pub async fn refresh_all(&self) -> Result<Refresh, chain::Error> {
        let mut watermark = self.watermark.lock().await;
        self.start();
        let result = self.full(&mut watermark).await;
        self.finish(&result);
        result
    }

    /// Re-reads the auctions that were active and the ones created since the
    /// last refresh and merges them into the list.
    pub async fn refresh_active_only(&self) -> Result<Refresh, chain::Error> {
        let mut watermark = self.watermark.lock().await;
        self.start();
        let result = self.incremental(&mut watermark).await;
        self.finish(&result);
        result
    }

    /// Refreshes according to the configured mode.
    pub async fn refresh(&self) -> Result<Refresh, chain::Error> {
        let mut watermark = self.watermark.lock().await;
        self.start();
        let result = match (self.config.mode, watermark.last_full_sync) {
            (Mode::Incremental, Some(last)) if !self.is_full_sync_due(last) => {
                self.incremental(&mut watermark).await
            }
            _ => self.full(&mut watermark).await,
        };
        self.finish(&result);
        result
    }

    /// Refreshes immediately and then every `interval` until shutdown.
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub async fn run(&self, interval: Duration, mut shutdown: Shutdown) {
        let interval = interval.max(MIN_POLL_INTERVAL);
        loop {
            if let Err(err) = self.refresh().await {
                tracing::warn!(?err, "failed to refresh auctions");
            }
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(interval) => (),
            }
        }
        tracing::debug!("stopped synchronizing auctions");
    }

    fn is_full_sync_due(&self, last: Instant) -> bool {
        last.elapsed() > self.config.full_sync_interval
    }

    async fn full(&self, watermark: &mut Watermark) -> Result<Refresh, chain::Error> {
        let count = self.chain.auction_count().await?;
        let ids = (1..=count).collect::<Vec<_>>();
        let auctions = self.fetch(&ids).await?;

        watermark.active_ids = active_ids(&auctions);
        watermark.last_count = count;
        watermark.last_full_sync = Some(Instant::now());
        let last_full_sync = watermark.last_full_sync;
        self.publish(auctions, |snapshot| snapshot.last_full_sync = last_full_sync);
        Ok(Refresh::Full { count })
    }

    async fn incremental(&self, watermark: &mut Watermark) -> Result<Refresh, chain::Error> {
        let count = self.chain.auction_count().await?;
        let ids = watermark
            .active_ids
            .iter()
            .copied()
            .chain(watermark.last_count.saturating_add(1)..=count)
            .collect::<BTreeSet<_>>();
        if ids.is_empty() {
            watermark.last_count = count;
            return Ok(Refresh::Unchanged);
        }

        let ids = ids.into_iter().collect::<Vec<_>>();
        let updates = self.fetch(&ids).await?;
        let auctions = merge(&self.state.borrow().auctions, updates);

        watermark.active_ids = active_ids(&auctions);
        watermark.last_count = count;
        self.publish(auctions, |_| ());
        Ok(Refresh::Incremental {
            fetched: ids.len(),
        })
    }

    async fn fetch(&self, ids: &[u64]) -> Result<Vec<AuctionRecord>, chain::Error> {
        // Collected first. A closure borrowing `self` inside the stream makes
        // the refresh futures `!Send`.
        let reads = ids
            .iter()
            .map(|id| self.chain.auction(*id))
            .collect::<Vec<_>>();
        let raw = stream::iter(reads)
            .buffered(MAX_CONCURRENT_READS)
            .try_collect::<Vec<_>>()
            .await?;
        let bids = self.bid_counts().await;
        self.metrics.auctions_fetched.inc_by(ids.len() as u64);

        let now = Utc::now();
        Ok(ids
            .iter()
            .zip(raw)
            .map(|(id, raw)| {
                let mut record = AuctionRecord::new(*id, raw, &self.config.policy, now);
                record.bids = bids
                    .as_ref()
                    .map(|bids| bids.get(id).copied().unwrap_or_default());
                record
            })
            .collect())
    }

    /// Bid counts are an optional extra. Failing to read them leaves the
    /// counts unknown instead of failing the refresh.
    async fn bid_counts(&self) -> Option<HashMap<u64, u64>> {
        if !self.config.count_bids {
            return None;
        }
        match self.chain.bid_counts().await {
            Ok(counts) => Some(counts),
            Err(err) => {
                tracing::warn!(?err, "failed to count bids");
                self.metrics.bid_count_failures.inc();
                None
            }
        }
    }

    fn start(&self) {
        self.state.send_modify(|snapshot| {
            snapshot.is_loading = true;
            snapshot.error = None;
        });
    }

    fn publish(&self, auctions: Vec<AuctionRecord>, update: impl FnOnce(&mut Snapshot)) {
        let active = auctions.iter().filter(|auction| auction.is_active()).count();
        self.metrics.auctions.set(gauge(auctions.len()));
        self.metrics.active_auctions.set(gauge(active));
        self.state.send_modify(|snapshot| {
            snapshot.auctions = auctions;
            update(snapshot);
        });
    }

    fn finish(&self, result: &Result<Refresh, chain::Error>) {
        match result {
            Ok(refresh) => {
                tracing::debug!(?refresh, "refreshed auctions");
                self.metrics
                    .refreshes
                    .with_label_values(&[refresh.kind(), "success"])
                    .inc();
            }
            Err(err) => {
                self.metrics
                    .refreshes
                    .with_label_values(&["any", "failure"])
                    .inc();
                self.state.send_modify(|snapshot| {
                    snapshot.error = Some(format!("failed to load auctions: {err}"));
                });
            }
        }
        self.state.send_modify(|snapshot| snapshot.is_loading = false);
    }
}

/// Overwrites existing records with updates of the same id, appends new
/// ones and keeps the result sorted by id.
pub fn merge(current: &[AuctionRecord], updates: Vec<AuctionRecord>) -> Vec<AuctionRecord> {
    let mut merged = current
        .iter()
        .map(|auction| (auction.id, auction.clone()))
        .collect::<BTreeMap<_, _>>();
    merged.extend(updates.into_iter().map(|auction| (auction.id, auction)));
    merged.into_values().collect()
}

fn active_ids(auctions: &[AuctionRecord]) -> BTreeSet<u64> {
    auctions
        .iter()
        .filter(|auction| auction.is_active())
        .map(|auction| auction.id)
        .collect()
}

fn gauge(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "auction_sync")]
struct Metrics {
    /// Auction list refreshes.
    #[metric(labels("kind", "result"))]
    refreshes: prometheus::IntCounterVec,

    /// Auctions read from the contract.
    auctions_fetched: prometheus::IntCounter,

    /// Refreshes that could not count bids.
    bid_count_failures: prometheus::IntCounter,

    /// Auctions in the synchronized list.
    auctions: prometheus::IntGauge,

    /// Active auctions in the synchronized list.
    active_auctions: prometheus::IntGauge,
}
