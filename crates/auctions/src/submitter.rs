//! Validates, simulates, broadcasts and confirms state changing auction
//! calls.

use {
    crate::{
        auction::{AuctionRecord, RecordPolicy, Status},
        chain::{self, ChainRead, ChainWrite, ContractCall},
        shutdown::Shutdown,
    },
    alloy::primitives::{B256, U256},
    bigdecimal::BigDecimal,
    chrono::Utc,
    ethrpc::confirmations::{
        ConfirmationPolicy,
        Confirmed,
        Depth,
        Receipt,
        ReceiptPolling,
        wait_for_confirmations,
    },
    number::units::{NATIVE_DECIMALS, from_base_units, to_base_units},
    std::{sync::Arc, time::Duration},
};

/// Lowest accepted starting price in base units (0.001 of the native
/// currency).
pub const MIN_STARTING_PRICE: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);
pub const MIN_DURATION: Duration = Duration::from_secs(60);

/// A call as the user expresses it, with display amounts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    PlaceBid {
        auction_id: u64,
        amount: BigDecimal,
    },
    CreateAuction {
        item_name: String,
        starting_price: BigDecimal,
        duration: Duration,
    },
    EndAuction {
        auction_id: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid amount: {0:#}")]
    Amount(anyhow::Error),
    #[error("auction {0} has ended")]
    AuctionEnded(u64),
    #[error("bid of {amount} is below the minimum of {minimum}")]
    BidTooLow {
        amount: BigDecimal,
        minimum: BigDecimal,
    },
    #[error("item name must not be empty")]
    EmptyItemName,
    #[error("starting price must be at least {0}")]
    StartingPriceTooLow(BigDecimal),
    #[error("duration must be at least {}s", .0.as_secs())]
    DurationTooShort(Duration),
    #[error("failed to read auction: {0}")]
    Read(#[source] chain::Error),
    #[error("simulation failed: {0}")]
    Simulation(String),
    #[error("failed to send transaction: {0}")]
    Broadcast(#[source] chain::Error),
    #[error("stopped waiting for transaction {0}")]
    Cancelled(B256),
}

impl Error {
    /// Whether the call was refused before anything was sent to the node.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Amount(_)
                | Self::AuctionEnded(_)
                | Self::BidTooLow { .. }
                | Self::EmptyItemName
                | Self::StartingPriceTooLow(_)
                | Self::DurationTooShort(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submission {
    pub hash: B256,
    pub receipt: Receipt,
    pub depth: Depth,
    /// Time between broadcasting and returning.
    pub elapsed: Duration,
}

pub struct Submitter {
    reader: Arc<dyn ChainRead>,
    writer: Arc<dyn ChainWrite>,
    receipts: Arc<dyn ReceiptPolling>,
    policy: RecordPolicy,
    confirmations: ConfirmationPolicy,
    shutdown: Shutdown,
    metrics: &'static Metrics,
}

impl Submitter {
    pub fn new(
        reader: Arc<dyn ChainRead>,
        writer: Arc<dyn ChainWrite>,
        receipts: Arc<dyn ReceiptPolling>,
        policy: RecordPolicy,
        confirmations: ConfirmationPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            reader,
            writer,
            receipts,
            policy,
            confirmations,
            shutdown,
            metrics: Metrics::instance(observe::metrics::get_storage_registry())
                .expect("unexpected error getting metrics instance"),
        }
    }

    /// Validates the call, simulates it if it is a bid, broadcasts it and
    /// waits for it to be confirmed.
    ///
    /// Not reaching the confirmation depth in time is not an error, the
    /// returned [`Submission::depth`] tells whether it was reached.
    pub async fn submit(&self, call: Call) -> Result<Submission, Error> {
        let result = self.submit_inner(call).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) if err.is_validation() => "invalid",
            Err(Error::Simulation(_)) => "simulation_failed",
            Err(Error::Cancelled(_)) => "cancelled",
            Err(_) => "failure",
        };
        self.metrics.submissions.with_label_values(&[outcome]).inc();
        result
    }

    async fn submit_inner(&self, call: Call) -> Result<Submission, Error> {
        let call = self.prepare(call).await?;
        if call.requires_simulation() {
            self.writer
                .simulate(&call)
                .await
                .map_err(|err| simulation_error(&call, err))?;
        }

        let hash = self.writer.broadcast(&call).await.map_err(Error::Broadcast)?;
        tracing::info!(?hash, call = call.name(), "transaction sent");

        let confirmed = self.confirm(hash).await?;
        if !confirmed.receipt.success {
            tracing::warn!(?hash, call = call.name(), "transaction reverted");
        }
        Ok(Submission {
            hash,
            receipt: confirmed.receipt,
            depth: confirmed.depth,
            elapsed: confirmed.elapsed,
        })
    }

    /// Waits for the transaction to be confirmed or for shutdown, whichever
    /// comes first.
    pub async fn confirm(&self, hash: B256) -> Result<Confirmed, Error> {
        confirm(
            self.receipts.as_ref(),
            hash,
            &self.confirmations,
            self.shutdown.clone(),
        )
        .await
    }

    /// Checks the call against the current chain state and converts amounts
    /// into base units.
    async fn prepare(&self, call: Call) -> Result<ContractCall, Error> {
        match call {
            Call::PlaceBid { auction_id, amount } => {
                let value = to_base_units(&amount, NATIVE_DECIMALS).map_err(Error::Amount)?;
                let raw = self
                    .reader
                    .auction(auction_id)
                    .await
                    .map_err(Error::Read)?;
                let auction = AuctionRecord::new(auction_id, raw, &self.policy, Utc::now());
                if auction.status == Status::Ended {
                    return Err(Error::AuctionEnded(auction_id));
                }
                if value < auction.min_next_bid_wei() {
                    return Err(Error::BidTooLow {
                        amount,
                        minimum: auction.min_next_bid(),
                    });
                }
                Ok(ContractCall::PlaceBid { auction_id, value })
            }
            Call::CreateAuction {
                item_name,
                starting_price,
                duration,
            } => {
                let item_name = item_name.trim();
                if item_name.is_empty() {
                    return Err(Error::EmptyItemName);
                }
                let starting_price =
                    to_base_units(&starting_price, NATIVE_DECIMALS).map_err(Error::Amount)?;
                if starting_price < MIN_STARTING_PRICE {
                    return Err(Error::StartingPriceTooLow(from_base_units(
                        MIN_STARTING_PRICE,
                        NATIVE_DECIMALS,
                    )));
                }
                if duration < MIN_DURATION {
                    return Err(Error::DurationTooShort(MIN_DURATION));
                }
                Ok(ContractCall::CreateAuction {
                    item_name: item_name.to_string(),
                    starting_price,
                    duration,
                })
            }
            Call::EndAuction { auction_id } => Ok(ContractCall::EndAuction { auction_id }),
        }
    }
}

/// Prefers the revert reason and falls back to naming the call.
fn simulation_error(call: &ContractCall, err: chain::Error) -> Error {
    match err {
        chain::Error::Reverted(reason) if !reason.is_empty() => Error::Simulation(reason),
        chain::Error::Reverted(_) => Error::Simulation(format!("{} reverted", call.name())),
        chain::Error::Node(err) => Error::Simulation(format!("{err:#}")),
    }
}

/// [`wait_for_confirmations`] that gives up once `shutdown` fires.
pub(crate) async fn confirm(
    receipts: &dyn ReceiptPolling,
    hash: B256,
    policy: &ConfirmationPolicy,
    mut shutdown: Shutdown,
) -> Result<Confirmed, Error> {
    tokio::select! {
        biased;
        _ = shutdown.triggered() => {
            tracing::info!(?hash, "stopped waiting for confirmations");
            Err(Error::Cancelled(hash))
        }
        confirmed = wait_for_confirmations(receipts, hash, policy) => Ok(confirmed),
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "auction_submitter")]
struct Metrics {
    /// Submitted auction calls by outcome.
    #[metric(labels("outcome"))]
    submissions: prometheus::IntCounterVec,
}
