//! Waiting for a broadcast transaction to be mined and buried under enough
//! blocks.

use {
    crate::AlloyProvider,
    alloy::{primitives::B256, providers::Provider},
    anyhow::Result,
    std::time::Duration,
    tokio::time::Instant,
};

/// The parts of a transaction receipt the callers care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    /// Whether the transaction executed without reverting.
    pub success: bool,
    pub gas_used: u64,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait ReceiptPolling: Send + Sync {
    /// Returns the receipt of a mined transaction or `None` if the node does
    /// not know about a mined transaction with that hash yet.
    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>>;

    /// Returns the number of the latest block.
    async fn block_number(&self) -> Result<u64>;
}

#[async_trait::async_trait]
impl ReceiptPolling for AlloyProvider {
    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let Some(receipt) = self.get_transaction_receipt(hash).await? else {
            return Ok(None);
        };
        // Receipts of pending transactions don't carry a block yet.
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };
        Ok(Some(Receipt {
            transaction_hash: receipt.transaction_hash,
            block_number,
            success: receipt.status(),
            gas_used: receipt.gas_used,
        }))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.get_block_number().await?)
    }
}

/// How long and how deep to wait for a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Number of blocks that need to be mined on top of the block including
    /// the transaction.
    pub depth: u64,
    /// Delay between two receipt or block height polls.
    pub poll_interval: Duration,
    /// Upper bound for the depth wait. Reaching it is not an error, the
    /// transaction is considered final enough at that point.
    pub depth_timeout: Duration,
}

impl ConfirmationPolicy {
    pub const DEFAULT_DEPTH: u64 = 2;
    pub const DEFAULT_DEPTH_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

    /// The policy used for the given network: the local development chain
    /// needs no extra confirmations, every other network needs
    /// [`Self::DEFAULT_DEPTH`].
    pub fn for_chain(chain_id: u64) -> Self {
        let depth = if chain_id == contracts::alloy::networks::LOCALHOST {
            0
        } else {
            Self::DEFAULT_DEPTH
        };
        Self {
            depth,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            depth_timeout: Self::DEFAULT_DEPTH_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_depth_timeout(mut self, depth_timeout: Duration) -> Self {
        self.depth_timeout = depth_timeout;
        self
    }
}

/// Outcome of the confirmation depth wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    /// The required number of confirmations was observed.
    Reached(u64),
    /// The depth timeout elapsed first; carries the last observed number of
    /// confirmations.
    TimedOut(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Confirmed {
    pub receipt: Receipt,
    pub depth: Depth,
    /// Time spent between starting to wait and returning.
    pub elapsed: Duration,
}

/// Polls until the transaction is mined and then until the policy's
/// confirmation depth is reached or its depth timeout elapsed.
///
/// The receipt wait itself is unbounded; callers that need to give up earlier
/// have to race the returned future against their own cancellation. Node
/// errors while polling are logged and retried.
pub async fn wait_for_confirmations(
    chain: &dyn ReceiptPolling,
    hash: B256,
    policy: &ConfirmationPolicy,
) -> Confirmed {
    let start = Instant::now();
    let receipt = loop {
        match chain.receipt(hash).await {
            Ok(Some(receipt)) => break receipt,
            Ok(None) => (),
            Err(err) => tracing::debug!(?err, ?hash, "failed to fetch receipt"),
        }
        tokio::time::sleep(policy.poll_interval).await;
    };
    tracing::debug!(?hash, block = receipt.block_number, "transaction mined");

    let depth = wait_for_depth(chain, &receipt, policy).await;
    if let Depth::TimedOut(confirmations) = depth {
        tracing::warn!(
            ?hash,
            confirmations,
            required = policy.depth,
            "confirmation depth not reached in time, continuing"
        );
    }

    Confirmed {
        receipt,
        depth,
        elapsed: start.elapsed(),
    }
}

async fn wait_for_depth(
    chain: &dyn ReceiptPolling,
    receipt: &Receipt,
    policy: &ConfirmationPolicy,
) -> Depth {
    if policy.depth == 0 {
        return Depth::Reached(0);
    }

    let start = Instant::now();
    let mut confirmations = 0;
    loop {
        match chain.block_number().await {
            Ok(head) => {
                confirmations = head.saturating_sub(receipt.block_number);
                if confirmations >= policy.depth {
                    return Depth::Reached(confirmations);
                }
            }
            Err(err) => tracing::debug!(?err, "failed to fetch block number"),
        }
        if start.elapsed() > policy.depth_timeout {
            return Depth::TimedOut(confirmations);
        }
        tokio::time::sleep(policy.poll_interval).await;
    }
}
