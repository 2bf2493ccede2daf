//! Seams between the auction logic and the auction contract.

use {
    crate::{
        auction::{RawAuction, Settlement},
        session::Session,
    },
    alloy::{
        contract::Error as ContractError,
        network::TransactionBuilder,
        primitives::{Address, B256, U256},
        providers::Provider,
        rpc::types::TransactionRequest,
        sol_types::SolCall,
    },
    contracts::alloy::Auction,
    ethrpc::{AlloyProvider, alloy::errors::ContractErrorExt},
    std::{collections::HashMap, time::Duration},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The contract rejected the call.
    #[error("{0}")]
    Reverted(String),
    /// The node could not be reached or answered with something other than a
    /// revert.
    #[error("node error: {0:#}")]
    Node(anyhow::Error),
}

impl From<ContractError> for Error {
    fn from(err: ContractError) -> Self {
        if err.is_contract_error() {
            let reason = err.revert_reason().unwrap_or_else(|| err.to_string());
            Self::Reverted(reason)
        } else {
            Self::Node(err.into())
        }
    }
}

/// Read-only access to the auction contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChainRead: Send + Sync {
    /// Number of auctions ever created. Ids run from 1 to this value.
    async fn auction_count(&self) -> Result<u64, Error>;

    async fn auction(&self, id: u64) -> Result<RawAuction, Error>;

    /// Number of `BidPlaced` events per auction id. Auctions without bids
    /// are missing from the map.
    async fn bid_counts(&self) -> Result<HashMap<u64, u64>, Error>;

    /// Settled auctions the contract recorded for `account`.
    async fn user_records(&self, account: Address) -> Result<Vec<Settlement>, Error>;
}

/// A state changing call on the auction contract with all amounts already
/// in base units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    PlaceBid {
        auction_id: u64,
        value: U256,
    },
    CreateAuction {
        item_name: String,
        starting_price: U256,
        duration: Duration,
    },
    EndAuction {
        auction_id: u64,
    },
}

impl ContractCall {
    /// Native currency attached to the transaction.
    pub fn value(&self) -> U256 {
        match self {
            Self::PlaceBid { value, .. } => *value,
            Self::CreateAuction { .. } | Self::EndAuction { .. } => U256::ZERO,
        }
    }

    /// Bids are dry-run before broadcasting, whatever value they carry.
    pub fn requires_simulation(&self) -> bool {
        matches!(self, Self::PlaceBid { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaceBid { .. } => "placeBid",
            Self::CreateAuction { .. } => "createAuction",
            Self::EndAuction { .. } => "endAuction",
        }
    }

    fn calldata(&self) -> Vec<u8> {
        match self {
            Self::PlaceBid { auction_id, .. } => Auction::Auction::placeBidCall {
                auctionId: U256::from(*auction_id),
            }
            .abi_encode(),
            Self::CreateAuction {
                item_name,
                starting_price,
                duration,
            } => Auction::Auction::createAuctionCall {
                itemName: item_name.clone(),
                startingPrice: *starting_price,
                duration: U256::from(duration.as_secs()),
            }
            .abi_encode(),
            Self::EndAuction { auction_id } => Auction::Auction::endAuctionCall {
                auctionId: U256::from(*auction_id),
            }
            .abi_encode(),
        }
    }
}

/// Transactions signed by the session wallet.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChainWrite: Send + Sync {
    /// Executes the call against the latest state without broadcasting it.
    async fn simulate(&self, call: &ContractCall) -> Result<(), Error>;

    /// Signs and broadcasts the call, returning the transaction hash.
    async fn broadcast(&self, call: &ContractCall) -> Result<B256, Error>;

    /// Sends a plain native currency transfer.
    async fn transfer(&self, to: Address, value: U256) -> Result<B256, Error>;
}

/// [`ChainRead`] and [`ChainWrite`] backed by a node.
pub struct Onchain {
    contract: Auction::Instance,
    account: Option<Address>,
}

impl Onchain {
    pub fn new(provider: AlloyProvider, session: &Session) -> Self {
        Self {
            contract: Auction::Instance::new(session.contract, provider),
            account: session.wallet,
        }
    }

    fn transaction(&self, to: Address, input: Vec<u8>, value: U256) -> TransactionRequest {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(input)
            .with_value(value);
        match self.account {
            Some(from) => tx.with_from(from),
            None => tx,
        }
    }

    fn contract_transaction(&self, call: &ContractCall) -> TransactionRequest {
        self.transaction(*self.contract.address(), call.calldata(), call.value())
    }

    async fn send(&self, tx: TransactionRequest) -> Result<B256, Error> {
        let pending = self
            .contract
            .provider()
            .send_transaction(tx)
            .await
            .map_err(ContractError::from)?;
        Ok(*pending.tx_hash())
    }
}

#[async_trait::async_trait]
impl ChainRead for Onchain {
    async fn auction_count(&self) -> Result<u64, Error> {
        let count = self.contract.auctionCount().call().await?;
        u64::try_from(count)
            .map_err(|_| Error::Node(anyhow::anyhow!("auction count {count} out of range")))
    }

    async fn auction(&self, id: u64) -> Result<RawAuction, Error> {
        let auction = self.contract.getAuction(U256::from(id)).call().await?;
        Ok(auction.into())
    }

    async fn bid_counts(&self) -> Result<HashMap<u64, u64>, Error> {
        let events = self
            .contract
            .BidPlaced_filter()
            .from_block(0u64)
            .query()
            .await?;
        let mut counts = HashMap::new();
        for (event, _) in events {
            let Ok(id) = u64::try_from(event.auctionId) else {
                continue;
            };
            *counts.entry(id).or_default() += 1;
        }
        Ok(counts)
    }

    async fn user_records(&self, account: Address) -> Result<Vec<Settlement>, Error> {
        let records = self.contract.getUserRecords(account).call().await?;
        Ok(records.into_iter().map(Settlement::from).collect())
    }
}

#[async_trait::async_trait]
impl ChainWrite for Onchain {
    async fn simulate(&self, call: &ContractCall) -> Result<(), Error> {
        self.contract
            .provider()
            .call(self.contract_transaction(call))
            .await
            .map_err(ContractError::from)?;
        Ok(())
    }

    async fn broadcast(&self, call: &ContractCall) -> Result<B256, Error> {
        self.send(self.contract_transaction(call)).await
    }

    async fn transfer(&self, to: Address, value: U256) -> Result<B256, Error> {
        self.send(self.transaction(to, Vec::new(), value)).await
    }
}

#[cfg(test)]
mod tests {
    use {super::*, number::units::EthUnit};

    #[test]
    fn only_bids_are_simulated() {
        let bid = ContractCall::PlaceBid {
            auction_id: 1,
            value: 2u64.eth(),
        };
        let free_bid = ContractCall::PlaceBid {
            auction_id: 1,
            value: U256::ZERO,
        };
        let end = ContractCall::EndAuction { auction_id: 1 };
        assert!(bid.requires_simulation());
        assert!(free_bid.requires_simulation());
        assert_eq!(bid.value(), 2u64.eth());
        assert!(!end.requires_simulation());
        assert_eq!(end.value(), U256::ZERO);
    }

    #[test]
    fn encodes_calldata() {
        let calldata = ContractCall::PlaceBid {
            auction_id: 7,
            value: U256::ZERO,
        }
        .calldata();
        assert_eq!(&calldata[..4], Auction::Auction::placeBidCall::SELECTOR);
        assert_eq!(U256::from_be_slice(&calldata[4..]), U256::from(7));

        let calldata = ContractCall::CreateAuction {
            item_name: "Vase".to_string(),
            starting_price: 1u64.eth(),
            duration: Duration::from_secs(3600),
        }
        .calldata();
        let decoded = Auction::Auction::createAuctionCall::abi_decode(&calldata).unwrap();
        assert_eq!(decoded.itemName, "Vase");
        assert_eq!(decoded.startingPrice, 1u64.eth());
        assert_eq!(decoded.duration, U256::from(3600));
    }
}
