pub mod networks {
    /// Hardhat/anvil development chain. Transactions are final as soon as
    /// they are mined.
    pub const LOCALHOST: u64 = 31337;
    pub const MONAD_TESTNET: u64 = 10143;
}

// Generate the bindings in a private module. That allows us to re-export all
// items in our own module while also adding some items ourselves.
#[allow(non_snake_case)]
mod AuctionPrivate {
    alloy::sol!(
        #[allow(missing_docs)]
        #[sol(rpc)]
        contract Auction {
            struct UserRecord {
                uint256 auctionId;
                string itemName;
                uint256 finalPrice;
                uint256 timestamp;
            }

            event BidPlaced(uint256 indexed auctionId, address indexed bidder, uint256 amount);

            function auctionCount() external view returns (uint256);

            function getAuction(uint256 auctionId)
                external
                view
                returns (
                    address seller,
                    uint256 startingPrice,
                    uint256 highestBid,
                    address highestBidder,
                    uint256 endTime,
                    bool ended,
                    string memory itemName,
                    bool claimed
                );

            function getUserRecords(address user) external view returns (UserRecord[] memory);

            function createAuction(string memory itemName, uint256 startingPrice, uint256 duration)
                external
                returns (uint256);

            function placeBid(uint256 auctionId) external payable;

            function endAuction(uint256 auctionId) external;
        }
    );
}

#[allow(non_snake_case)]
pub mod Auction {
    use alloy::providers::DynProvider;

    pub use super::AuctionPrivate::*;
    pub type Instance = Auction::AuctionInstance<DynProvider>;
}
