//! In-memory representation of on-chain auctions.

use {
    alloy::primitives::{Address, U256},
    anyhow::Result,
    bigdecimal::BigDecimal,
    chrono::{DateTime, TimeDelta, Utc},
    contracts::alloy::Auction,
    number::units::{NATIVE_DECIMALS, from_base_units, to_base_units},
    serde::Serialize,
    serde_with::{DisplayFromStr, serde_as},
    std::fmt,
};

/// Auction fields exactly as returned by `getAuction`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAuction {
    pub seller: Address,
    pub starting_price: U256,
    pub highest_bid: U256,
    pub highest_bidder: Address,
    /// Unix timestamp in seconds.
    pub end_time: u64,
    pub ended: bool,
    pub item_name: String,
    pub claimed: bool,
}

impl From<Auction::Auction::getAuctionReturn> for RawAuction {
    fn from(value: Auction::Auction::getAuctionReturn) -> Self {
        Self {
            seller: value.seller,
            starting_price: value.startingPrice,
            highest_bid: value.highestBid,
            highest_bidder: value.highestBidder,
            end_time: value.endTime.saturating_to(),
            ended: value.ended,
            item_name: value.itemName,
            claimed: value.claimed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Ended,
}

impl Status {
    /// An auction is over once the contract flagged it or its end time
    /// passed. There is no separate "upcoming" state.
    pub fn derive(ended_flag: bool, end_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if ended_flag || now >= end_time {
            Self::Ended
        } else {
            Self::Active
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

/// Client side policy values that the contract does not expose.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordPolicy {
    /// Smallest accepted raise over the current price, in base units.
    pub min_bid_increment: U256,
    pub anti_snipe: bool,
}

impl RecordPolicy {
    pub const DEFAULT_MIN_BID_INCREMENT: &str = "0.00001";

    pub fn new(min_bid_increment: &BigDecimal, anti_snipe: bool) -> Result<Self> {
        Ok(Self {
            min_bid_increment: to_base_units(min_bid_increment, NATIVE_DECIMALS)?,
            anti_snipe,
        })
    }
}

impl Default for RecordPolicy {
    fn default() -> Self {
        Self {
            // 0.00001 of the native currency
            min_bid_increment: U256::from(10_000_000_000_000u64),
            anti_snipe: true,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRecord {
    pub id: u64,
    pub name: String,
    pub description: String,
    #[serde_as(as = "DisplayFromStr")]
    pub starting_price: BigDecimal,
    #[serde_as(as = "DisplayFromStr")]
    pub current_price: BigDecimal,
    #[serde_as(as = "DisplayFromStr")]
    pub min_bid_increment: BigDecimal,
    #[serde(skip)]
    pub starting_price_wei: U256,
    #[serde(skip)]
    pub current_price_wei: U256,
    #[serde(skip)]
    pub min_bid_increment_wei: U256,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    pub status: Status,
    pub is_anti_snipe: bool,
    pub seller: Address,
    /// Zero address while nobody has bid.
    pub highest_bidder: Address,
    /// Number of `BidPlaced` logs, `None` when bids are not counted.
    pub bids: Option<u64>,
    pub claimed: bool,
    pub ended_flag: bool,
}

impl AuctionRecord {
    pub fn new(id: u64, raw: RawAuction, policy: &RecordPolicy, now: DateTime<Utc>) -> Self {
        let current_price_wei = if raw.highest_bid.is_zero() {
            raw.starting_price
        } else {
            raw.highest_bid
        };
        let end_time = from_unix(raw.end_time);

        Self {
            id,
            name: raw.item_name,
            description: String::new(),
            starting_price: from_base_units(raw.starting_price, NATIVE_DECIMALS),
            current_price: from_base_units(current_price_wei, NATIVE_DECIMALS),
            min_bid_increment: from_base_units(policy.min_bid_increment, NATIVE_DECIMALS),
            starting_price_wei: raw.starting_price,
            current_price_wei,
            min_bid_increment_wei: policy.min_bid_increment,
            end_time,
            status: Status::derive(raw.ended, end_time, now),
            is_anti_snipe: policy.anti_snipe,
            seller: raw.seller,
            highest_bidder: raw.highest_bidder,
            bids: None,
            claimed: raw.claimed,
            ended_flag: raw.ended,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    /// Lowest bid the contract would accept, in base units.
    pub fn min_next_bid_wei(&self) -> U256 {
        self.current_price_wei.saturating_add(self.min_bid_increment_wei)
    }

    pub fn min_next_bid(&self) -> BigDecimal {
        from_base_units(self.min_next_bid_wei(), NATIVE_DECIMALS)
    }

    /// Remaining time formatted as `HH:MM:SS`, `00:00:00` once over.
    pub fn time_left(&self, now: DateTime<Utc>) -> String {
        let left = (self.end_time - now).max(TimeDelta::zero());
        let secs = left.num_seconds();
        format!(
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}

/// An auction the account took part in that was settled, as kept by the
/// contract.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub auction_id: u64,
    pub item_name: String,
    #[serde_as(as = "DisplayFromStr")]
    pub final_price: BigDecimal,
    #[serde(skip)]
    pub final_price_wei: U256,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub settled_at: DateTime<Utc>,
}

impl From<Auction::Auction::UserRecord> for Settlement {
    fn from(value: Auction::Auction::UserRecord) -> Self {
        Self {
            auction_id: value.auctionId.saturating_to(),
            item_name: value.itemName,
            final_price: from_base_units(value.finalPrice, NATIVE_DECIMALS),
            final_price_wei: value.finalPrice,
            settled_at: from_unix(value.timestamp.saturating_to()),
        }
    }
}

/// Timestamps beyond what chrono represents saturate.
fn from_unix(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Renders an address as `0x1234...abcd`; the zero address reads `none`.
pub fn short_address(address: &Address) -> String {
    if address.is_zero() {
        return "none".to_string();
    }
    let full = address.to_string();
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Ended,
}

impl StatusFilter {
    pub fn matches(&self, record: &AuctionRecord) -> bool {
        match self {
            Self::All => true,
            Self::Active => record.status == Status::Active,
            Self::Ended => record.status == Status::Ended,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, alloy::primitives::address, number::units::EthUnit, std::str::FromStr};

    fn raw(highest_bid: U256, end_time: u64) -> RawAuction {
        RawAuction {
            seller: address!("0x1111111111111111111111111111111111111111"),
            starting_price: 1u64.eth(),
            highest_bid,
            highest_bidder: if highest_bid.is_zero() {
                Address::ZERO
            } else {
                address!("0x2222222222222222222222222222222222222222")
            },
            end_time,
            ended: false,
            item_name: "Painting".to_string(),
            claimed: false,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn current_price_falls_back_to_starting_price() {
        let record = AuctionRecord::new(1, raw(U256::ZERO, 2_000), &Default::default(), at(1_000));
        assert_eq!(record.current_price_wei, 1u64.eth());
        assert_eq!(record.current_price, BigDecimal::from(1));
        assert!(record.highest_bidder.is_zero());

        let bid = U256::from(1_500_000_000_000_000_000u64);
        let record = AuctionRecord::new(1, raw(bid, 2_000), &Default::default(), at(1_000));
        assert_eq!(record.current_price_wei, bid);
        assert_eq!(record.current_price, BigDecimal::from_str("1.5").unwrap());
        assert!(!record.highest_bidder.is_zero());
    }

    #[test]
    fn status_from_flag_and_end_time() {
        let now = at(1_000);
        assert_eq!(Status::derive(false, at(1_001), now), Status::Active);
        assert_eq!(Status::derive(false, at(1_000), now), Status::Ended);
        assert_eq!(Status::derive(false, at(999), now), Status::Ended);
        assert_eq!(Status::derive(true, at(5_000), now), Status::Ended);
    }

    #[test]
    fn end_time_is_in_milliseconds() {
        let raw = raw(U256::ZERO, 1_700_000_000);
        let record = AuctionRecord::new(3, raw, &Default::default(), at(0));
        assert_eq!(record.end_time.timestamp_millis(), 1_700_000_000_000);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["endTime"], 1_700_000_000_000i64);
        assert_eq!(json["status"], "active");
        assert_eq!(json["currentPrice"], "1");
        assert_eq!(
            BigDecimal::from_str(json["minBidIncrement"].as_str().unwrap()).unwrap(),
            BigDecimal::from_str("0.00001").unwrap()
        );
        assert!(json.get("currentPriceWei").is_none());
    }

    #[test]
    fn min_next_bid_adds_increment() {
        let policy = RecordPolicy::new(&BigDecimal::from_str("0.01").unwrap(), false).unwrap();
        let record = AuctionRecord::new(1, raw(U256::ZERO, 2_000), &policy, at(0));
        assert_eq!(record.min_next_bid(), BigDecimal::from_str("1.01").unwrap());
        assert!(!record.is_anti_snipe);
    }

    #[test]
    fn default_policy_matches_default_increment() {
        let parsed = RecordPolicy::new(
            &BigDecimal::from_str(RecordPolicy::DEFAULT_MIN_BID_INCREMENT).unwrap(),
            true,
        )
        .unwrap();
        assert_eq!(parsed, RecordPolicy::default());
    }

    #[test]
    fn formats_time_left() {
        let record = AuctionRecord::new(1, raw(U256::ZERO, 10_000), &Default::default(), at(0));
        assert_eq!(record.time_left(at(10_000 - 3_725)), "01:02:05");
        assert_eq!(record.time_left(at(10_000)), "00:00:00");
        assert_eq!(record.time_left(at(20_000)), "00:00:00");
        assert_eq!(record.time_left(at(10_000 - 100 * 3600)), "100:00:00");
    }

    #[test]
    fn settlement_from_contract_record() {
        let settlement = Settlement::from(Auction::Auction::UserRecord {
            auctionId: U256::from(4),
            itemName: "Clock".to_string(),
            finalPrice: U256::from(2_500_000_000_000_000_000u64),
            timestamp: U256::from(1_700_000_000u64),
        });
        assert_eq!(settlement.auction_id, 4);
        assert_eq!(settlement.final_price, BigDecimal::from_str("2.5").unwrap());
        assert_eq!(settlement.settled_at, at(1_700_000_000));

        let json = serde_json::to_value(&settlement).unwrap();
        assert_eq!(json["auctionId"], 4);
        assert_eq!(json["finalPrice"], "2.5");
        assert_eq!(json["settledAt"], 1_700_000_000_000i64);
        assert!(json.get("finalPriceWei").is_none());
    }

    #[test]
    fn shortens_addresses() {
        assert_eq!(short_address(&Address::ZERO), "none");
        assert_eq!(
            short_address(&address!("0x1111111111111111111111111111111111112222")),
            "0x1111...2222"
        );
    }

    #[test]
    fn filters_by_status() {
        let active = AuctionRecord::new(1, raw(U256::ZERO, 2_000), &Default::default(), at(0));
        let ended = AuctionRecord::new(2, raw(U256::ZERO, 2_000), &Default::default(), at(3_000));
        assert!(StatusFilter::All.matches(&active) && StatusFilter::All.matches(&ended));
        assert!(StatusFilter::Active.matches(&active) && !StatusFilter::Active.matches(&ended));
        assert!(StatusFilter::Ended.matches(&ended) && !StatusFilter::Ended.matches(&active));
    }
}
