use {
    crate::{
        auction::{RecordPolicy, StatusFilter},
        synchronizer::Mode,
    },
    alloy::{primitives::Address, signers::local::PrivateKeySigner},
    bigdecimal::BigDecimal,
    clap::{ArgAction, Parser, Subcommand},
    std::{fmt, net::SocketAddr, time::Duration},
    tracing::level_filters::LevelFilter,
    url::Url,
};

#[derive(Parser)]
pub struct LoggingArguments {
    #[clap(long, env, default_value = "warn,auctions=debug,ethrpc=debug")]
    pub log_filter: String,

    #[clap(long, env, default_value = "error")]
    pub log_stderr_threshold: LevelFilter,

    /// Emit log events as JSON lines.
    #[clap(long, env)]
    pub use_json_logs: bool,
}

impl LoggingArguments {
    pub fn observe_config(&self) -> observe::Config {
        observe::Config::new(&self.log_filter)
            .stderr_threshold(self.log_stderr_threshold.into_level())
            .json(self.use_json_logs)
    }
}

impl fmt::Display for LoggingArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            log_filter,
            log_stderr_threshold,
            use_json_logs,
        } = self;

        writeln!(f, "log_filter: {log_filter}")?;
        writeln!(f, "log_stderr_threshold: {log_stderr_threshold}")?;
        writeln!(f, "use_json_logs: {use_json_logs}")?;
        Ok(())
    }
}

#[derive(Parser)]
#[clap(version, about = "Client for the on-chain auction marketplace")]
pub struct Arguments {
    #[clap(flatten)]
    pub logging: LoggingArguments,

    /// The Ethereum node URL to connect to.
    #[clap(long, env, default_value = "http://localhost:8545")]
    pub node_url: Url,

    /// Address of the auction contract.
    #[clap(long, env)]
    pub auction_contract: Address,

    /// Private key of the account that bids, creates and ends auctions and
    /// pays for API calls. Without it only reading commands work.
    #[clap(long, env)]
    pub private_key: Option<PrivateKeySigner>,

    /// Base URL of the pay-per-call analysis API.
    #[clap(long, env, default_value = "http://localhost:3001")]
    pub api_url: Url,

    /// Timeout of requests against the analysis API.
    #[clap(
        long,
        env,
        default_value = "10s",
        value_parser = humantime::parse_duration,
    )]
    pub http_timeout: Duration,

    /// Smallest raise over the current price a bid must offer.
    #[clap(long, env, default_value = RecordPolicy::DEFAULT_MIN_BID_INCREMENT)]
    pub min_bid_increment: BigDecimal,

    /// Whether auctions are shown as protected against last second bids.
    #[clap(long, env, default_value_t = true, action = ArgAction::Set)]
    pub anti_snipe: bool,

    /// How often receipts and the latest block are polled while waiting for
    /// a transaction.
    #[clap(
        long,
        env,
        default_value = "1500ms",
        value_parser = humantime::parse_duration,
    )]
    pub confirmation_poll_interval: Duration,

    /// How long to wait for the confirmation depth after a transaction was
    /// mined before continuing anyway.
    #[clap(
        long,
        env,
        default_value = "60s",
        value_parser = humantime::parse_duration,
    )]
    pub confirmation_timeout: Duration,

    /// Serve prometheus metrics on this address.
    #[clap(long, env)]
    pub metrics_address: Option<SocketAddr>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Keep the auction list in sync until interrupted.
    Watch {
        #[clap(long, env, value_enum, default_value = "incremental")]
        mode: Mode,

        /// Time between two refreshes. Values below 3s are raised to 3s.
        #[clap(
            long,
            env,
            default_value = "10s",
            value_parser = humantime::parse_duration,
        )]
        poll_interval: Duration,

        /// In incremental mode, time after which a full refresh happens.
        #[clap(
            long,
            env,
            default_value = "60s",
            value_parser = humantime::parse_duration,
        )]
        full_sync_interval: Duration,

        /// Count the bids of every auction.
        #[clap(long, env)]
        count_bids: bool,
    },
    /// Print all auctions once.
    List {
        #[clap(long, value_enum, default_value = "all")]
        status: StatusFilter,

        /// Print JSON instead of a table.
        #[clap(long)]
        json: bool,

        /// Count the bids of every auction.
        #[clap(long)]
        count_bids: bool,
    },
    /// Bid on an auction.
    Bid {
        auction_id: u64,
        /// Amount in the native currency, e.g. `1.5`.
        amount: BigDecimal,
    },
    /// Create a new auction.
    Create {
        item_name: String,
        /// Starting price in the native currency.
        starting_price: BigDecimal,
        /// Auction duration, e.g. `1h`.
        #[clap(value_parser = humantime::parse_duration)]
        duration: Duration,
    },
    /// End an auction whose time is up.
    End { auction_id: u64 },
    /// Buy the AI price analysis of an auction.
    Analyze { auction_id: u64 },
    /// Print the settled auctions recorded for an account.
    Records {
        /// Account to look up. Defaults to the account of `--private-key`.
        #[clap(long)]
        account: Option<Address>,

        /// Print JSON instead of a table.
        #[clap(long)]
        json: bool,
    },
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            logging,
            node_url,
            auction_contract,
            private_key,
            api_url,
            http_timeout,
            min_bid_increment,
            anti_snipe,
            confirmation_poll_interval,
            confirmation_timeout,
            metrics_address,
            command,
        } = self;

        write!(f, "{logging}")?;
        writeln!(f, "node_url: {node_url}")?;
        writeln!(f, "auction_contract: {auction_contract:?}")?;
        let private_key = private_key.as_ref().map(|_| "SECRET");
        writeln!(f, "private_key: {private_key:?}")?;
        writeln!(f, "api_url: {api_url}")?;
        writeln!(f, "http_timeout: {http_timeout:?}")?;
        writeln!(f, "min_bid_increment: {min_bid_increment}")?;
        writeln!(f, "anti_snipe: {anti_snipe}")?;
        writeln!(f, "confirmation_poll_interval: {confirmation_poll_interval:?}")?;
        writeln!(f, "confirmation_timeout: {confirmation_timeout:?}")?;
        writeln!(f, "metrics_address: {metrics_address:?}")?;
        writeln!(f, "command: {command:?}")?;
        Ok(())
    }
}
