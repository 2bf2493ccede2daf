pub mod arguments;
pub mod auction;
pub mod chain;
pub mod metered;
pub mod session;
pub mod shutdown;
pub mod submitter;
pub mod synchronizer;

use {
    crate::{
        arguments::{Arguments, Command},
        auction::{AuctionRecord, RecordPolicy, Settlement, StatusFilter, short_address},
        chain::{ChainRead, Onchain},
        metered::MeteredClient,
        session::Session,
        shutdown::Shutdown,
        submitter::{Call, Submission, Submitter},
        synchronizer::Synchronizer,
    },
    alloy::{primitives::Address, providers::Provider},
    anyhow::{Context, Result, ensure},
    chrono::Utc,
    ethrpc::confirmations::ConfirmationPolicy,
    std::sync::Arc,
};

pub async fn run(args: Arguments) -> Result<()> {
    if let Some(address) = args.metrics_address {
        observe::metrics::serve_metrics(address);
    }

    let provider = ethrpc::alloy::provider(&args.node_url, args.private_key.clone());
    let chain_id = provider
        .get_chain_id()
        .await
        .context("failed to fetch chain id")?;
    let session = Session {
        chain_id,
        wallet: args.private_key.as_ref().map(|signer| signer.address()),
        contract: args.auction_contract,
    };
    tracing::info!(?session, "connected to node");

    let onchain = Arc::new(Onchain::new(provider.clone(), &session));
    let receipts = Arc::new(provider);
    let policy = RecordPolicy::new(&args.min_bid_increment, args.anti_snipe)
        .context("invalid minimum bid increment")?;
    let confirmations = ConfirmationPolicy::for_chain(chain_id)
        .with_poll_interval(args.confirmation_poll_interval)
        .with_depth_timeout(args.confirmation_timeout);
    let shutdown = Shutdown::on_signal();

    match args.command {
        Command::Watch {
            mode,
            poll_interval,
            full_sync_interval,
            count_bids,
        } => {
            let synchronizer = Synchronizer::new(
                onchain,
                synchronizer::Config {
                    mode,
                    full_sync_interval,
                    policy,
                    count_bids,
                },
            );
            let mut updates = synchronizer.subscribe();
            tokio::spawn(async move {
                while updates.changed().await.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    if snapshot.is_loading {
                        continue;
                    }
                    if let Some(error) = &snapshot.error {
                        tracing::warn!(error, "auction list is stale");
                        continue;
                    }
                    let active = snapshot
                        .auctions
                        .iter()
                        .filter(|auction| auction.is_active())
                        .count();
                    tracing::info!(
                        auctions = snapshot.auctions.len(),
                        active,
                        "auction list updated"
                    );
                }
            });
            synchronizer.run(poll_interval, shutdown).await;
        }
        Command::List {
            status,
            json,
            count_bids,
        } => {
            let synchronizer = Synchronizer::new(
                onchain,
                synchronizer::Config {
                    policy,
                    count_bids,
                    ..Default::default()
                },
            );
            synchronizer.refresh_all().await?;
            print_auctions(&synchronizer.snapshot().auctions, status, json)?;
        }
        Command::Bid { auction_id, amount } => {
            ensure!(session.can_sign(), "bidding requires --private-key");
            let submitter = Submitter::new(
                onchain.clone(),
                onchain,
                receipts,
                policy,
                confirmations,
                shutdown,
            );
            let submission = submitter
                .submit(Call::PlaceBid { auction_id, amount })
                .await?;
            print_submission(&submission);
        }
        Command::Create {
            item_name,
            starting_price,
            duration,
        } => {
            ensure!(session.can_sign(), "creating auctions requires --private-key");
            let submitter = Submitter::new(
                onchain.clone(),
                onchain,
                receipts,
                policy,
                confirmations,
                shutdown,
            );
            let submission = submitter
                .submit(Call::CreateAuction {
                    item_name,
                    starting_price,
                    duration,
                })
                .await?;
            print_submission(&submission);
        }
        Command::End { auction_id } => {
            ensure!(session.can_sign(), "ending auctions requires --private-key");
            let submitter = Submitter::new(
                onchain.clone(),
                onchain,
                receipts,
                policy,
                confirmations,
                shutdown,
            );
            let submission = submitter.submit(Call::EndAuction { auction_id }).await?;
            print_submission(&submission);
        }
        Command::Analyze { auction_id } => {
            ensure!(session.can_sign(), "paying for analyses requires --private-key");
            let http = reqwest::Client::builder()
                .timeout(args.http_timeout)
                .build()
                .context("failed to build http client")?;
            let client = MeteredClient::new(
                http,
                args.api_url,
                onchain,
                receipts,
                confirmations,
                shutdown,
            );
            let analysis = client.analysis(auction_id).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Records { account, json } => {
            let records = settlements(onchain.as_ref(), &session, account).await?;
            print_settlements(&records, json)?;
        }
    }
    Ok(())
}

/// Settled auctions of `account`, falling back to the session wallet,
/// newest first.
pub async fn settlements(
    chain: &dyn ChainRead,
    session: &Session,
    account: Option<Address>,
) -> Result<Vec<Settlement>> {
    let account = account
        .or(session.wallet)
        .context("showing records requires --account or --private-key")?;
    let mut records = chain
        .user_records(account)
        .await
        .context("failed to read auction records")?;
    records.sort_by(|a, b| (b.settled_at, b.auction_id).cmp(&(a.settled_at, a.auction_id)));
    Ok(records)
}

fn print_auctions(auctions: &[AuctionRecord], filter: StatusFilter, json: bool) -> Result<()> {
    let auctions = auctions
        .iter()
        .filter(|auction| filter.matches(auction))
        .collect::<Vec<_>>();
    if json {
        println!("{}", serde_json::to_string_pretty(&auctions)?);
        return Ok(());
    }

    let now = Utc::now();
    for auction in auctions {
        let bids = auction
            .bids
            .map(|bids| format!(" bids={bids}"))
            .unwrap_or_default();
        println!(
            "#{:<4} {:<24} {:>12} {:<6} left={} seller={} leader={}{bids}",
            auction.id,
            auction.name,
            auction.current_price.to_string(),
            auction.status.to_string(),
            auction.time_left(now),
            short_address(&auction.seller),
            short_address(&auction.highest_bidder),
        );
    }
    Ok(())
}

fn print_settlements(records: &[Settlement], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no auction records");
    }
    for record in records {
        println!(
            "#{:<4} {:<24} {:>12} settled {}",
            record.auction_id,
            record.item_name,
            record.final_price.to_string(),
            record.settled_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }
    Ok(())
}

fn print_submission(submission: &Submission) {
    println!(
        "transaction {} in block {} ({}), {:?} after sending, depth {:?}",
        submission.hash,
        submission.receipt.block_number,
        if submission.receipt.success {
            "success"
        } else {
            "reverted"
        },
        submission.elapsed,
        submission.depth,
    );
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        alloy::primitives::U256,
        chain::MockChainRead,
        chrono::DateTime,
        number::units::EthUnit,
    };

    const WALLET: Address = Address::repeat_byte(0x22);

    fn session(wallet: Option<Address>) -> Session {
        Session {
            chain_id: contracts::alloy::networks::LOCALHOST,
            wallet,
            contract: Address::repeat_byte(0xcc),
        }
    }

    fn settlement(auction_id: u64, settled_at: i64) -> Settlement {
        Settlement {
            auction_id,
            item_name: format!("Item {auction_id}"),
            final_price: 1.into(),
            final_price_wei: 1u64.eth(),
            settled_at: DateTime::from_timestamp(settled_at, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn settlements_of_the_session_wallet_newest_first() {
        let mut reader = MockChainRead::new();
        reader
            .expect_user_records()
            .withf(|account| *account == WALLET)
            .times(1)
            .returning(|_| Ok(vec![settlement(1, 100), settlement(3, 300), settlement(2, 200)]));

        let records = settlements(&reader, &session(Some(WALLET)), None)
            .await
            .unwrap();
        assert_eq!(
            records.iter().map(|r| r.auction_id).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(records[0].final_price_wei, U256::from(10u64.pow(18)));
    }

    #[tokio::test]
    async fn explicit_account_wins_over_wallet() {
        let other = Address::repeat_byte(0x33);
        let mut reader = MockChainRead::new();
        reader
            .expect_user_records()
            .withf(move |account| *account == other)
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let records = settlements(&reader, &session(Some(WALLET)), Some(other))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn settlements_need_an_account() {
        let mut reader = MockChainRead::new();
        reader.expect_user_records().never();

        let err = settlements(&reader, &session(None), None).await.unwrap_err();
        assert!(err.to_string().contains("--account"));
    }

    #[tokio::test]
    async fn failed_read_is_reported() {
        let mut reader = MockChainRead::new();
        reader
            .expect_user_records()
            .returning(|_| Err(chain::Error::Node(anyhow::anyhow!("timeout"))));

        let err = settlements(&reader, &session(Some(WALLET)), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to read auction records");
    }
}
