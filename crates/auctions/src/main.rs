use clap::Parser;

#[tokio::main]
async fn main() {
    let args = auctions::arguments::Arguments::parse();
    observe::tracing::initialize(&args.logging.observe_config());
    if let Err(err) = observe::metrics::setup_registry(Some("auctions".to_string()), None) {
        tracing::warn!(?err, "failed to set up metrics registry");
    }
    tracing::info!("running auctions with validated arguments:\n{}", args);
    if let Err(err) = auctions::run(args).await {
        tracing::error!(?err, "command failed");
        std::process::exit(1);
    }
}
