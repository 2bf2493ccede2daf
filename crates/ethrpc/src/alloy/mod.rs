pub mod errors;
mod instrumentation;

use {
    crate::AlloyProvider,
    alloy::{
        network::EthereumWallet,
        providers::{Provider, ProviderBuilder},
        rpc::client::ClientBuilder,
        signers::local::PrivateKeySigner,
    },
    instrumentation::InstrumentationLayer,
    url::Url,
};

/// Creates an instrumented provider for the node at `url`.
///
/// Without a signer the provider can only be used for reads; sending a
/// transaction through it fails at the wallet filler.
pub fn provider(url: &Url, signer: Option<PrivateKeySigner>) -> AlloyProvider {
    let rpc = ClientBuilder::default()
        .layer(InstrumentationLayer)
        .http(url.clone());
    match signer {
        Some(signer) => ProviderBuilder::new()
            .wallet(EthereumWallet::new(signer))
            .connect_client(rpc)
            .erased(),
        None => ProviderBuilder::new().connect_client(rpc).erased(),
    }
}
