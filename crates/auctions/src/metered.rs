//! Client for the pay-per-call API.
//!
//! A request answered with `402 Payment Required` carries payment terms. The
//! client pays them with a native currency transfer, waits until the transfer
//! is confirmed and repeats the request once with the transaction hash
//! attached as proof.

use {
    crate::{
        chain::{self, ChainWrite},
        shutdown::Shutdown,
        submitter,
    },
    alloy::primitives::{Address, B256},
    bigdecimal::BigDecimal,
    ethrpc::confirmations::{ConfirmationPolicy, ReceiptPolling},
    number::{
        serialization::Decimal,
        units::{NATIVE_DECIMALS, to_base_units},
    },
    reqwest::StatusCode,
    serde::{Deserialize, Serialize},
    serde_with::{DisplayFromStr, PickFirst, serde_as},
    std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    tokio::sync::watch,
    url::Url,
};

pub const PAYMENT_PROOF_HEADER: &str = "X-Payment-Proof";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Requesting,
    PayingChallenge,
    AwaitingConfirmation,
    Retrying,
    Fulfilled,
    Failed,
}

/// Observable progress of the latest call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallState {
    /// Increases with every started call.
    pub call: u64,
    pub phase: Phase,
    pub is_loading: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Hash of the payment made during the call, if one was demanded.
    pub payment: Option<B256>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PaymentTerms {
    pub recipient: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: BigDecimal,
}

#[derive(Debug, Deserialize)]
struct PaymentChallenge {
    payment: PaymentTerms,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAnalysis {
    pub trend: String,
    #[serde_as(as = "Decimal")]
    pub suggested_bid: BigDecimal,
    #[serde_as(as = "Decimal")]
    pub current_price: BigDecimal,
    #[serde_as(as = "Decimal")]
    pub predicted_price: BigDecimal,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint {0:?}")]
    Endpoint(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API error: {status}: malformed payment challenge: {source}")]
    Challenge {
        status: StatusCode,
        source: reqwest::Error,
    },
    #[error("invalid payment amount: {0:#}")]
    Amount(anyhow::Error),
    #[error("payment failed: {0}")]
    Payment(#[source] chain::Error),
    #[error("stopped waiting for payment {0}")]
    Cancelled(B256),
    #[error("API error: {0}")]
    Status(StatusCode),
    #[error("API error: {status}: malformed response: {source}")]
    Payload {
        status: StatusCode,
        source: reqwest::Error,
    },
    #[error("API error: unexpected analysis: {0}")]
    Analysis(#[source] serde_json::Error),
}

pub struct MeteredClient {
    http: reqwest::Client,
    base_url: Url,
    payer: Arc<dyn ChainWrite>,
    receipts: Arc<dyn ReceiptPolling>,
    confirmations: ConfirmationPolicy,
    shutdown: Shutdown,
    calls: AtomicU64,
    state: watch::Sender<CallState>,
}

impl MeteredClient {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        payer: Arc<dyn ChainWrite>,
        receipts: Arc<dyn ReceiptPolling>,
        confirmations: ConfirmationPolicy,
        shutdown: Shutdown,
    ) -> Self {
        let (state, _) = watch::channel(CallState::default());
        Self {
            http,
            base_url,
            payer,
            receipts,
            confirmations,
            shutdown,
            calls: AtomicU64::new(0),
            state,
        }
    }

    pub fn state(&self) -> CallState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    /// Fetches the AI price analysis of an auction.
    pub async fn analysis(&self, auction_id: u64) -> Result<PriceAnalysis, Error> {
        let data = self
            .call(&format!("/api/auction/{auction_id}/analysis"))
            .await?;
        serde_json::from_value(data).map_err(Error::Analysis)
    }

    /// Performs a GET request against `endpoint`, paying for it if the API
    /// demands so.
    ///
    /// The state is reset before the first await, so a newer call always
    /// owns the observable state. Updates of an older call still in flight
    /// are dropped.
    pub async fn call(&self, endpoint: &str) -> Result<serde_json::Value, Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(CallState {
            call,
            phase: Phase::Requesting,
            is_loading: true,
            ..Default::default()
        });

        let result = self.request(call, endpoint).await;
        self.update(call, |state| {
            state.is_loading = false;
            match &result {
                Ok(data) => {
                    state.phase = Phase::Fulfilled;
                    state.data = Some(data.clone());
                }
                Err(err) => {
                    state.phase = Phase::Failed;
                    state.error = Some(err.to_string());
                }
            }
        });
        if let Err(err) = &result {
            tracing::debug!(?err, endpoint, "metered API call failed");
        }
        result
    }

    async fn request(&self, call: u64, endpoint: &str) -> Result<serde_json::Value, Error> {
        let url = self.url(endpoint)?;
        let mut response = self.http.get(url.clone()).send().await?;

        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let challenge = response
                .json::<PaymentChallenge>()
                .await
                .map_err(|source| Error::Challenge {
                    status: StatusCode::PAYMENT_REQUIRED,
                    source,
                })?;
            let proof = self.pay(call, &challenge.payment).await?;
            self.update(call, |state| state.phase = Phase::Retrying);
            response = self
                .http
                .get(url)
                .header(PAYMENT_PROOF_HEADER, proof.to_string())
                .send()
                .await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status));
        }
        response
            .json()
            .await
            .map_err(|source| Error::Payload { status, source })
    }

    async fn pay(&self, call: u64, terms: &PaymentTerms) -> Result<B256, Error> {
        self.update(call, |state| state.phase = Phase::PayingChallenge);
        let value = to_base_units(&terms.amount, NATIVE_DECIMALS).map_err(Error::Amount)?;
        tracing::info!(recipient = ?terms.recipient, amount = %terms.amount, "paying for API call");
        let hash = self
            .payer
            .transfer(terms.recipient, value)
            .await
            .map_err(Error::Payment)?;

        self.update(call, |state| {
            state.phase = Phase::AwaitingConfirmation;
            state.payment = Some(hash);
        });
        submitter::confirm(
            self.receipts.as_ref(),
            hash,
            &self.confirmations,
            self.shutdown.clone(),
        )
        .await
        .map_err(|_| Error::Cancelled(hash))?;
        Ok(hash)
    }

    fn update(&self, call: u64, update: impl FnOnce(&mut CallState)) {
        self.state.send_if_modified(|state| {
            if state.call != call {
                return false;
            }
            update(state);
            true
        });
    }

    fn url(&self, endpoint: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{endpoint}")).map_err(|_| Error::Endpoint(endpoint.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::chain::MockChainWrite,
        alloy::primitives::{U256, address},
        axum::{
            Json,
            Router,
            extract::State,
            http::HeaderMap,
            response::{IntoResponse, Response},
            routing::get,
        },
        ethrpc::confirmations::{MockReceiptPolling, Receipt},
        std::sync::atomic::AtomicUsize,
    };

    const RECIPIENT: Address = address!("0x3333333333333333333333333333333333333333");
    const PAYMENT: B256 = B256::repeat_byte(0x42);

    #[derive(Default)]
    struct Api {
        requests: AtomicUsize,
        /// Whether requests carrying a payment proof are served.
        accept_proof: bool,
        /// Answer every request with this status instead.
        fail_with: Option<StatusCode>,
        /// Answer 402 without payment terms.
        garbled_challenge: bool,
        proofs: std::sync::Mutex<Vec<String>>,
    }

    fn decimal(value: &str) -> BigDecimal {
        value.parse().unwrap()
    }

    async fn analysis(State(api): State<Arc<Api>>, headers: HeaderMap) -> Response {
        api.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = api.fail_with {
            return (status, "boom").into_response();
        }
        if api.garbled_challenge {
            return (StatusCode::PAYMENT_REQUIRED, "pay up").into_response();
        }
        let proof = headers
            .get(PAYMENT_PROOF_HEADER)
            .and_then(|value| value.to_str().ok());
        if let Some(proof) = proof {
            api.proofs.lock().unwrap().push(proof.to_string());
            if api.accept_proof {
                return Json(serde_json::json!({
                    "trend": "increasing",
                    "suggestedBid": "1.25",
                    "currentPrice": 1.2,
                    "predictedPrice": "1.4",
                    "confidence": 0.8,
                    "reasoning": "steady demand",
                }))
                .into_response();
            }
        }
        (
            StatusCode::PAYMENT_REQUIRED,
            Json(serde_json::json!({
                "payment": { "recipient": RECIPIENT, "amount": "0.01" }
            })),
        )
            .into_response()
    }

    async fn serve(api: Arc<Api>) -> Url {
        let app = Router::new()
            .route("/api/auction/{id}/analysis", get(analysis))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{address}").parse().unwrap()
    }

    fn paying_once() -> MockChainWrite {
        let mut payer = MockChainWrite::new();
        payer
            .expect_transfer()
            .withf(|to, value| {
                *to == RECIPIENT && *value == U256::from(10_000_000_000_000_000u64)
            })
            .times(1)
            .returning(|_, _| Ok(PAYMENT));
        payer
    }

    fn mined() -> MockReceiptPolling {
        let mut receipts = MockReceiptPolling::new();
        receipts.expect_receipt().returning(|hash| {
            Ok(Some(Receipt {
                transaction_hash: hash,
                block_number: 1,
                success: true,
                gas_used: 21_000,
            }))
        });
        receipts
    }

    fn client(url: Url, payer: MockChainWrite, receipts: MockReceiptPolling) -> MeteredClient {
        MeteredClient::new(
            reqwest::Client::new(),
            url,
            Arc::new(payer),
            Arc::new(receipts),
            ConfirmationPolicy::for_chain(contracts::alloy::networks::LOCALHOST),
            Shutdown::never(),
        )
    }

    #[tokio::test]
    async fn pays_challenge_and_retries_with_proof() {
        let api = Arc::new(Api {
            accept_proof: true,
            ..Default::default()
        });
        let client = client(serve(api.clone()).await, paying_once(), mined());

        let analysis = client.analysis(1).await.unwrap();
        assert_eq!(analysis.trend, "increasing");
        assert_eq!(analysis.suggested_bid, decimal("1.25"));
        // Given as a JSON number, still exact.
        assert_eq!(analysis.current_price, decimal("1.2"));
        assert_eq!(analysis.predicted_price, decimal("1.4"));
        assert_eq!(analysis.confidence, 0.8);

        assert_eq!(api.requests.load(Ordering::SeqCst), 2);
        assert_eq!(*api.proofs.lock().unwrap(), vec![PAYMENT.to_string()]);
        let state = client.state();
        assert_eq!(state.phase, Phase::Fulfilled);
        assert!(!state.is_loading);
        assert_eq!(state.payment, Some(PAYMENT));
        assert!(state.error.is_none());
        assert_eq!(state.data.unwrap()["reasoning"], "steady demand");
    }

    #[tokio::test]
    async fn retries_exactly_once() {
        let api = Arc::new(Api::default());
        let client = client(serve(api.clone()).await, paying_once(), mined());

        let err = client.analysis(1).await.unwrap_err();
        assert!(matches!(err, Error::Status(StatusCode::PAYMENT_REQUIRED)));
        assert_eq!(api.requests.load(Ordering::SeqCst), 2);
        let state = client.state();
        assert_eq!(state.phase, Phase::Failed);
        assert!(state.error.unwrap().contains("402"));
    }

    #[tokio::test]
    async fn other_errors_are_not_paid_for() {
        let api = Arc::new(Api {
            fail_with: Some(StatusCode::INTERNAL_SERVER_ERROR),
            ..Default::default()
        });
        let mut payer = MockChainWrite::new();
        payer.expect_transfer().never();
        let client = client(serve(api.clone()).await, payer, MockReceiptPolling::new());

        let err = client.call("/api/auction/1/analysis").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Status(StatusCode::INTERNAL_SERVER_ERROR)
        ));
        assert_eq!(api.requests.load(Ordering::SeqCst), 1);
        assert_eq!(client.state().payment, None);
    }

    #[tokio::test]
    async fn malformed_challenge_carries_the_status() {
        let api = Arc::new(Api {
            garbled_challenge: true,
            ..Default::default()
        });
        let mut payer = MockChainWrite::new();
        payer.expect_transfer().never();
        let client = client(serve(api.clone()).await, payer, MockReceiptPolling::new());

        let err = client.analysis(1).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Challenge {
                status: StatusCode::PAYMENT_REQUIRED,
                ..
            }
        ));
        assert!(err.to_string().starts_with("API error: 402"));
        assert_eq!(api.requests.load(Ordering::SeqCst), 1);
        assert_eq!(client.state().phase, Phase::Failed);
    }

    #[tokio::test]
    async fn failed_payment_fails_the_call() {
        let api = Arc::new(Api::default());
        let mut payer = MockChainWrite::new();
        payer
            .expect_transfer()
            .times(1)
            .returning(|_, _| Err(chain::Error::Reverted("insufficient funds".to_string())));
        let client = client(serve(api.clone()).await, payer, MockReceiptPolling::new());

        let err = client.analysis(1).await.unwrap_err();
        assert!(matches!(err, Error::Payment(_)));
        assert_eq!(api.requests.load(Ordering::SeqCst), 1);
        assert_eq!(client.state().phase, Phase::Failed);
    }

    #[tokio::test]
    async fn new_call_resets_state() {
        let api = Arc::new(Api {
            fail_with: Some(StatusCode::NOT_FOUND),
            ..Default::default()
        });
        let client = client(
            serve(api).await,
            MockChainWrite::new(),
            MockReceiptPolling::new(),
        );
        client.call("/api/auction/1/analysis").await.unwrap_err();
        assert!(client.state().error.is_some());

        let call = client.call("/api/auction/2/analysis");
        tokio::pin!(call);
        // The first poll resets the state and then waits for the response.
        assert!(futures::poll!(call.as_mut()).is_pending());
        let state = client.state();
        assert_eq!(state.call, 2);
        assert_eq!(state.phase, Phase::Requesting);
        assert!(state.is_loading);
        assert!(state.error.is_none());
        call.await.unwrap_err();
    }

    #[test]
    fn parses_payment_challenge() {
        let challenge: PaymentChallenge = serde_json::from_value(serde_json::json!({
            "payment": {
                "recipient": "0x3333333333333333333333333333333333333333",
                "amount": "0.000001"
            }
        }))
        .unwrap();
        assert_eq!(challenge.payment.recipient, RECIPIENT);
        assert_eq!(
            to_base_units(&challenge.payment.amount, NATIVE_DECIMALS).unwrap(),
            U256::from(1_000_000_000_000u64)
        );
    }
}
