use alloy::primitives::Address;

/// Who is talking to which contract on which network. Passed to every
/// component that touches the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Session {
    pub chain_id: u64,
    /// Account signing transactions. Read-only sessions have none.
    pub wallet: Option<Address>,
    pub contract: Address,
}

impl Session {
    pub fn can_sign(&self) -> bool {
        self.wallet.is_some()
    }
}
