pub mod alloy;
pub mod confirmations;

pub type AlloyProvider = ::alloy::providers::DynProvider;
