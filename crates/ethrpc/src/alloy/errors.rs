use alloy::{
    contract::Error as ContractError,
    sol_types::{Revert, SolError, decode_revert_reason},
    transports::RpcError,
};

pub trait ContractErrorExt {
    /// Returns whether a given error is a contract error, this is considered to
    /// be all errors except the transport error where there is no revert data.
    fn is_contract_error(&self) -> bool;

    /// Returns whether a given error is a node error.
    fn is_node_error(&self) -> bool;

    /// Human readable reason of a reverted call, if the node reported one.
    ///
    /// Prefers the decoded `Error(string)` payload and falls back to the
    /// message of the RPC error response.
    fn revert_reason(&self) -> Option<String>;
}

impl ContractErrorExt for ContractError {
    fn is_contract_error(&self) -> bool {
        !self.is_node_error()
    }

    fn is_node_error(&self) -> bool {
        // In alloy some contract errors are "hidden" inside transport errors, as
        // such we need to check if transport errors have revert data to rule out
        // contract errors.
        match self {
            ContractError::TransportError(RpcError::ErrorResp(err)) => {
                let no_revert_data = err.as_revert_data().is_none();
                tracing::debug!(?err, %no_revert_data, "transport rpc error");
                no_revert_data
            }
            ContractError::TransportError(_) => true,
            _ => false,
        }
    }

    fn revert_reason(&self) -> Option<String> {
        match self {
            ContractError::TransportError(RpcError::ErrorResp(err)) => err
                .as_revert_data()
                .and_then(|data| {
                    Revert::abi_decode(&data)
                        .map(|revert| revert.reason)
                        .ok()
                        .or_else(|| decode_revert_reason(&data))
                })
                .or_else(|| Some(err.message.to_string())),
            _ => None,
        }
    }
}
