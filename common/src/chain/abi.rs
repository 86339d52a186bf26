//! Entry-function call builders for the contract ABI this system drives.
//! Each builder produces a [`ContractCall`] ready for
//! [`super::ChainClient::execute_transaction_block`].

use serde_json::{json, Value};

/// A single Move entry function invocation: `module::function(args...)`.
#[derive(Debug, Clone)]
pub struct ContractCall {
    pub function: &'static str,
    pub arguments: Value,
}

pub fn stake_and_register_worker(registry: &str, coin: &str, node_id: &str, seal_token: &str) -> ContractCall {
    ContractCall {
        function: "stake_and_register_worker",
        arguments: json!({
            "registry": registry,
            "coin": coin,
            "node_id": node_id,
            "seal_token": seal_token,
        }),
    }
}

pub fn activate_worker(registry: &str, node_id: &str) -> ContractCall {
    ContractCall {
        function: "activate_worker",
        arguments: json!({ "registry": registry, "node_id": node_id }),
    }
}

pub fn set_join_token(registry: &str, node_id: &str, join_token: &str) -> ContractCall {
    ContractCall {
        function: "set_join_token",
        arguments: json!({ "registry": registry, "node_id": node_id, "join_token": join_token }),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn submit_k8s_request(
    scheduler: &str,
    method: &str,
    path: &str,
    namespace: &str,
    resource_type: &str,
    name: Option<&str>,
    payload_b64: &str,
) -> ContractCall {
    ContractCall {
        function: "submit_k8s_request",
        arguments: json!({
            "scheduler": scheduler,
            "method": method,
            "path": path,
            "namespace": namespace,
            "resource_type": resource_type,
            "name": name,
            "payload": payload_b64,
        }),
    }
}

pub fn store_k8s_response(request_id: &str, status_code: u16, body_b64: &str) -> ContractCall {
    ContractCall {
        function: "store_k8s_response",
        arguments: json!({
            "request_id": request_id,
            "status_code": status_code,
            "body": body_b64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_k8s_request_carries_every_field() {
        let call = submit_k8s_request("0xsched", "GET", "/api/v1/pods", "default", "pods", None, "");
        assert_eq!(call.function, "submit_k8s_request");
        assert_eq!(call.arguments["method"], "GET");
        assert_eq!(call.arguments["namespace"], "default");
    }
}
