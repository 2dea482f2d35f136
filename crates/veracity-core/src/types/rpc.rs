use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How much proof a caller wants attached to an answer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verification {
    /// Take the answer as-is.
    Never,
    /// Merkle proof against a header whose hash is recomputed locally.
    #[default]
    Proof,
    /// As `Proof`, plus block-hash signatures from additional nodes.
    ProofWithSignature,
}

/// The `in3` extension carried on a request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct In3Request {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::types::encoding::quantity::opt"
    )]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub verification: Verification,
    /// Nodes that must sign the block hash of the answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Address>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_code: bool,
    /// Blocks behind head the server should use for `latest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_block: Option<u64>,
    /// Requested finality in percent of the validator set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finality: Option<u8>,
}

/// A JSON-RPC 2.0 request, optionally carrying the `in3` extension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in3: Option<In3Request>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
            in3: None,
        }
    }

    /// Verification level requested, `Proof` when no extension is present.
    pub fn verification(&self) -> Verification {
        self.in3
            .as_ref()
            .map(|in3| in3.verification)
            .unwrap_or_default()
    }

    /// Block-hash signers requested for this call.
    pub fn signers(&self) -> &[Address] {
        self.in3
            .as_ref()
            .map(|in3| in3.signatures.as_slice())
            .unwrap_or(&[])
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }
}

/// The `in3` extension carried on a response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct In3Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Value>,
    /// Block at which the server's registry last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_node_list: Option<u64>,
    /// Block of the last validator-set change the server knows about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validator_change: Option<u64>,
}

/// A JSON-RPC 2.0 response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in3: Option<In3Response>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
            in3: None,
        }
    }

    pub fn with_proof(mut self, proof: Value) -> Self {
        self.in3.get_or_insert_with(In3Response::default).proof = Some(proof);
        self
    }

    /// The raw proof object, if the server attached one.
    pub fn proof(&self) -> Option<&Value> {
        self.in3.as_ref().and_then(|in3| in3.proof.as_ref())
    }

    /// The result, with JSON `null` for a missing one.
    pub fn result_or_null(&self) -> &Value {
        self.result.as_ref().unwrap_or(&Value::Null)
    }
}

/// A JSON-RPC error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_extension_roundtrip() {
        let raw = json!({
            "jsonrpc": "2.0",
            "method": "eth_getBalance",
            "params": ["0x0000000000000000000000000000000000000001", "latest"],
            "id": 7,
            "in3": {
                "chainId": "0x1",
                "verification": "proofWithSignature",
                "signatures": ["0x00000000000000000000000000000000000000aa"],
                "includeCode": true
            }
        });
        let request: RpcRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.verification(), Verification::ProofWithSignature);
        assert_eq!(request.signers().len(), 1);
        let in3 = request.in3.as_ref().unwrap();
        assert_eq!(in3.chain_id, Some(1));
        assert!(in3.include_code);

        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back["in3"]["chainId"], json!("0x1"));
    }

    #[test]
    fn test_default_verification_is_proof() {
        let request = RpcRequest::new("eth_blockNumber", vec![], 1);
        assert_eq!(request.verification(), Verification::Proof);
    }

    #[test]
    fn test_response_proof_accessor() {
        let response = RpcResponse::success(1, json!("0x1")).with_proof(json!({"type": "blockProof"}));
        assert_eq!(response.proof().unwrap()["type"], "blockProof");
        let raw: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert!(raw.proof().is_none());
        assert!(raw.result_or_null().is_null());
    }
}
