//! Client configuration.
//!
//! Every struct deserializes from camelCase JSON with defaults for missing
//! fields, so any serde source works. Loading from files is left to the
//! embedding application.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use veracity_core::types::encoding::quantity;
use veracity_core::{ChainSpec, Verification};

use crate::error::ClientError;
use crate::nodes::NodeRecord;

/// Top-level client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Chain used for requests that do not name one.
    #[serde(with = "quantity")]
    pub chain_id: u64,
    /// Nodes asked in parallel for every request.
    pub request_count: usize,
    /// Nodes with a smaller registry deposit are never selected.
    pub min_deposit: U256,
    /// Per-request timeout in milliseconds.
    pub timeout: u64,
    /// Signer nodes asked to sign the block hash under `ProofWithSignature`.
    pub signature_count: usize,
    /// Finality in percent of the validator set required on PoA chains.
    pub finality: Option<u8>,
    pub proof: Verification,
    pub include_code: bool,
    /// Servers requested from `in3_nodeList`; 0 asks for all of them.
    pub node_limit: u64,
    /// Nodes trusted to break ties between conflicting answers.
    pub node_authorities: Vec<Address>,
    /// Seconds a misbehaving node stays excluded from selection.
    pub blacklist_ttl: u64,
    pub chains: Vec<ChainConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            request_count: 1,
            min_deposit: U256::ZERO,
            timeout: 10_000,
            signature_count: 0,
            finality: None,
            proof: Verification::Proof,
            include_code: false,
            node_limit: 0,
            node_authorities: Vec::new(),
            blacklist_ttl: 3_600,
            chains: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.spec.chain_id == chain_id)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.request_count == 0 {
            return Err(ClientError::Config("requestCount must be at least 1".to_string()));
        }
        if self.timeout == 0 {
            return Err(ClientError::Config("timeout must be positive".to_string()));
        }
        if self.chain(self.chain_id).is_none() {
            return Err(ClientError::Config(format!(
                "default chain {} has no chain entry",
                self.chain_id
            )));
        }
        for (i, chain) in self.chains.iter().enumerate() {
            if self.chains[..i].iter().any(|c| c.spec.chain_id == chain.spec.chain_id) {
                return Err(ClientError::Config(format!(
                    "chain {} is configured twice",
                    chain.spec.chain_id
                )));
            }
        }
        Ok(())
    }
}

/// One chain: its verification behaviour plus bootstrap nodes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainConfig {
    #[serde(flatten)]
    pub spec: ChainSpec,
    /// Static nodes used until the first verified nodelist arrives.
    pub nodes: Vec<NodeRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use veracity_core::ConsensusEngine;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: ClientConfig = serde_json::from_value(json!({
            "requestCount": 3,
            "chains": [{
                "chainId": "0x5",
                "engine": "clique",
                "registry": "0x0000000000000000000000000000000000000d0d",
                "nodes": [{
                    "address": "0x00000000000000000000000000000000000000aa",
                    "url": "https://a.example"
                }]
            }],
            "chainId": 5
        }))
        .unwrap();
        assert_eq!(config.request_count, 3);
        assert_eq!(config.timeout, 10_000);
        assert_eq!(config.proof, Verification::Proof);

        let chain = config.chain(5).unwrap();
        assert_eq!(chain.spec.engine, ConsensusEngine::Clique);
        assert!(chain.spec.registry.is_some());
        assert_eq!(chain.nodes.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = ClientConfig {
            chains: vec![ChainConfig::default()],
            ..ClientConfig::default()
        };
        assert!(config.validate().is_ok());

        config.request_count = 0;
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
        config.request_count = 1;

        config.chain_id = 99;
        assert!(config.validate().is_err());
        config.chain_id = 1;

        config.chains.push(ChainConfig::default());
        assert!(config.validate().is_err());
    }
}
