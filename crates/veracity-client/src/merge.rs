//! Reconciling the answers of several nodes to one request.

use veracity_core::types::encoding::parse_quantity;
use veracity_core::{RpcRequest, RpcResponse};

#[derive(Clone, Debug, PartialEq)]
pub enum Merged {
    Agreed(RpcResponse),
    /// The nodes gave this many different answers.
    Conflict { answers: usize },
}

/// Canonical form of the part of a response nodes must agree on. Object
/// keys serialize sorted, so equal JSON compares equal.
fn canonical(response: &RpcResponse) -> String {
    let result = response.result_or_null().to_string();
    match &response.error {
        Some(error) => format!("{result}|{}|{}", error.code, error.message),
        None => result,
    }
}

/// Merge the answers to `request`, one per node.
///
/// A single answer is taken as is and `eth_blockNumber` takes the highest
/// block. Otherwise all answers must agree.
pub fn merge_results(request: &RpcRequest, responses: &[RpcResponse]) -> Merged {
    if let [single] = responses {
        return Merged::Agreed(single.clone());
    }

    if request.method == "eth_blockNumber" {
        let highest = responses
            .iter()
            .filter_map(|r| r.result.as_ref().and_then(parse_quantity).map(|n| (n, r)))
            .max_by_key(|(n, _)| *n);
        if let Some((_, response)) = highest {
            return Merged::Agreed(response.clone());
        }
    }

    let mut groups: Vec<(String, &RpcResponse)> = Vec::new();
    for response in responses {
        let key = canonical(response);
        if !groups.iter().any(|(k, _)| *k == key) {
            groups.push((key, response));
        }
    }
    match groups.as_slice() {
        [(_, agreed)] => Merged::Agreed((*agreed).clone()),
        _ => Merged::Conflict {
            answers: groups.len(),
        },
    }
}
