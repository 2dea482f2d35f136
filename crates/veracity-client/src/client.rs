//! The quorum client: ask several nodes, verify every answer, merge.

use std::collections::{HashMap, HashSet};
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::Address;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use veracity_core::{
    apply_validator_states, ChainContext, In3Request, In3Response, ProofDispatcher, RpcRequest,
    RpcResponse, ValidatorList, Verification, VerifyError,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, TransportError};
use crate::merge::{merge_results, Merged};
use crate::nodes::{now_millis, NodeList, NodeRecord, NodeTable, NodeWeight};
use crate::select::{select_nodes, RandomSource, ThreadRandom};
use crate::transport::Transport;

/// Called with the chain id and the new nodes after a verified nodelist
/// has been installed.
pub type NodelistCallback = Arc<dyn Fn(u64, &[NodeRecord]) + Send + Sync>;

struct ChainState {
    nodes: NodeTable,
    ctx: ChainContext,
}

pub struct QuorumClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    random: Arc<dyn RandomSource>,
    dispatcher: ProofDispatcher,
    chains: HashMap<u64, Mutex<ChainState>>,
    on_nodelist: Option<NodelistCallback>,
    next_id: AtomicU64,
}

impl QuorumClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ClientError> {
        config.validate()?;
        let chains = config
            .chains
            .iter()
            .map(|chain| {
                let state = ChainState {
                    nodes: NodeTable::new(chain.nodes.clone()),
                    ctx: ChainContext::new(chain.spec.clone()),
                };
                (chain.spec.chain_id, Mutex::new(state))
            })
            .collect();
        Ok(Self {
            config,
            transport,
            random: Arc::new(ThreadRandom),
            dispatcher: ProofDispatcher::standard(),
            chains,
            on_nodelist: None,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn on_nodelist_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, &[NodeRecord]) + Send + Sync + 'static,
    {
        self.on_nodelist = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn chain(&self, chain_id: u64) -> Result<&Mutex<ChainState>, ClientError> {
        self.chains
            .get(&chain_id)
            .ok_or(ClientError::UnknownChain(chain_id))
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current nodelist snapshot of a chain.
    pub async fn nodes(&self, chain_id: u64) -> Result<Vec<NodeRecord>, ClientError> {
        Ok(self.chain(chain_id)?.lock().await.nodes.nodes().to_vec())
    }

    pub async fn weight(&self, chain_id: u64, address: &Address) -> Result<NodeWeight, ClientError> {
        Ok(self.chain(chain_id)?.lock().await.nodes.weight(address))
    }

    /// The chain's key/value cache including the validator history.
    pub async fn export_cache(&self, chain_id: u64) -> Result<HashMap<String, String>, ClientError> {
        Ok(self.chain(chain_id)?.lock().await.ctx.export_cache())
    }

    pub async fn import_cache(
        &self,
        chain_id: u64,
        entries: HashMap<String, String>,
    ) -> Result<(), ClientError> {
        self.chain(chain_id)?
            .lock()
            .await
            .ctx
            .import_cache(entries)
            .map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Call `method` on the default chain and return its verified result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let request = RpcRequest::new(method, params, self.next_id());
        rpc_result(self.send(request).await?)
    }

    pub async fn send(&self, request: RpcRequest) -> Result<RpcResponse, ClientError> {
        let chain_id = self.chain_of(&request);
        self.send_batch(vec![request])
            .await?
            .pop()
            .ok_or(ClientError::NoNodes { chain_id })
    }

    /// Send a batch for one chain. Each answer is verified or the whole
    /// batch fails with one error.
    pub async fn send_batch(&self, requests: Vec<RpcRequest>) -> Result<Vec<RpcResponse>, ClientError> {
        let chain_id = requests
            .first()
            .map_or(self.config.chain_id, |r| self.chain_of(r));
        let responses = self.execute(chain_id, requests).await?;
        self.follow_announcements(chain_id, &responses).await;
        Ok(responses)
    }

    fn chain_of(&self, request: &RpcRequest) -> u64 {
        request
            .in3
            .as_ref()
            .and_then(|in3| in3.chain_id)
            .unwrap_or(self.config.chain_id)
    }

    fn prepare(&self, request: &mut RpcRequest, chain_id: u64) {
        let in3 = request.in3.get_or_insert_with(|| In3Request {
            verification: self.config.proof,
            include_code: self.config.include_code,
            finality: self.config.finality,
            ..In3Request::default()
        });
        in3.chain_id.get_or_insert(chain_id);
    }

    async fn execute(
        &self,
        chain_id: u64,
        mut requests: Vec<RpcRequest>,
    ) -> Result<Vec<RpcResponse>, ClientError> {
        let state = self.chain(chain_id)?;
        for request in &mut requests {
            self.prepare(request, chain_id);
        }

        let (serving, signers) = {
            let guard = state.lock().await;
            let now = now_millis();
            let serving = select_nodes(
                &self.config,
                chain_id,
                &guard.nodes,
                self.config.request_count,
                &HashSet::new(),
                &*self.random,
                now,
            );
            let wants_signatures = requests
                .iter()
                .any(|r| r.verification() == Verification::ProofWithSignature);
            let signers = if wants_signatures && self.config.signature_count > 0 {
                let excludes = serving.iter().map(|n| n.address).collect();
                select_nodes(
                    &self.config,
                    chain_id,
                    &guard.nodes,
                    self.config.signature_count,
                    &excludes,
                    &*self.random,
                    now,
                )
            } else {
                Vec::new()
            };
            (serving, signers)
        };
        if serving.is_empty() {
            return Err(ClientError::NoNodes { chain_id });
        }
        if !signers.is_empty() {
            let addresses: Vec<Address> = signers.iter().map(|n| n.address).collect();
            for request in &mut requests {
                if let Some(in3) = request
                    .in3
                    .as_mut()
                    .filter(|in3| in3.verification == Verification::ProofWithSignature)
                {
                    in3.signatures = addresses.clone();
                }
            }
        }
        debug!(
            chain_id,
            nodes = serving.len(),
            signers = signers.len(),
            requests = requests.len(),
            "dispatching"
        );

        let tried = Mutex::new(serving.iter().map(|n| n.address).collect::<HashSet<_>>());
        let branches = serving
            .into_iter()
            .map(|node| self.run_branch(chain_id, state, node, &requests, &tried));
        let mut answers = Vec::new();
        let mut first_error = None;
        for outcome in join_all(branches).await {
            match outcome {
                Ok(responses) => answers.push(responses),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if answers.is_empty() {
            return Err(first_error.unwrap_or(ClientError::NoNodes { chain_id }));
        }

        let mut merged = Vec::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            let candidates: Vec<RpcResponse> = answers.iter().map(|a| a[i].clone()).collect();
            match merge_results(request, &candidates) {
                Merged::Agreed(response) => merged.push(response),
                Merged::Conflict { answers: distinct } => {
                    merged.push(self.resolve_conflict(state, request, distinct).await?)
                }
            }
        }
        Ok(merged)
    }

    /// Keep substituting untried nodes until one gives a verified answer
    /// or the pool runs out.
    async fn run_branch(
        &self,
        chain_id: u64,
        state: &Mutex<ChainState>,
        first: NodeRecord,
        requests: &[RpcRequest],
        tried: &Mutex<HashSet<Address>>,
    ) -> Result<Vec<RpcResponse>, ClientError> {
        let mut node = first;
        loop {
            let error = match self.attempt(state, &node, requests).await {
                Ok(responses) => return Ok(responses),
                Err(e @ ClientError::Blacklist { .. }) => return Err(e),
                Err(e) => e,
            };

            let next = {
                let mut tried = tried.lock().await;
                let guard = state.lock().await;
                let next = select_nodes(
                    &self.config,
                    chain_id,
                    &guard.nodes,
                    1,
                    &tried,
                    &*self.random,
                    now_millis(),
                )
                .pop();
                if let Some(n) = &next {
                    tried.insert(n.address);
                }
                next
            };
            match next {
                Some(substitute) => {
                    warn!(
                        chain_id,
                        node = %node.address,
                        substitute = %substitute.address,
                        error = %error,
                        "node failed, substituting"
                    );
                    node = substitute;
                }
                None => {
                    warn!(chain_id, node = %node.address, error = %error, "node failed, pool exhausted");
                    return Err(error);
                }
            }
        }
    }

    /// One round trip to `node` followed by verification of every answer.
    async fn attempt(
        &self,
        state: &Mutex<ChainState>,
        node: &NodeRecord,
        requests: &[RpcRequest],
    ) -> Result<Vec<RpcResponse>, ClientError> {
        let timeout = Duration::from_millis(self.config.timeout);
        let started = Instant::now();
        let sent = tokio::time::timeout(timeout, self.transport.send(&node.url, requests, timeout))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout {
                    url: node.url.clone(),
                    timeout_ms: self.config.timeout,
                })
            });
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut guard = state.lock().await;
        let ChainState { nodes, ctx } = &mut *guard;
        nodes.record(node.address, elapsed, now_millis());
        let responses = align(&node.url, requests, sent?)?;
        for (request, response) in requests.iter().zip(&responses) {
            if let Err(error) = self.dispatcher.verify_proof(request, response, false, ctx) {
                return Err(self.penalize(nodes, ctx.chain_id(), node, error));
            }
        }
        Ok(responses)
    }

    /// Turn a verification failure into the caller's error, blacklisting
    /// whoever it implicates.
    fn penalize(
        &self,
        nodes: &mut NodeTable,
        chain_id: u64,
        node: &NodeRecord,
        error: VerifyError,
    ) -> ClientError {
        let until = now_millis().saturating_add(self.config.blacklist_ttl.saturating_mul(1_000));
        match error {
            e if e.is_blacklist() => {
                let addresses = e.blacklisted_addresses().to_vec();
                for address in &addresses {
                    nodes.blacklist(*address, until);
                }
                warn!(chain_id, nodes = ?addresses, reason = %e, "blacklisting signers");
                ClientError::Blacklist {
                    addresses,
                    reason: e.to_string(),
                }
            }
            VerifyError::ProofMissing { method } => ClientError::ProofMissing { method },
            other => {
                nodes.blacklist(node.address, until);
                warn!(chain_id, node = %node.address, error = %other, "blacklisting node");
                ClientError::Verification {
                    node: node.address,
                    source: other,
                }
            }
        }
    }

    /// Ask the configured authorities, in order, until one gives a
    /// verified answer.
    async fn resolve_conflict(
        &self,
        state: &Mutex<ChainState>,
        request: &RpcRequest,
        answers: usize,
    ) -> Result<RpcResponse, ClientError> {
        let conflict = || ClientError::Conflict {
            method: request.method.clone(),
            answers,
        };
        if self.config.node_authorities.is_empty() {
            return Err(conflict());
        }
        info!(method = %request.method, answers, "conflicting answers, asking an authority");

        let authorities: Vec<NodeRecord> = {
            let guard = state.lock().await;
            let now = now_millis();
            self.config
                .node_authorities
                .iter()
                .filter_map(|a| guard.nodes.find(a))
                .filter(|n| !guard.nodes.weight(&n.address).is_blacklisted(now))
                .cloned()
                .collect()
        };
        for authority in authorities {
            match self.attempt(state, &authority, slice::from_ref(request)).await {
                Ok(mut responses) => {
                    if let Some(response) = responses.pop() {
                        info!(method = %request.method, authority = %authority.address, "authority answer accepted");
                        return Ok(response);
                    }
                }
                Err(e) => warn!(authority = %authority.address, error = %e, "authority failed"),
            }
        }
        Err(conflict())
    }

    /// Refresh the nodelist or validators when an answer announces a newer
    /// registry or validator change than we know. Failures are logged; the
    /// answer itself was already verified.
    async fn follow_announcements(&self, chain_id: u64, responses: &[RpcResponse]) {
        let Ok(state) = self.chain(chain_id) else {
            return;
        };
        let announced = |pick: fn(&In3Response) -> Option<u64>| {
            responses
                .iter()
                .filter_map(|r| r.in3.as_ref().and_then(pick))
                .max()
        };
        let node_list = announced(|in3| in3.last_node_list);
        let validator_change = announced(|in3| in3.last_validator_change);
        let (known_list, known_change) = {
            let guard = state.lock().await;
            (guard.nodes.last_block(), guard.ctx.last_validator_change)
        };

        if node_list.is_some_and(|block| block > known_list) {
            if let Err(e) = self.update_nodelist(chain_id).await {
                warn!(chain_id, error = %e, "nodelist refresh failed");
            }
        }
        if validator_change.is_some_and(|block| block > known_change) {
            if let Err(e) = self.update_validators(chain_id).await {
                warn!(chain_id, error = %e, "validator refresh failed");
            }
        }
    }

    /// Fetch, verify and install the registry's nodelist, then run the
    /// nodelist callback.
    pub async fn update_nodelist(&self, chain_id: u64) -> Result<Vec<NodeRecord>, ClientError> {
        let params = vec![
            json!(self.config.node_limit),
            json!(self.random.seed()),
            json!([]),
        ];
        let mut request = RpcRequest::new("in3_nodeList", params, self.next_id());
        request.in3 = Some(In3Request {
            chain_id: Some(chain_id),
            verification: self.config.proof,
            ..In3Request::default()
        });
        let response = self
            .execute(chain_id, vec![request])
            .await?
            .pop()
            .ok_or(ClientError::NoNodes { chain_id })?;
        let list: NodeList = serde_json::from_value(rpc_result(response)?).map_err(|source| {
            ClientError::InvalidResult {
                method: "in3_nodeList",
                source,
            }
        })?;

        self.chain(chain_id)?
            .lock()
            .await
            .nodes
            .install(list.nodes.clone(), list.last_block_number);
        info!(
            chain_id,
            nodes = list.nodes.len(),
            block = list.last_block_number,
            "nodelist updated"
        );
        if let Some(callback) = &self.on_nodelist {
            callback(chain_id, &list.nodes);
        }
        Ok(list.nodes)
    }

    /// Fetch `in3_validatorList` and apply every change whose transition
    /// proof verifies. Returns the number of changes applied.
    pub async fn update_validators(&self, chain_id: u64) -> Result<usize, ClientError> {
        let mut request = RpcRequest::new("in3_validatorList", vec![], self.next_id());
        request.in3 = Some(In3Request {
            chain_id: Some(chain_id),
            verification: self.config.proof,
            ..In3Request::default()
        });
        let response = self
            .execute(chain_id, vec![request])
            .await?
            .pop()
            .ok_or(ClientError::NoNodes { chain_id })?;
        let list: ValidatorList =
            serde_json::from_value(rpc_result(response)?).map_err(|source| ClientError::InvalidResult {
                method: "in3_validatorList",
                source,
            })?;

        let mut guard = self.chain(chain_id)?.lock().await;
        let applied = apply_validator_states(&mut guard.ctx, &list)?;
        info!(chain_id, applied, "validator list processed");
        Ok(applied)
    }
}

/// Order a node's answers like the requests, matched by id.
fn align(
    url: &str,
    requests: &[RpcRequest],
    mut responses: Vec<RpcResponse>,
) -> Result<Vec<RpcResponse>, TransportError> {
    let mut ordered = Vec::with_capacity(requests.len());
    for request in requests {
        let position = responses
            .iter()
            .position(|r| r.id == request.id)
            .ok_or_else(|| TransportError::InvalidResponse {
                url: url.to_string(),
                reason: format!("no answer for request {}", request.id),
            })?;
        ordered.push(responses.swap_remove(position));
    }
    Ok(ordered)
}

fn rpc_result(response: RpcResponse) -> Result<Value, ClientError> {
    match response.error {
        Some(error) => Err(ClientError::Rpc {
            code: error.code,
            message: error.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}
