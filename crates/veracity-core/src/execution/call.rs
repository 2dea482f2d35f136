//! Re-execution of `eth_call` against proven state only.
//!
//! The EVM reads state through [`ProofDb`], which answers from the verified
//! account proofs and fails with [`MissingData`] on anything else, so a
//! result can never depend on state the server did not disclose.
//!
//! The caller and the coinbase are loaded by the EVM itself before and
//! after execution, so they may be absent from the proof. They then stand
//! in as empty accounts for that bookkeeping only: [`PlaceholderGuard`]
//! aborts the call as soon as an opcode reads one of them.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, Bytes, B256, U256};
use revm::primitives::{
    AccountInfo, BlockEnv, Bytecode, CfgEnv, CfgEnvWithHandlerCfg, EVMError, EnvWithHandlerCfg,
    ExecutionResult, HaltReason, InvalidTransaction, ResultAndState, SpecId, TxEnv, TxKind,
};
use revm::interpreter::{opcode, InstructionResult, Interpreter};
use revm::{inspector_handle_register, Database, Evm, EvmContext, Inspector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::consensus::header::BlockHeader;
use crate::execution::account::VerifiedAccount;
use crate::types::encoding::quantity;
use crate::types::execution::AccountState;

/// Highest precompile address; precompiles may be touched without proof.
const LAST_PRECOMPILE: u8 = 0x11;

/// State the call needed but the proof did not contain.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MissingData {
    #[error("missing data: account {0}")]
    Account(Address),

    #[error("missing data: code with hash {0}")]
    Code(B256),

    #[error("missing data: storage slot {slot} of {address}")]
    Storage { address: Address, slot: U256 },

    #[error("missing data: hash of block {0}")]
    BlockHash(u64),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    MissingData(#[from] MissingData),

    #[error("Call reverted with {0}")]
    Reverted(Bytes),

    #[error("Call halted: {0:?}")]
    Halted(HaltReason),

    #[error("Invalid call transaction: {0}")]
    InvalidTransaction(InvalidTransaction),

    #[error("EVM error: {0}")]
    Evm(String),
}

/// The call object of an `eth_call` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, with = "quantity::opt", skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

/// An account as proven, with the storage slots its proof covered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvedAccount {
    pub info: AccountState,
    pub code: Option<Bytes>,
    pub storage: HashMap<U256, U256>,
}

/// Everything the executor is allowed to read.
#[derive(Clone, Debug, Default)]
pub struct ProofState {
    accounts: HashMap<Address, ProvedAccount>,
    codes: HashMap<B256, Bytes>,
    block_hashes: HashMap<u64, B256>,
}

impl ProofState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_verified<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = VerifiedAccount>,
    {
        let mut state = Self::new();
        for verified in accounts {
            state.insert(
                verified.address,
                ProvedAccount {
                    info: verified.account,
                    code: verified.code,
                    storage: verified.storage.into_iter().collect(),
                },
            );
        }
        state
    }

    pub fn insert(&mut self, address: Address, account: ProvedAccount) {
        if let Some(code) = &account.code {
            self.codes.insert(account.info.code_hash, code.clone());
        }
        self.accounts.insert(address, account);
    }

    /// Code whose hash was proven elsewhere, e.g. from the code cache.
    pub fn add_code(&mut self, code_hash: B256, code: Bytes) {
        self.codes.insert(code_hash, code);
    }

    pub fn add_block_hash(&mut self, number: u64, hash: B256) {
        self.block_hashes.insert(number, hash);
    }

    pub fn account(&self, address: &Address) -> Option<&ProvedAccount> {
        self.accounts.get(address)
    }

    pub fn code(&self, code_hash: &B256) -> Option<&Bytes> {
        self.codes.get(code_hash)
    }
}

/// [`Database`] over a [`ProofState`]. Reads of unproven state fail.
#[derive(Debug)]
pub struct ProofDb {
    state: ProofState,
    /// Accounts that may be read without proof and read as empty.
    exempt: HashSet<Address>,
}

impl ProofDb {
    pub fn new(state: ProofState, exempt: impl IntoIterator<Item = Address>) -> Self {
        let mut exempt: HashSet<Address> = exempt.into_iter().collect();
        exempt.extend((1..=LAST_PRECOMPILE).map(Address::with_last_byte));
        Self { state, exempt }
    }

    /// Exempt accounts the proof does not cover, precompiles aside.
    pub fn placeholders(&self) -> HashSet<Address> {
        self.exempt
            .iter()
            .filter(|a| !is_precompile(a) && !self.state.accounts.contains_key(*a))
            .copied()
            .collect()
    }

    fn account(&self, address: Address) -> Result<Option<&ProvedAccount>, MissingData> {
        match self.state.accounts.get(&address) {
            Some(account) => Ok(Some(account)),
            None if self.exempt.contains(&address) => Ok(None),
            None => Err(MissingData::Account(address)),
        }
    }
}

impl Database for ProofDb {
    type Error = MissingData;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        trace!(%address, "account read");
        let Some(account) = self.account(address)? else {
            return Ok(None);
        };
        if account.info.is_empty() {
            return Ok(None);
        }
        let code = self
            .state
            .codes
            .get(&account.info.code_hash)
            .map(|code| Bytecode::new_raw(code.clone()));
        Ok(Some(AccountInfo {
            balance: account.info.balance,
            nonce: account.info.nonce,
            code_hash: account.info.code_hash,
            code,
        }))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == AccountState::EMPTY_CODE_HASH {
            return Ok(Bytecode::new());
        }
        self.state
            .codes
            .get(&code_hash)
            .map(|code| Bytecode::new_raw(code.clone()))
            .ok_or(MissingData::Code(code_hash))
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        trace!(%address, slot = %index, "storage read");
        match self.account(address)? {
            // Exempt and absent from the proof: empty account, empty storage
            None => Ok(U256::ZERO),
            Some(account) => account
                .storage
                .get(&index)
                .copied()
                .ok_or(MissingData::Storage {
                    address,
                    slot: index,
                }),
        }
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        self.state
            .block_hashes
            .get(&number)
            .copied()
            .ok_or(MissingData::BlockHash(number))
    }
}

fn is_precompile(address: &Address) -> bool {
    address[..19].iter().all(|b| *b == 0) && (1..=LAST_PRECOMPILE).contains(&address[19])
}

/// Stack position of the account operand of opcodes that read another
/// account's balance or code.
fn account_operand(op: u8) -> Option<usize> {
    match op {
        opcode::BALANCE | opcode::EXTCODESIZE | opcode::EXTCODECOPY | opcode::EXTCODEHASH => Some(0),
        opcode::CALL | opcode::CALLCODE | opcode::DELEGATECALL | opcode::STATICCALL => Some(1),
        _ => None,
    }
}

/// Halts execution when an opcode touches an account that is only a
/// placeholder in [`ProofDb`].
#[derive(Debug, Default)]
pub struct PlaceholderGuard {
    placeholders: HashSet<Address>,
    missing: Option<MissingData>,
}

impl PlaceholderGuard {
    pub fn new(placeholders: HashSet<Address>) -> Self {
        Self {
            placeholders,
            missing: None,
        }
    }

    /// The first placeholder read, if any.
    pub fn into_missing(self) -> Option<MissingData> {
        self.missing
    }
}

impl<DB: Database> Inspector<DB> for PlaceholderGuard {
    fn step(&mut self, interp: &mut Interpreter, _context: &mut EvmContext<DB>) {
        if self.placeholders.is_empty() {
            return;
        }
        let Some(position) = account_operand(interp.current_opcode()) else {
            return;
        };
        let Ok(word) = interp.stack().peek(position) else {
            return;
        };
        let address = Address::from_word(B256::from(word.to_be_bytes::<32>()));
        if self.placeholders.contains(&address) {
            trace!(%address, op = interp.current_opcode(), "opcode read an unproven account");
            self.missing.get_or_insert(MissingData::Account(address));
            interp.instruction_result = InstructionResult::Revert;
        }
    }
}

/// Hardfork rules implied by the header's trailing fields.
fn spec_for(header: &BlockHeader) -> SpecId {
    match header.trailing_fields() {
        0 => SpecId::ISTANBUL,
        1 => SpecId::LONDON,
        2 | 3 => SpecId::SHANGHAI,
        _ => SpecId::CANCUN,
    }
}

fn block_env(header: &BlockHeader, spec: SpecId) -> BlockEnv {
    let mut block = BlockEnv::default();
    block.number = U256::from(header.number());
    block.coinbase = header.coinbase();
    block.timestamp = U256::from(header.timestamp());
    block.gas_limit = U256::from(header.gas_limit());
    block.difficulty = header.difficulty();
    // Calls run without fees
    block.basefee = U256::ZERO;
    if SpecId::enabled(spec, SpecId::MERGE) {
        if let Some(mix) = header.mix_hash() {
            block.prevrandao = Some(mix);
        }
    }
    block
}

fn tx_env(call: &CallRequest, gas_limit: u64, chain_id: u64) -> TxEnv {
    let mut tx = TxEnv::default();
    tx.caller = call.from.unwrap_or_default();
    tx.gas_limit = call.gas.map_or(gas_limit, |gas| gas.min(gas_limit));
    tx.gas_price = U256::ZERO;
    tx.transact_to = call.to.map_or(TxKind::Create, TxKind::Call);
    tx.value = call.value.unwrap_or_default();
    tx.data = call.data.clone().unwrap_or_default();
    tx.nonce = None;
    tx.chain_id = Some(chain_id);
    tx
}

/// Execute `call` on top of `header` using only `state`, returning the
/// output bytes.
pub fn execute_call(
    mut state: ProofState,
    call: &CallRequest,
    header: &BlockHeader,
    chain_id: u64,
) -> Result<Bytes, CallError> {
    let number = header.number();
    if number > 0 {
        state.add_block_hash(number - 1, header.parent_hash());
    }
    let caller = call.from.unwrap_or_default();
    // A value transfer depends on the caller's balance
    if call.value.is_some_and(|v| !v.is_zero()) && state.account(&caller).is_none() {
        return Err(MissingData::Account(caller).into());
    }
    let db = ProofDb::new(state, [caller, header.coinbase()]);
    let mut guard = PlaceholderGuard::new(db.placeholders());

    let spec = spec_for(header);
    let mut cfg = CfgEnv::default();
    cfg.chain_id = chain_id;
    let env = EnvWithHandlerCfg::new_with_cfg_env(
        CfgEnvWithHandlerCfg::new_with_spec_id(cfg, spec),
        block_env(header, spec),
        tx_env(call, header.gas_limit(), chain_id),
    );

    let outcome = {
        let mut evm = Evm::builder()
            .with_db(db)
            .with_external_context(&mut guard)
            .with_env_with_handler_cfg(env)
            .append_handler_register(inspector_handle_register)
            .build();
        evm.transact()
    };
    // A placeholder read outranks whatever the aborted frame produced
    if let Some(missing) = guard.into_missing() {
        return Err(missing.into());
    }
    let ResultAndState { result, .. } = outcome.map_err(|e| match e {
        EVMError::Database(missing) => CallError::MissingData(missing),
        EVMError::Transaction(invalid) => CallError::InvalidTransaction(invalid),
        other => CallError::Evm(other.to_string()),
    })?;

    match result {
        ExecutionResult::Success {
            output, gas_used, ..
        } => {
            debug!(block = number, gas_used, ?spec, "call re-executed");
            Ok(output.into_data())
        }
        ExecutionResult::Revert { output, .. } => Err(CallError::Reverted(output)),
        ExecutionResult::Halt { reason, .. } => Err(CallError::Halted(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::proof::keccak256;
    use crate::testutil::header_fields;
    use hex_literal::hex;

    // SLOAD(0), return it as one word
    const RETURN_SLOT_0: [u8; 11] = hex!("60005460005260206000f3");
    // SLOAD(1), return it as one word
    const RETURN_SLOT_1: [u8; 11] = hex!("60015460005260206000f3");
    // BLOCKHASH(NUMBER - 1), return it
    const RETURN_PARENT_HASH: [u8; 13] = hex!("600143034060005260206000f3");
    // BALANCE(CALLER), return it
    const RETURN_CALLER_BALANCE: [u8; 10] = hex!("333160005260206000f3");
    // BALANCE(COINBASE), return it
    const RETURN_COINBASE_BALANCE: [u8; 10] = hex!("413160005260206000f3");
    // STATICCALL(gas, CALLER, 0, 0, 0, 0), return the success flag
    const STATICCALL_CALLER: [u8; 21] = hex!("60006000600060003361fffffa60005260206000f3");

    fn contract(code: &[u8], storage: &[(u64, u64)]) -> ProvedAccount {
        let code = Bytes::copy_from_slice(code);
        ProvedAccount {
            info: AccountState {
                nonce: 1,
                balance: U256::ZERO,
                storage_root: B256::repeat_byte(0x55),
                code_hash: keccak256(&code),
            },
            code: Some(code),
            storage: storage
                .iter()
                .map(|(k, v)| (U256::from(*k), U256::from(*v)))
                .collect(),
        }
    }

    fn header(trailing: usize) -> BlockHeader {
        BlockHeader::from_fields(header_fields(100, trailing)).unwrap()
    }

    fn call_to(to: Address) -> CallRequest {
        CallRequest {
            from: Some(Address::repeat_byte(0xf0)),
            to: Some(to),
            ..CallRequest::default()
        }
    }

    #[test]
    fn test_returns_proven_storage() {
        let target = Address::repeat_byte(0x42);
        let mut state = ProofState::new();
        state.insert(target, contract(&RETURN_SLOT_0, &[(0, 42)]));

        for trailing in [0, 1, 2, 4] {
            let output = execute_call(state.clone(), &call_to(target), &header(trailing), 1).unwrap();
            assert_eq!(U256::from_be_slice(&output), U256::from(42), "trailing {trailing}");
        }
    }

    #[test]
    fn test_unproven_slot_is_missing_data() {
        let target = Address::repeat_byte(0x42);
        let mut state = ProofState::new();
        state.insert(target, contract(&RETURN_SLOT_1, &[(0, 42)]));
        assert!(matches!(
            execute_call(state, &call_to(target), &header(1), 1),
            Err(CallError::MissingData(MissingData::Storage { slot, .. })) if slot == U256::from(1)
        ));
    }

    #[test]
    fn test_unproven_target_is_missing_data() {
        let target = Address::repeat_byte(0x42);
        assert!(matches!(
            execute_call(ProofState::new(), &call_to(target), &header(1), 1),
            Err(CallError::MissingData(MissingData::Account(a))) if a == target
        ));
    }

    #[test]
    fn test_code_without_bytes_is_missing() {
        let target = Address::repeat_byte(0x42);
        let mut account = contract(&RETURN_SLOT_0, &[(0, 1)]);
        let code_hash = account.info.code_hash;
        account.code = None;
        let mut state = ProofState::new();
        state.insert(target, account);
        assert!(matches!(
            execute_call(state.clone(), &call_to(target), &header(1), 1),
            Err(CallError::MissingData(MissingData::Code(h))) if h == code_hash
        ));

        // Cached code fills the gap
        state.add_code(code_hash, Bytes::copy_from_slice(&RETURN_SLOT_0));
        assert!(execute_call(state, &call_to(target), &header(1), 1).is_ok());
    }

    #[test]
    fn test_parent_hash_is_known() {
        let target = Address::repeat_byte(0x42);
        let mut state = ProofState::new();
        state.insert(target, contract(&RETURN_PARENT_HASH, &[]));
        let header = header(1);
        let output = execute_call(state, &call_to(target), &header, 1).unwrap();
        assert_eq!(B256::from_slice(&output), header.parent_hash());
    }

    #[test]
    fn test_unproven_caller_balance_is_missing_data() {
        let target = Address::repeat_byte(0x42);
        let caller = Address::repeat_byte(0xf0);
        let mut state = ProofState::new();
        state.insert(target, contract(&RETURN_CALLER_BALANCE, &[]));
        assert!(matches!(
            execute_call(state.clone(), &call_to(target), &header(1), 1),
            Err(CallError::MissingData(MissingData::Account(a))) if a == caller
        ));

        // Once proven, the balance is read as usual
        state.insert(
            caller,
            ProvedAccount {
                info: AccountState {
                    nonce: 3,
                    balance: U256::from(7),
                    storage_root: AccountState::EMPTY_STORAGE_ROOT,
                    code_hash: AccountState::EMPTY_CODE_HASH,
                },
                code: None,
                storage: HashMap::new(),
            },
        );
        let output = execute_call(state, &call_to(target), &header(1), 1).unwrap();
        assert_eq!(U256::from_be_slice(&output), U256::from(7));
    }

    #[test]
    fn test_unproven_coinbase_balance_is_missing_data() {
        let target = Address::repeat_byte(0x42);
        let mut state = ProofState::new();
        state.insert(target, contract(&RETURN_COINBASE_BALANCE, &[]));
        for trailing in [0, 2] {
            let header = header(trailing);
            assert!(matches!(
                execute_call(state.clone(), &call_to(target), &header, 1),
                Err(CallError::MissingData(MissingData::Account(a))) if a == header.coinbase()
            ));
        }
    }

    #[test]
    fn test_call_into_unproven_caller_is_missing_data() {
        let target = Address::repeat_byte(0x42);
        let mut state = ProofState::new();
        state.insert(target, contract(&STATICCALL_CALLER, &[]));
        assert!(matches!(
            execute_call(state, &call_to(target), &header(1), 1),
            Err(CallError::MissingData(MissingData::Account(a))) if a == Address::repeat_byte(0xf0)
        ));
    }

    #[test]
    fn test_value_from_unproven_caller_is_missing_data() {
        let target = Address::repeat_byte(0x42);
        let mut state = ProofState::new();
        state.insert(target, contract(&RETURN_SLOT_0, &[(0, 1)]));
        let call = CallRequest {
            value: Some(U256::from(1)),
            ..call_to(target)
        };
        assert!(matches!(
            execute_call(state, &call, &header(1), 1),
            Err(CallError::MissingData(MissingData::Account(a))) if a == Address::repeat_byte(0xf0)
        ));
    }

    #[test]
    fn test_call_request_accepts_input_alias() {
        let call: CallRequest = serde_json::from_value(serde_json::json!({
            "to": "0x4242424242424242424242424242424242424242",
            "input": "0x1234",
            "gas": "0x5208",
        }))
        .unwrap();
        assert_eq!(call.data, Some(Bytes::from(vec![0x12, 0x34])));
        assert_eq!(call.gas, Some(21_000));
    }
}
