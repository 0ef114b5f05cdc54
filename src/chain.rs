//! The chain driver: mines transactions into a pending block, seals blocks
//! into history, and reconstructs the state at any sealed block.
//!
//! A [Chain] owns its whole world and is mutated through `&mut self`, so
//! exclusive access is enforced by the borrow checker; share one across
//! threads through [crate::rpc::ChainHandle], which serializes every
//! request under a single mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::block::{number_hash, tx_hash, Block, Log, Receipt, Transaction};
use crate::common::{Addr, Bytes, Hash, Uint64, Wei, U256};
use crate::filter::Filters;
use crate::scripted::ScriptedVm;
use crate::state::{Account, State};
use crate::vm::{BlockEnv, Evm, Interpreter, VmError, WorldState};

pub const DEFAULT_BLOCK: u64 = 100;
pub const DEFAULT_BLOCK_TIME: u64 = 30;
pub const DEFAULT_GAS_PRICE: u64 = 4_000_000_000; // 4 gwei
pub const DEFAULT_GAS_LIMIT: u64 = 6_000_000;
pub const DEFAULT_DIFFICULTY: u64 = 100;
pub const DEFAULT_CHAIN_ID: u64 = 5;

/// Chain parameters. [Config::default] gives the values test code relies
/// on: initial block 100, 6M gas limit, chain id 5.
#[derive(Clone, Debug)]
pub struct Config {
    pub initial_block: u64,
    pub block_time: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub difficulty: u64,
    pub chain_id: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            initial_block: DEFAULT_BLOCK,
            block_time: DEFAULT_BLOCK_TIME,
            gas_price: DEFAULT_GAS_PRICE,
            gas_limit: DEFAULT_GAS_LIMIT,
            difficulty: DEFAULT_DIFFICULTY,
            chain_id: DEFAULT_CHAIN_ID,
        }
    }
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("unknown block number {0}")]
    UnknownBlock(i64),
    #[error("unknown block hash {0}")]
    UnknownBlockHash(Hash),
    #[error("no such transaction {0}")]
    UnknownTransaction(Hash),
    #[error("receipt {0} not found")]
    UnknownReceipt(Hash),
    #[error("bad filter id {0}")]
    UnknownFilter(u64),
    #[error("cannot filter block range [{0},{1})")]
    BadFilterRange(i64, i64),
    #[error(transparent)]
    Vm(#[from] VmError),
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A model of the state of a blockchain.
#[derive(Clone)]
pub struct Chain {
    state: State,
    block2snap: HashMap<u64, usize>,
    filters: Filters,
    interp: Arc<dyn Interpreter>,
    config: Config,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// A fresh chain with default parameters and the scripted interpreter.
    /// The initial state has no funded accounts and no deployed contracts.
    pub fn new() -> Self {
        Self::with_interpreter(Arc::new(ScriptedVm::new()))
    }

    /// A fresh chain bound to the given interpreter.
    pub fn with_interpreter(interp: Arc<dyn Interpreter>) -> Self {
        Self::with_config(Config::default(), interp)
    }

    pub fn with_config(config: Config, interp: Arc<dyn Interpreter>) -> Self {
        let pending = Block {
            number: Uint64(config.initial_block),
            hash: number_hash(config.initial_block),
            timestamp: Uint64(unix_now()),
            gas_limit: Uint64(config.gas_limit),
            difficulty: Wei::from(config.difficulty),
            ..Default::default()
        };
        Chain {
            state: State::new(pending),
            block2snap: HashMap::new(),
            filters: Filters::default(),
            interp,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The block currently accumulating transactions.
    pub fn pending(&self) -> &Block {
        &self.state.pending
    }

    /// Logs appended so far, in execution order.
    pub fn logs(&self) -> &[Log] {
        self.state.logs()
    }

    pub(crate) fn evm(&mut self, origin: Addr) -> Evm<'_> {
        let b = &self.state.pending;
        let block = BlockEnv {
            coinbase: b.miner.clone(),
            timestamp: b.timestamp.0,
            number: b.number.0,
            difficulty: b.difficulty.clone().into(),
            gas_limit: b.gas_limit.0,
            chain_id: self.config.chain_id,
        };
        Evm::new(&mut self.state, &*self.interp, block, origin)
    }

    /// Creates a new account holding `ether * 10^18` wei at a random
    /// address. With `ether == 0` the account exists but is empty.
    pub fn new_account(&mut self, ether: u64) -> Addr {
        let mut raw = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut raw);
        let addr = Addr::from(raw);
        if ether == 0 {
            self.state.create_account(&addr);
            return addr
        }
        let wei = U256::from(ether) * U256::from(10).pow(18.into());
        let mut acct = Account::default();
        acct.set_balance(&wei);
        self.state.accounts.set_account(&addr, &acct);
        addr
    }

    pub fn add_balance(&mut self, addr: &Addr, v: &U256) {
        self.state.add_balance(addr, v);
    }

    pub fn sub_balance(&mut self, addr: &Addr, v: &U256) {
        self.state.sub_balance(addr, v);
    }

    /// The balance of `addr`, in wei.
    pub fn balance_of(&self, addr: &Addr) -> U256 {
        self.state.get_balance(addr)
    }

    /// Deploys `code` from `sender` against the pending block and returns
    /// the new contract address. `code` is the init bytecode; what it
    /// returns becomes the contract's code.
    pub fn create(
        &mut self, sender: &Addr, code: &[u8],
    ) -> Result<Addr, VmError> {
        let gas = self.config.gas_limit;
        let out = self.evm(sender.clone()).create(
            sender,
            code,
            gas,
            &U256::zero(),
        )?;
        Ok(out.address)
    }

    /// Executes a call from `sender` to `dst` against the pending block.
    /// `input` is pre-encoded calldata.
    pub fn call(
        &mut self, sender: &Addr, dst: &Addr, input: &[u8],
    ) -> Result<Bytes, VmError> {
        let gas = self.config.gas_limit;
        let out =
            self.evm(sender.clone())
                .call(sender, dst, input, gas, &U256::zero())?;
        Ok(out.data.into())
    }

    /// Executes a read-only call against the pending block.
    pub fn static_call(
        &mut self, sender: &Addr, dst: &Addr, input: &[u8],
    ) -> Result<Bytes, VmError> {
        let gas = self.config.gas_limit;
        let out = self.evm(sender.clone()).static_call(sender, dst, input, gas)?;
        Ok(out.data.into())
    }

    /// Sends `value` wei from `sender` to `dst`.
    pub fn send(
        &mut self, sender: &Addr, dst: &Addr, value: &U256,
    ) -> Result<(), VmError> {
        let gas = self.config.gas_limit;
        self.evm(sender.clone()).call(sender, dst, &[], gas, value)?;
        Ok(())
    }

    /// Executes `tx` against the pending block and records it: assigns the
    /// transaction index and synthetic hash, stores the transaction and
    /// its receipt, and appends the hash to the pending block.
    ///
    /// Unlike [Chain::call], the gas budget is the transaction's own `gas`
    /// field, as on a real node. On failure nothing is recorded and any
    /// state the attempt touched, including logs, is already reverted.
    pub fn mine(
        &mut self, mut tx: Transaction,
    ) -> Result<(Bytes, Hash), VmError> {
        let l0 = self.state.logs().len();
        let gas = tx.gas.0;
        let value: U256 = tx.value.clone().into();
        let from = tx.from.clone();
        let to = tx.to.clone();

        let (ret, gas_left, contract) = {
            let mut evm = self.evm(from.clone());
            match &to {
                None => {
                    let out = evm.create(&from, &tx.input, gas, &value)?;
                    (out.data, out.gas_left, Some(out.address))
                }
                Some(dst) => {
                    let out = evm.call(&from, dst, &tx.input, gas, &value)?;
                    (out.data, out.gas_left, None)
                }
            }
        };

        let used = gas - gas_left;
        let b = &mut self.state.pending;
        b.gas_used = Uint64(b.gas_used.0 + used);
        let idx = b.tx_count();
        let hash = tx_hash(b.number.0, idx);
        let block_hash = b.hash.clone();
        let block_number = b.number;
        let cumulative = b.gas_used;
        tx.hash = hash.clone();
        tx.block_hash = block_hash.clone();
        tx.block_number = block_number;
        tx.transaction_index = Some(Uint64(idx as u64));
        b.push_tx(hash.clone());

        for (i, log) in
            self.state.logs_mut()[l0..].iter_mut().enumerate()
        {
            log.transaction_hash = hash.clone();
            log.transaction_index = Uint64(idx as u64);
            log.log_index = Uint64((l0 + i) as u64);
        }

        let rx = Receipt {
            transaction_hash: hash.clone(),
            transaction_index: Uint64(idx as u64),
            block_hash,
            block_number,
            gas_used: Uint64(used),
            cumulative_gas_used: cumulative,
            contract_address: contract,
            logs: self.state.logs()[l0..].to_vec(),
            status: Uint64(1),
        };
        self.state.transactions.insert(
            hash.as_bytes(),
            &serde_json::to_vec(&tx).expect("transaction encodes"),
        );
        self.state.receipts.insert(
            hash.as_bytes(),
            &serde_json::to_vec(&rx).expect("receipt encodes"),
        );
        debug!(block = block_number.0, index = idx, %hash, "mined transaction");
        Ok((ret.into(), hash))
    }

    /// Seals the pending block into history and installs a fresh pending
    /// block with the next number, the sealed block as parent, the same
    /// gas limit, and zeroed difficulty and gas used.
    pub fn seal(&mut self) {
        let snap = self.state.snapshot();
        let number = self.state.pending.number.0;
        self.block2snap.insert(number, snap);

        let sealed_hash = self.state.pending.hash.clone();
        let gas_limit = self.state.pending.gas_limit;
        let buf =
            serde_json::to_vec(&self.state.pending).expect("block encodes");
        self.state.blocks.insert(sealed_hash.as_bytes(), &buf);

        let n = number + 1;
        self.state.pending = Block {
            number: Uint64(n),
            hash: number_hash(n),
            parent_hash: sealed_hash,
            timestamp: Uint64(unix_now()),
            gas_limit,
            ..Default::default()
        };
        debug!(number, "sealed block");
    }

    /// The chain state at a given block number. As special cases, `-1` is
    /// the pending block (the current chain state) and `-2` the latest
    /// block (the state just before the pending block). Returns an
    /// independent chain: mutations on either side never cross. `None` if
    /// no such block has been sealed.
    pub fn at_block(&self, n: i64) -> Option<Chain> {
        let pending = self.state.pending.number.0 as i64;
        let (number, snap) = if n == -1 || n == pending {
            return Some(self.clone())
        } else if n == -2 || n == pending - 1 {
            match self.block2snap.get(&((pending - 1) as u64)) {
                Some(&s) => ((pending - 1) as u64, s),
                // nothing sealed yet: the pending state is all there is
                None => return Some(self.clone()),
            }
        } else if n >= 0 {
            (n as u64, *self.block2snap.get(&(n as u64))?)
        } else {
            return None
        };

        let h = number_hash(number);
        let buf = self.state.blocks.get(h.as_bytes())?;
        let block: Block =
            serde_json::from_slice(buf).expect("stored block decodes");
        let mut state = self.state.at_snapshot(snap);
        state.pending = block;
        Some(Chain {
            state,
            block2snap: self.block2snap.clone(),
            filters: Filters::default(),
            interp: self.interp.clone(),
            config: self.config.clone(),
        })
    }

    /// Installs a log filter and returns its id. `from` and `to` use the
    /// transport encoding (`-1` pending, `-2` latest, `0` earliest);
    /// a numeric range with `from > to` is rejected.
    pub fn new_filter(
        &mut self, from: i64, to: i64, address: Option<Addr>,
        topics: Vec<Option<Hash>>,
    ) -> Result<u64, ChainError> {
        if to >= 0 && from > to {
            return Err(ChainError::BadFilterRange(from, to))
        }
        Ok(self.filters.install(from, to, address, topics))
    }

    /// Every log in the chain's log sequence matching filter `id`.
    pub fn filter_logs(&self, id: u64) -> Result<Vec<Log>, ChainError> {
        let f = self.filters.get(id).ok_or(ChainError::UnknownFilter(id))?;
        Ok(f.all_matches(self.state.logs()))
    }

    /// Matching logs appended since the last `filter_changes` call.
    pub fn filter_changes(&mut self, id: u64) -> Result<Vec<Log>, ChainError> {
        let f = self
            .filters
            .get_mut(id)
            .ok_or(ChainError::UnknownFilter(id))?;
        Ok(f.take_changes(self.state.logs()))
    }

    /// Removes filter `id`; true iff it existed.
    pub fn uninstall_filter(&mut self, id: u64) -> bool {
        self.filters.uninstall(id)
    }
}
