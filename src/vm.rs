//! The execution seam between the chain and an EVM interpreter.
//!
//! The bytecode interpreter itself is an external collaborator: anything
//! that implements [Interpreter] can run contract frames. What lives here
//! is the surrounding call model the interpreter is driven through:
//!
//! - [WorldState] is the capability set the interpreter reads and writes
//!   state through (accounts, code, storage, logs, refund, snapshots).
//! - [Evm] implements message calls, static calls, and contract creation
//!   on top of a [WorldState]: balance checks, value transfer, contract
//!   address derivation, and snapshot/revert around each frame.
//!
//! [crate::scripted::ScriptedVm] is the batteries-included interpreter for
//! test use; a real interpreter plugs in through the same trait.

use thiserror::Error;

use crate::block::{number_hash, Log};
use crate::common::{create_addr, Addr, Hash, Uint64, U256};

/// Mutable world-state capability set presented to the interpreter.
///
/// Semantics the implementation guarantees:
///
/// - `empty` holds iff the account does not exist or has zero nonce, zero
///   balance, and zero-length code.
/// - `suicide` sets a flag without deleting the account or touching its
///   balance; `has_suicided` reads the flag back.
/// - `set_nonce` on a non-existent account is a precondition violation and
///   panics; `sub_balance`/`add_balance` treat a missing account as zero.
/// - `set_state` with the zero word deletes the storage entry.
/// - `get_code_hash` is `keccak256(get_code(addr))`, computed on demand.
/// - `revert_to_snapshot(v)` restores the state captured by snapshot `v`
///   and invalidates every snapshot above it; rolling forward panics.
pub trait WorldState {
    fn create_account(&mut self, addr: &Addr);
    fn sub_balance(&mut self, addr: &Addr, v: &U256);
    fn add_balance(&mut self, addr: &Addr, v: &U256);
    fn get_balance(&self, addr: &Addr) -> U256;
    fn get_nonce(&self, addr: &Addr) -> u64;
    fn set_nonce(&mut self, addr: &Addr, nonce: u64);
    fn get_code_hash(&self, addr: &Addr) -> Hash;
    fn get_code(&self, addr: &Addr) -> Vec<u8>;
    fn set_code(&mut self, addr: &Addr, code: &[u8]);
    fn get_code_size(&self, addr: &Addr) -> usize;
    fn add_refund(&mut self, v: &U256);
    fn get_refund(&self) -> U256;
    fn get_state(&self, addr: &Addr, key: &Hash) -> Hash;
    fn set_state(&mut self, addr: &Addr, key: &Hash, value: &Hash);
    fn exist(&self, addr: &Addr) -> bool;
    fn empty(&self, addr: &Addr) -> bool;
    fn suicide(&mut self, addr: &Addr) -> bool;
    fn has_suicided(&self, addr: &Addr) -> bool;
    fn add_log(&mut self, log: Log);
    fn add_preimage(&mut self, hash: &Hash, preimage: &[u8]);
    fn snapshot(&mut self) -> usize;
    fn revert_to_snapshot(&mut self, snap: usize);
}

/// Block-level context a frame executes in.
#[derive(Clone, Debug)]
pub struct BlockEnv {
    pub coinbase: Addr,
    pub timestamp: u64,
    pub number: u64,
    pub difficulty: U256,
    pub gas_limit: u64,
    pub chain_id: u64,
}

/// One message frame handed to the interpreter.
#[derive(Clone, Debug)]
pub struct Frame {
    pub caller: Addr,
    pub address: Addr,
    pub code: Vec<u8>,
    pub input: Vec<u8>,
    pub gas: u64,
    pub value: U256,
    pub is_create: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOutput {
    pub data: Vec<u8>,
    pub gas_left: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateOutput {
    pub address: Addr,
    pub data: Vec<u8>,
    pub gas_left: u64,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum VmError {
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    #[error("out of gas")]
    OutOfGas,
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("write protection")]
    WriteProtection,
    #[error("invalid opcode")]
    InvalidOpcode,
    #[error("max call depth exceeded")]
    Depth,
}

/// A bytecode interpreter. Given a frame, runs its code against the world
/// state reachable through `evm` and returns the output and remaining gas.
/// Nested calls, logs, and storage access go back through [Evm] methods.
pub trait Interpreter: Send + Sync {
    fn run(&self, evm: &mut Evm<'_>, frame: &Frame)
        -> Result<CallOutput, VmError>;
}

const MAX_CALL_DEPTH: usize = 1024;

/// Message-call driver bound to one world-state view and one block context.
pub struct Evm<'a> {
    state: &'a mut dyn WorldState,
    interp: &'a dyn Interpreter,
    block: BlockEnv,
    origin: Addr,
    read_only: bool,
    depth: usize,
}

impl<'a> Evm<'a> {
    pub fn new(
        state: &'a mut dyn WorldState, interp: &'a dyn Interpreter,
        block: BlockEnv, origin: Addr,
    ) -> Self {
        Self {
            state,
            interp,
            block,
            origin,
            read_only: false,
            depth: 0,
        }
    }

    /// The world state this frame executes against.
    pub fn world(&mut self) -> &mut dyn WorldState {
        &mut *self.state
    }

    pub fn block(&self) -> &BlockEnv {
        &self.block
    }

    pub fn origin(&self) -> &Addr {
        &self.origin
    }

    /// True inside a static frame, where state writes are forbidden.
    pub fn is_static(&self) -> bool {
        self.read_only
    }

    /// Canonical hash of block `n` (the synthetic derivation, see
    /// [number_hash]).
    pub fn block_hash(&self, n: u64) -> Hash {
        number_hash(n)
    }

    /// Appends a log for the current block. Fails inside static frames.
    pub fn emit_log(
        &mut self, address: &Addr, topics: Vec<Hash>, data: Vec<u8>,
    ) -> Result<(), VmError> {
        if self.read_only {
            return Err(VmError::WriteProtection)
        }
        let log = Log {
            address: address.clone(),
            topics,
            data: data.into(),
            block_hash: number_hash(self.block.number),
            block_number: Uint64(self.block.number),
            ..Default::default()
        };
        self.state.add_log(log);
        Ok(())
    }

    fn can_transfer(&self, from: &Addr, value: &U256) -> bool {
        self.state.get_balance(from) >= *value
    }

    fn transfer(&mut self, from: &Addr, to: &Addr, value: &U256) {
        if value.is_zero() {
            return
        }
        self.state.sub_balance(from, value);
        self.state.add_balance(to, value);
    }

    /// Executes a message call from `caller` to `to`. On any failure the
    /// state, including appended logs, is restored to the frame snapshot.
    pub fn call(
        &mut self, caller: &Addr, to: &Addr, input: &[u8], gas: u64,
        value: &U256,
    ) -> Result<CallOutput, VmError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::Depth)
        }
        if !self.can_transfer(caller, value) {
            return Err(VmError::InsufficientBalance)
        }
        let snap = self.state.snapshot();
        if !self.state.exist(to) {
            // a zero-value call to a non-existent account leaves no trace
            if value.is_zero() {
                return Ok(CallOutput {
                    data: Vec::new(),
                    gas_left: gas,
                })
            }
            self.state.create_account(to);
        }
        self.transfer(caller, to, value);
        let code = self.state.get_code(to);
        if code.is_empty() {
            return Ok(CallOutput {
                data: Vec::new(),
                gas_left: gas,
            })
        }
        let frame = Frame {
            caller: caller.clone(),
            address: to.clone(),
            code,
            input: input.to_vec(),
            gas,
            value: *value,
            is_create: false,
        };
        self.run_frame(&frame, snap)
    }

    /// Executes a read-only call: no value transfer, and writes through
    /// [Evm::emit_log] fail with [VmError::WriteProtection].
    pub fn static_call(
        &mut self, caller: &Addr, to: &Addr, input: &[u8], gas: u64,
    ) -> Result<CallOutput, VmError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::Depth)
        }
        let snap = self.state.snapshot();
        let code = self.state.get_code(to);
        if code.is_empty() {
            return Ok(CallOutput {
                data: Vec::new(),
                gas_left: gas,
            })
        }
        let frame = Frame {
            caller: caller.clone(),
            address: to.clone(),
            code,
            input: input.to_vec(),
            gas,
            value: U256::zero(),
            is_create: false,
        };
        let was_static = self.read_only;
        self.read_only = true;
        let res = self.run_frame(&frame, snap);
        self.read_only = was_static;
        res
    }

    /// Deploys a contract. The caller's nonce is bumped before the frame
    /// snapshot, so the bump survives a failed deployment. The code the
    /// init frame returns is installed at the derived address.
    pub fn create(
        &mut self, caller: &Addr, code: &[u8], gas: u64, value: &U256,
    ) -> Result<CreateOutput, VmError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::Depth)
        }
        if !self.can_transfer(caller, value) {
            return Err(VmError::InsufficientBalance)
        }
        let nonce = self.state.get_nonce(caller);
        self.state.set_nonce(caller, nonce + 1);
        let address = create_addr(caller, nonce);

        let snap = self.state.snapshot();
        self.state.create_account(&address);
        self.state.set_nonce(&address, 1);
        self.transfer(caller, &address, value);
        let frame = Frame {
            caller: caller.clone(),
            address: address.clone(),
            code: code.to_vec(),
            input: Vec::new(),
            gas,
            value: *value,
            is_create: true,
        };
        let out = self.run_frame(&frame, snap)?;
        self.state.set_code(&address, &out.data);
        Ok(CreateOutput {
            address,
            data: out.data,
            gas_left: out.gas_left,
        })
    }

    fn run_frame(
        &mut self, frame: &Frame, snap: usize,
    ) -> Result<CallOutput, VmError> {
        self.depth += 1;
        let interp = self.interp;
        let res = interp.run(self, frame);
        self.depth -= 1;
        if res.is_err() {
            self.state.revert_to_snapshot(snap);
        }
        res
    }
}
