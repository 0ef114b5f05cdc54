//! # simeth: an in-process Ethereum-compatible chain simulator
//!
//! simeth maintains a mutable world state, executes transactions against
//! it, mines them into blocks, keeps a queryable history of past blocks
//! and their state, and speaks a subset of the Ethereum JSON-RPC dialect
//! over HTTP. It exists so that test code can drive smart-contract
//! behavior without standing up a real node.
//!
//! Everything is built on one primitive: [tree::Tree], a journaled
//! key-value store with O(1) snapshots, rollback to any prior snapshot,
//! and cheap forking of historical views. Accounts, code, storage,
//! transactions, receipts, and blocks are each a tree inside
//! [state::State]; composite snapshots over the whole bundle give the EVM
//! its revert semantics and give the chain its block history:
//!
//! - [chain::Chain] drives execution: [chain::Chain::mine] runs one
//!   transaction against the pending block and records it,
//!   [chain::Chain::seal] freezes the pending block into history, and
//!   [chain::Chain::at_block] reconstructs an independent chain at any
//!   sealed block.
//! - [vm] is the seam to the bytecode interpreter, which is deliberately
//!   not part of this crate. [vm::Evm] implements the call model (value
//!   transfer, contract creation, snapshot/revert around frames); the
//!   interpreter itself is anything implementing [vm::Interpreter].
//! - [scripted::ScriptedVm] is the default interpreter: contracts are
//!   plain Rust closures registered per address, which is all a test
//!   usually needs. Plain value transfers work with no setup at all.
//! - [rpc] dispatches the JSON-RPC dialect and serves it with actix-web.
//!
//! Block and transaction hashes are synthetic: a block hash is the
//! Keccak-256 of its little-endian number, a transaction hash is derived
//! from its block number and index. Tests can predict both. Gas is
//! metered by the interpreter but never debited from sender balances.
//!
//! ```
//! use simeth::chain::Chain;
//! use simeth::common::U256;
//!
//! let mut chain = Chain::new();
//! let alice = chain.new_account(10);
//! let bob = chain.new_account(0);
//! let wei = U256::from(10).pow(18.into());
//! chain.send(&alice, &bob, &wei).unwrap();
//! chain.seal();
//! assert_eq!(chain.balance_of(&bob), wei);
//! ```

pub mod block;
pub mod chain;
pub mod common;
pub mod filter;
pub mod rpc;
pub mod scripted;
pub mod state;
pub mod tree;
pub mod vm;
