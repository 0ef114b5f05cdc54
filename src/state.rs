//! World state: accounts, code, storage, logs, and the record trees,
//! all built on [Tree] so the whole bundle can be snapshotted, reverted,
//! and forked at any historical version.

use std::ops::{Deref, DerefMut};

use crate::block::{Block, Log};
use crate::common::{Addr, Hash, U256};
use crate::tree::Tree;
use crate::vm::WorldState;

/// Fixed-size account record: 32-byte big-endian balance, 8-byte
/// big-endian nonce, one suicide-flag byte.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Account([u8; 41]);

impl Default for Account {
    fn default() -> Self {
        Account([0; 41])
    }
}

impl Account {
    pub fn balance(&self) -> U256 {
        U256::from_big_endian(&self.0[..32])
    }

    pub fn set_balance(&mut self, v: &U256) {
        v.to_big_endian(&mut self.0[..32]);
    }

    pub fn nonce(&self) -> u64 {
        u64::from_be_bytes(self.0[32..40].try_into().unwrap())
    }

    pub fn set_nonce(&mut self, n: u64) {
        self.0[32..40].copy_from_slice(&n.to_be_bytes());
    }

    pub fn suicided(&self) -> bool {
        self.0[40] != 0
    }

    pub fn set_suicided(&mut self, t: bool) {
        self.0[40] = t as u8;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Accounts keyed by 20-byte address.
#[derive(Clone, Default)]
pub struct AccountTree(pub Tree);

impl AccountTree {
    pub fn get_account(&self, addr: &Addr) -> Option<Account> {
        let v = self.0.get(addr.as_bytes())?;
        let mut acct = Account::default();
        if v.len() != acct.0.len() {
            return None
        }
        acct.0.copy_from_slice(v);
        Some(acct)
    }

    pub fn set_account(&mut self, addr: &Addr, acct: &Account) {
        self.0.insert(addr.as_bytes(), acct.as_bytes());
    }
}

impl Deref for AccountTree {
    type Target = Tree;
    fn deref(&self) -> &Tree {
        &self.0
    }
}

impl DerefMut for AccountTree {
    fn deref_mut(&mut self) -> &mut Tree {
        &mut self.0
    }
}

/// Contract bytecode keyed by 20-byte address.
#[derive(Clone, Default)]
pub struct CodeTree(pub Tree);

impl CodeTree {
    pub fn get_code(&self, addr: &Addr) -> Vec<u8> {
        self.0.get(addr.as_bytes()).map(Vec::from).unwrap_or_default()
    }

    pub fn put_code(&mut self, addr: &Addr, code: &[u8]) {
        self.0.insert(addr.as_bytes(), code);
    }
}

impl Deref for CodeTree {
    type Target = Tree;
    fn deref(&self) -> &Tree {
        &self.0
    }
}

impl DerefMut for CodeTree {
    fn deref_mut(&mut self) -> &mut Tree {
        &mut self.0
    }
}

/// Key of a storage slot: `keccak256(address ∥ slot)`.
pub fn storage_key(addr: &Addr, slot: &Hash) -> Hash {
    let mut buf = [0u8; 20 + 32];
    buf[..20].copy_from_slice(addr.as_bytes());
    buf[20..].copy_from_slice(slot.as_bytes());
    Hash::hash(&buf)
}

// One composite snapshot: refund value, a handle per journaled tree, and
// the log-sequence length. Preimages are deliberately not captured.
#[derive(Clone, Copy)]
struct StateSnap {
    refund: U256,
    accounts: usize,
    code: usize,
    storage: usize,
    txs: usize,
    rxs: usize,
    loglen: usize,
}

/// The full simulated world state plus the pending block it belongs to.
#[derive(Clone, Default)]
pub struct State {
    /// Block currently accumulating transactions.
    pub pending: Block,

    pub accounts: AccountTree,
    pub code: CodeTree,
    /// Storage words keyed by [storage_key].
    pub storage: Tree,
    /// Hash-to-preimage map, written opportunistically during execution.
    pub preimages: Tree,
    /// Serialized transactions keyed by transaction hash.
    pub transactions: Tree,
    /// Serialized receipts keyed by transaction hash.
    pub receipts: Tree,
    /// Serialized sealed blocks keyed by synthetic block hash.
    pub blocks: Tree,

    refund: U256,
    logs: Vec<Log>,
    snapshots: Vec<StateSnap>,
}

impl State {
    pub fn new(pending: Block) -> Self {
        State {
            pending,
            ..Default::default()
        }
    }

    /// Logs appended so far, in execution order.
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub(crate) fn logs_mut(&mut self) -> &mut [Log] {
        &mut self.logs
    }

    /// Builds an independent state equal to the view captured by composite
    /// snapshot `n`: every journaled tree is forked at its recorded
    /// handle, and the log prefix and snapshot stack are truncated.
    /// Writes to either side never perturb the other.
    pub fn at_snapshot(&self, n: usize) -> State {
        let ns = self.snapshots[n];
        State {
            pending: self.pending.clone(),
            accounts: AccountTree(self.accounts.copy_at(ns.accounts)),
            code: CodeTree(self.code.copy_at(ns.code)),
            storage: self.storage.copy_at(ns.storage),
            preimages: self.preimages.clone(),
            transactions: self.transactions.copy_at(ns.txs),
            receipts: self.receipts.copy_at(ns.rxs),
            blocks: self.blocks.clone(),
            refund: ns.refund,
            logs: self.logs[..ns.loglen].to_vec(),
            snapshots: self.snapshots[..n].to_vec(),
        }
    }
}

impl WorldState for State {
    fn create_account(&mut self, addr: &Addr) {
        self.accounts.set_account(addr, &Account::default());
    }

    fn sub_balance(&mut self, addr: &Addr, v: &U256) {
        let mut acct = self.accounts.get_account(addr).unwrap_or_default();
        let bal = acct.balance().saturating_sub(*v);
        acct.set_balance(&bal);
        self.accounts.set_account(addr, &acct);
    }

    fn add_balance(&mut self, addr: &Addr, v: &U256) {
        let mut acct = self.accounts.get_account(addr).unwrap_or_default();
        let bal = acct.balance().saturating_add(*v);
        acct.set_balance(&bal);
        self.accounts.set_account(addr, &acct);
    }

    fn get_balance(&self, addr: &Addr) -> U256 {
        self.accounts
            .get_account(addr)
            .map(|a| a.balance())
            .unwrap_or_default()
    }

    fn get_nonce(&self, addr: &Addr) -> u64 {
        self.accounts
            .get_account(addr)
            .map(|a| a.nonce())
            .unwrap_or_default()
    }

    fn set_nonce(&mut self, addr: &Addr, nonce: u64) {
        let mut acct = self
            .accounts
            .get_account(addr)
            .unwrap_or_else(|| panic!("set_nonce on unknown account {addr}"));
        acct.set_nonce(nonce);
        self.accounts.set_account(addr, &acct);
    }

    fn get_code_hash(&self, addr: &Addr) -> Hash {
        Hash::hash(&self.get_code(addr))
    }

    fn get_code(&self, addr: &Addr) -> Vec<u8> {
        self.code.get_code(addr)
    }

    fn set_code(&mut self, addr: &Addr, code: &[u8]) {
        self.code.put_code(addr, code);
    }

    fn get_code_size(&self, addr: &Addr) -> usize {
        self.get_code(addr).len()
    }

    fn add_refund(&mut self, v: &U256) {
        self.refund = self.refund.saturating_add(*v);
    }

    fn get_refund(&self) -> U256 {
        self.refund
    }

    fn get_state(&self, addr: &Addr, key: &Hash) -> Hash {
        let h = storage_key(addr, key);
        match self.storage.get(h.as_bytes()) {
            Some(v) => Hash::from_slice(v),
            None => Hash::zero().clone(),
        }
    }

    fn set_state(&mut self, addr: &Addr, key: &Hash, value: &Hash) {
        let h = storage_key(addr, key);
        if value.is_zero() {
            self.storage.delete(h.as_bytes());
        } else {
            self.storage.insert(h.as_bytes(), value.as_bytes());
        }
    }

    fn exist(&self, addr: &Addr) -> bool {
        self.accounts.get_account(addr).is_some()
    }

    fn empty(&self, addr: &Addr) -> bool {
        match self.accounts.get_account(addr) {
            None => true,
            Some(acct) => {
                acct.nonce() == 0
                    && acct.balance().is_zero()
                    && self.code.get_code(addr).is_empty()
            }
        }
    }

    fn suicide(&mut self, addr: &Addr) -> bool {
        let mut acct = match self.accounts.get_account(addr) {
            Some(a) if !a.suicided() => a,
            _ => return false,
        };
        acct.set_suicided(true);
        self.accounts.set_account(addr, &acct);
        true
    }

    fn has_suicided(&self, addr: &Addr) -> bool {
        self.accounts
            .get_account(addr)
            .map(|a| a.suicided())
            .unwrap_or(false)
    }

    fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    fn add_preimage(&mut self, hash: &Hash, preimage: &[u8]) {
        self.preimages.insert(hash.as_bytes(), preimage);
    }

    fn snapshot(&mut self) -> usize {
        let snap = StateSnap {
            refund: self.refund,
            accounts: self.accounts.snapshot(),
            code: self.code.snapshot(),
            storage: self.storage.snapshot(),
            txs: self.transactions.snapshot(),
            rxs: self.receipts.snapshot(),
            loglen: self.logs.len(),
        };
        self.snapshots.push(snap);
        self.snapshots.len() - 1
    }

    fn revert_to_snapshot(&mut self, snap: usize) {
        assert!(snap < self.snapshots.len(), "no such snapshot {snap}");
        let ns = self.snapshots[snap];
        self.refund = ns.refund;
        self.accounts.rollback(ns.accounts);
        self.code.rollback(ns.code);
        self.storage.rollback(ns.storage);
        self.transactions.rollback(ns.txs);
        self.receipts.rollback(ns.rxs);
        self.logs.truncate(ns.loglen);
        // snapshots above the restored one can never be replayed
        self.snapshots.truncate(snap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Uint64;

    fn addr(n: u8) -> Addr {
        Addr::from([n; 20])
    }

    fn word(n: u8) -> Hash {
        Hash::from([n; 32])
    }

    #[test]
    fn account_encoding() {
        let mut acct = Account::default();
        acct.set_balance(&U256::from(0xdead_beefu64));
        acct.set_nonce(42);
        acct.set_suicided(true);
        assert_eq!(acct.balance(), U256::from(0xdead_beefu64));
        assert_eq!(acct.nonce(), 42);
        assert!(acct.suicided());
        acct.set_suicided(false);
        assert!(!acct.suicided());
        assert_eq!(acct.as_bytes().len(), 41);
    }

    #[test]
    fn balances_on_missing_accounts_read_as_zero() {
        let mut s = State::default();
        let a = addr(1);
        assert_eq!(s.get_balance(&a), U256::zero());
        s.add_balance(&a, &U256::from(7));
        assert_eq!(s.get_balance(&a), U256::from(7));
        s.sub_balance(&a, &U256::from(3));
        assert_eq!(s.get_balance(&a), U256::from(4));
    }

    #[test]
    #[should_panic(expected = "set_nonce on unknown account")]
    fn set_nonce_requires_account() {
        let mut s = State::default();
        s.set_nonce(&addr(9), 1);
    }

    #[test]
    fn zero_write_deletes_storage() {
        let mut s = State::default();
        let (a, k) = (addr(1), word(2));
        s.set_state(&a, &k, &word(9));
        assert_eq!(s.get_state(&a, &k), word(9));
        s.set_state(&a, &k, Hash::zero());
        assert_eq!(&s.get_state(&a, &k), Hash::zero());
        let h = storage_key(&a, &k);
        assert!(s.storage.get(h.as_bytes()).is_none());
    }

    #[test]
    fn empty_accounts() {
        let mut s = State::default();
        let a = addr(1);
        assert!(s.empty(&a));
        s.create_account(&a);
        assert!(s.empty(&a));
        s.add_balance(&a, &U256::from(1));
        assert!(!s.empty(&a));

        let b = addr(2);
        s.create_account(&b);
        s.set_code(&b, b"\x60\x00");
        assert!(!s.empty(&b));
    }

    #[test]
    fn suicide_flags_without_deleting() {
        let mut s = State::default();
        let a = addr(1);
        assert!(!s.suicide(&a), "missing account cannot suicide");
        s.create_account(&a);
        s.add_balance(&a, &U256::from(10));
        assert!(s.suicide(&a));
        assert!(s.has_suicided(&a));
        assert!(!s.suicide(&a), "second suicide reports false");
        assert!(s.exist(&a));
        assert_eq!(s.get_balance(&a), U256::from(10));
    }

    #[test]
    fn code_hash_tracks_code() {
        let mut s = State::default();
        let a = addr(1);
        assert_eq!(s.get_code_hash(&a), Hash::hash(b""));
        s.set_code(&a, b"\x01\x02");
        assert_eq!(s.get_code_hash(&a), Hash::hash(b"\x01\x02"));
        assert_eq!(s.get_code_size(&a), 2);
    }

    #[test]
    fn composite_snapshot_revert() {
        let mut s = State::default();
        let a = addr(1);
        s.create_account(&a);
        s.add_balance(&a, &U256::from(100));
        s.set_state(&a, &word(1), &word(1));
        s.add_log(Log {
            address: a.clone(),
            block_number: Uint64(100),
            ..Default::default()
        });
        s.add_refund(&U256::from(5));
        s.transactions.insert(b"t1", b"x");

        let snap = s.snapshot();

        s.add_balance(&a, &U256::from(100));
        s.set_nonce(&a, 3);
        s.set_state(&a, &word(1), Hash::zero());
        s.set_state(&a, &word(2), &word(2));
        s.set_code(&a, b"junk");
        s.add_log(Log::default());
        s.add_log(Log::default());
        s.add_refund(&U256::from(95));
        s.transactions.insert(b"t2", b"y");
        s.receipts.insert(b"t2", b"y");

        s.revert_to_snapshot(snap);

        assert_eq!(s.get_balance(&a), U256::from(100));
        assert_eq!(s.get_nonce(&a), 0);
        assert_eq!(s.get_state(&a, &word(1)), word(1));
        assert_eq!(&s.get_state(&a, &word(2)), Hash::zero());
        assert!(s.get_code(&a).is_empty());
        assert_eq!(s.logs().len(), 1);
        assert_eq!(s.get_refund(), U256::from(5));
        assert!(s.transactions.get(b"t2").is_none());
        assert!(s.receipts.get(b"t2").is_none());
        assert!(s.transactions.get(b"t1").is_some());
    }

    #[test]
    fn revert_invalidates_newer_snapshots() {
        let mut s = State::default();
        let a = addr(1);
        s.create_account(&a);
        let outer = s.snapshot();
        s.add_balance(&a, &U256::from(1));
        let _inner = s.snapshot();
        s.add_balance(&a, &U256::from(1));
        s.revert_to_snapshot(outer);
        // the stack was truncated; the next snapshot reuses the slot
        assert_eq!(s.snapshot(), outer);
    }

    #[test]
    fn historical_view_is_independent() {
        let mut s = State::default();
        let a = addr(1);
        s.create_account(&a);
        s.add_balance(&a, &U256::from(10));
        s.add_log(Log::default());
        let snap = s.snapshot();
        s.add_balance(&a, &U256::from(90));
        s.add_log(Log::default());

        let mut view = s.at_snapshot(snap);
        assert_eq!(view.get_balance(&a), U256::from(10));
        assert_eq!(view.logs().len(), 1);

        view.add_balance(&a, &U256::from(5));
        view.set_state(&a, &word(1), &word(1));
        assert_eq!(s.get_balance(&a), U256::from(100));
        assert_eq!(&s.get_state(&a, &word(1)), Hash::zero());

        s.sub_balance(&a, &U256::from(100));
        assert_eq!(view.get_balance(&a), U256::from(15));
    }

    #[test]
    fn preimages_are_recorded() {
        let mut s = State::default();
        let h = Hash::hash(b"secret");
        s.add_preimage(&h, b"secret");
        assert_eq!(s.preimages.get(h.as_bytes()), Some(b"secret".as_ref()));
    }
}
