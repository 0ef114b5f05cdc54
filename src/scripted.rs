//! A scripted stand-in for a real bytecode interpreter.
//!
//! Contract behavior is written as plain Rust closures registered per
//! address. Frames for an address with no registered handler fall back to
//! two rules that keep simple tests short:
//!
//! - creation frames return the init code unchanged, so `create` installs
//!   the given bytes verbatim;
//! - call frames into unscripted code fail with
//!   [VmError::InvalidOpcode], since scripted execution cannot interpret
//!   real bytecode.
//!
//! Handlers receive the [Evm] so they can read and write state, emit logs,
//! and make nested calls, and must account for gas themselves via the
//! returned `gas_left`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::Addr;
use crate::vm::{CallOutput, Evm, Frame, Interpreter, VmError};

pub type Handler =
    dyn Fn(&mut Evm<'_>, &Frame) -> Result<CallOutput, VmError> + Send + Sync;

/// Interpreter that dispatches frames to registered Rust closures.
#[derive(Default)]
pub struct ScriptedVm {
    handlers: RwLock<HashMap<Addr, Arc<Handler>>>,
}

impl ScriptedVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the contract at `addr`. Replaces any previous handler.
    pub fn register<F>(&self, addr: Addr, handler: F)
    where
        F: Fn(&mut Evm<'_>, &Frame) -> Result<CallOutput, VmError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.write().insert(addr, Arc::new(handler));
    }

    /// Removes the handler for `addr`; returns whether one was present.
    pub fn unregister(&self, addr: &Addr) -> bool {
        self.handlers.write().remove(addr).is_some()
    }
}

impl Interpreter for ScriptedVm {
    fn run(
        &self, evm: &mut Evm<'_>, frame: &Frame,
    ) -> Result<CallOutput, VmError> {
        let handler = self.handlers.read().get(&frame.address).cloned();
        match handler {
            Some(h) => h(evm, frame),
            None if frame.is_create => Ok(CallOutput {
                data: frame.code.clone(),
                gas_left: frame.gas,
            }),
            None => Err(VmError::InvalidOpcode),
        }
    }
}
