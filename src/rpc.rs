//! JSON-RPC transport: request dispatch for the supported `eth_*` dialect,
//! a mutex-guarded shared handle, and an HTTP adapter.
//!
//! Dispatch decodes params by count and per-position type. Any failure
//! (bad arity, bad types, unknown methods, chain or execution errors) is
//! surfaced to the caller as error code `-32601` with a readable message.
//! Every handler runs with exclusive access to the chain for its whole
//! duration.

use actix_web::{web, App, HttpResponse, HttpServer};
use parking_lot::Mutex;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use std::fmt;
use std::sync::Arc;

use crate::block::{number_hash, Block, BlockTxs, Receipt, Transaction};
use crate::chain::{Chain, ChainError};
use crate::common::{Addr, Bytes, Hash, Uint64, Wei, U256};
use crate::vm::VmError;

/// The single error code this dialect reports.
pub const RPC_ERROR_CODE: i64 = -32601;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Error, Clone, Debug, Serialize, Deserialize)]
#[error("{message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(message: impl Into<String>) -> Self {
        RpcError {
            code: RPC_ERROR_CODE,
            message: message.into(),
        }
    }
}

impl From<ChainError> for RpcError {
    fn from(e: ChainError) -> Self {
        RpcError::new(e.to_string())
    }
}

impl From<VmError> for RpcError {
    fn from(e: VmError) -> Self {
        RpcError::new(e.to_string())
    }
}

/// A block position parameter: `"pending"` (`-1`), `"latest"` (`-2`),
/// `"earliest"` (`0`), or a decimal/hex block number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTag(pub i64);

impl Default for BlockTag {
    fn default() -> Self {
        BlockTag(0)
    }
}

impl<'de> Deserialize<'de> for BlockTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TagVisitor;

        impl<'de> Visitor<'de> for TagVisitor {
            type Value = BlockTag;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "\"latest\", \"pending\", \"earliest\", or a block number",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<BlockTag, E>
            where
                E: de::Error,
            {
                let n = match value {
                    "pending" => -1,
                    "latest" => -2,
                    "earliest" => 0,
                    s => {
                        let parsed = if let Some(hexpart) = s.strip_prefix("0x")
                        {
                            i64::from_str_radix(hexpart, 16)
                        } else {
                            s.parse()
                        };
                        parsed.map_err(|_| {
                            de::Error::invalid_value(
                                de::Unexpected::Str(value),
                                &self,
                            )
                        })?
                    }
                };
                Ok(BlockTag(n))
            }

            fn visit_u64<E>(self, value: u64) -> Result<BlockTag, E>
            where
                E: de::Error,
            {
                Ok(BlockTag(value as i64))
            }

            fn visit_i64<E>(self, value: i64) -> Result<BlockTag, E>
            where
                E: de::Error,
            {
                Ok(BlockTag(value))
            }
        }

        deserializer.deserialize_any(TagVisitor)
    }
}

/// The `eth_call`/`eth_sendTransaction` call object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallArgs {
    pub from: Addr,
    pub to: Option<Addr>,
    pub gas: Uint64,
    pub gas_price: Wei,
    pub value: Wei,
    pub data: Bytes,
}

impl CallArgs {
    fn tx(&self) -> Transaction {
        Transaction {
            from: self.from.clone(),
            to: self.to.clone(),
            gas: self.gas,
            gas_price: self.gas_price.clone(),
            value: self.value.clone(),
            input: self.data.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FilterReq {
    from_block: BlockTag,
    to_block: BlockTag,
    address: Option<Addr>,
    topics: Vec<Option<Hash>>,
}

fn decode<T: DeserializeOwned>(params: &[Value]) -> Result<T, RpcError> {
    serde_json::from_value(Value::Array(params.to_vec()))
        .map_err(|e| RpcError::new(format!("invalid params: {e}")))
}

fn no_params(params: &[Value]) -> Result<(), RpcError> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(RpcError::new(format!(
            "expected 0 params; found {}",
            params.len()
        )))
    }
}

fn ret<T: Serialize>(v: T) -> Result<Value, RpcError> {
    serde_json::to_value(v).map_err(|e| RpcError::new(e.to_string()))
}

impl Chain {
    /// Handles a single JSON-RPC request against this chain. This is the
    /// in-process transport; [ChainHandle] exposes the same dispatch to
    /// concurrent callers.
    pub fn execute(&mut self, req: &RpcRequest) -> RpcResponse {
        trace!(method = %req.method, "rpc request");
        let mut res = RpcResponse {
            jsonrpc: req.jsonrpc.clone(),
            id: req.id.clone(),
            result: None,
            error: None,
        };
        match self.dispatch(&req.method, &req.params) {
            Ok(v) => res.result = Some(v),
            Err(e) => res.error = Some(e),
        }
        res
    }

    fn dispatch(
        &mut self, method: &str, params: &[Value],
    ) -> Result<Value, RpcError> {
        match method {
            "eth_protocolVersion" => {
                no_params(params)?;
                ret(Uint64(63))
            }
            "eth_syncing" => {
                no_params(params)?;
                ret(false)
            }
            "eth_gasPrice" => {
                no_params(params)?;
                ret(Uint64(16_000_000_000))
            }
            "eth_blockNumber" => {
                no_params(params)?;
                ret(self.pending().number)
            }
            "eth_call" => {
                let (args, block): (CallArgs, BlockTag) = decode(params)?;
                ret(self.call_at(&args, block.0)?)
            }
            "eth_sendTransaction" => {
                let (args,): (CallArgs,) = decode(params)?;
                let (_, hash) =
                    self.mine(args.tx()).map_err(ChainError::from)?;
                // one transaction per block
                self.seal();
                ret(hash)
            }
            "eth_getTransactionReceipt" => {
                let (hash,): (Hash,) = decode(params)?;
                ret(self.receipt(&hash)?)
            }
            "eth_getTransactionByHash" => {
                let (hash,): (Hash,) = decode(params)?;
                ret(self.transaction(&hash)?)
            }
            "eth_getBalance" => {
                let (addr, block): (Addr, BlockTag) = decode(params)?;
                ret(self.balance_at(&addr, block.0)?)
            }
            "eth_estimateGas" => {
                let (args, block): (CallArgs, BlockTag) = decode(params)?;
                ret(self.estimate_gas(&args, block.0)?)
            }
            "eth_getBlockByHash" => {
                let (hash, full): (Hash, bool) = decode(params)?;
                ret(self.block_by_hash(&hash, full)?)
            }
            "eth_getBlockByNumber" => {
                let (tag, full): (BlockTag, bool) = decode(params)?;
                let pending = self.pending().number.0;
                let number = match tag.0 {
                    -1 => pending,
                    -2 => pending.saturating_sub(1),
                    n if n >= 0 => n as u64,
                    n => {
                        return Err(ChainError::UnknownBlock(n).into())
                    }
                };
                // block hashes are hashes of the block number
                ret(self.block_by_hash(&number_hash(number), full)?)
            }
            "eth_newFilter" => {
                let (f,): (FilterReq,) = decode(params)?;
                let id = self.new_filter(
                    f.from_block.0,
                    f.to_block.0,
                    f.address,
                    f.topics,
                )?;
                ret(Uint64(id))
            }
            "eth_getFilterChanges" => {
                let (id,): (Uint64,) = decode(params)?;
                ret(self.filter_changes(id.0)?)
            }
            "eth_getFilterLogs" => {
                let (id,): (Uint64,) = decode(params)?;
                ret(self.filter_logs(id.0)?)
            }
            "eth_uninstallFilter" => {
                let (id,): (Uint64,) = decode(params)?;
                ret(self.uninstall_filter(id.0))
            }
            _ => Err(RpcError::new(format!("{method}: unsupported method"))),
        }
    }

    /// Handles `eth_call`: a read-only call against the state at `block`.
    pub fn call_at(
        &self, args: &CallArgs, block: i64,
    ) -> Result<Bytes, ChainError> {
        let mut view = self
            .at_block(block)
            .ok_or(ChainError::UnknownBlock(block))?;
        let gas = if args.gas.0 != 0 {
            args.gas.0
        } else {
            view.pending().gas_limit.0
        };
        let to = args.to.clone().unwrap_or_default();
        let out = view
            .evm(args.from.clone())
            .static_call(&args.from, &to, &args.data, gas)?;
        Ok(out.data.into())
    }

    /// Handles `eth_estimateGas`: runs the call on a detached view of
    /// `block` and reports the gas consumed; no state change survives.
    pub fn estimate_gas(
        &self, args: &CallArgs, block: i64,
    ) -> Result<Uint64, ChainError> {
        let mut view = self
            .at_block(block)
            .ok_or(ChainError::UnknownBlock(block))?;
        let gas = if args.gas.0 != 0 {
            args.gas.0
        } else {
            view.pending().gas_limit.0
        };
        let value: U256 = args.value.clone().into();
        let mut evm = view.evm(args.from.clone());
        let gas_left = match &args.to {
            None => evm.create(&args.from, &args.data, gas, &value)?.gas_left,
            Some(to) => {
                evm.call(&args.from, to, &args.data, gas, &value)?.gas_left
            }
        };
        Ok(Uint64(gas - gas_left))
    }

    /// Handles `eth_getBalance`.
    pub fn balance_at(
        &self, addr: &Addr, block: i64,
    ) -> Result<Wei, ChainError> {
        let view = self
            .at_block(block)
            .ok_or(ChainError::UnknownBlock(block))?;
        Ok(view.balance_of(addr).into())
    }

    /// Handles `eth_getTransactionByHash`.
    pub fn transaction(&self, hash: &Hash) -> Result<Transaction, ChainError> {
        let buf = self
            .state()
            .transactions
            .get(hash.as_bytes())
            .ok_or_else(|| ChainError::UnknownTransaction(hash.clone()))?;
        Ok(serde_json::from_slice(buf).expect("stored transaction decodes"))
    }

    /// Handles `eth_getTransactionReceipt`.
    pub fn receipt(&self, hash: &Hash) -> Result<Receipt, ChainError> {
        let buf = self
            .state()
            .receipts
            .get(hash.as_bytes())
            .ok_or_else(|| ChainError::UnknownReceipt(hash.clone()))?;
        Ok(serde_json::from_slice(buf).expect("stored receipt decodes"))
    }

    /// Handles `eth_getBlockByHash`. With `full`, the transaction hashes
    /// are replaced by the stored transaction objects.
    pub fn block_by_hash(
        &self, hash: &Hash, full: bool,
    ) -> Result<Block, ChainError> {
        let mut block = if hash == &self.pending().hash {
            self.pending().clone()
        } else {
            let buf = self
                .state()
                .blocks
                .get(hash.as_bytes())
                .ok_or_else(|| ChainError::UnknownBlockHash(hash.clone()))?;
            serde_json::from_slice(buf).expect("stored block decodes")
        };
        if !full {
            return Ok(block)
        }
        let hashes = match &block.transactions {
            BlockTxs::Hashes(v) => v.clone(),
            BlockTxs::Full(_) => return Ok(block),
        };
        let mut txs = Vec::with_capacity(hashes.len());
        for th in &hashes {
            let buf = self
                .state()
                .transactions
                .get(th.as_bytes())
                .ok_or_else(|| ChainError::UnknownTransaction(th.clone()))?;
            txs.push(
                serde_json::from_slice(buf)
                    .expect("stored transaction decodes"),
            );
        }
        block.transactions = BlockTxs::Full(txs);
        Ok(block)
    }
}

/// A chain shared across threads. Every request locks the chain for the
/// whole dispatch, which serializes requests in arrival order.
#[derive(Clone)]
pub struct ChainHandle(Arc<Mutex<Chain>>);

impl ChainHandle {
    pub fn new(chain: Chain) -> Self {
        ChainHandle(Arc::new(Mutex::new(chain)))
    }

    pub fn execute(&self, req: &RpcRequest) -> RpcResponse {
        self.0.lock().execute(req)
    }

    /// Direct access to the chain, for test setup around the transport.
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, Chain> {
        self.0.lock()
    }
}

/// HTTP endpoint: one JSON-RPC request per body, one response back.
/// Malformed bodies get 401, response-encoding failures 500.
pub async fn handle_http(
    handle: web::Data<ChainHandle>, body: web::Bytes,
) -> HttpResponse {
    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "decode body error");
            return HttpResponse::Unauthorized().finish()
        }
    };
    let res = handle.execute(&req);
    match serde_json::to_vec(&res) {
        Ok(buf) => HttpResponse::Ok()
            .content_type("application/json")
            .body(buf),
        Err(e) => {
            debug!(error = %e, "error writing response");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Serves the JSON-RPC dialect over HTTP until the server is stopped.
pub async fn serve(handle: ChainHandle, bind: &str) -> std::io::Result<()> {
    let data = web::Data::new(handle);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/", web::post().to(handle_http))
    })
    .bind(bind)?
    .run()
    .await
}
