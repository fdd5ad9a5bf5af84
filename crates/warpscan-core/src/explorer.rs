//! Typed query facade over the dispatcher and the cache.
//!
//! [`Explorer`] is the explicit context every consumer goes through: cacheable lookups are
//! routed through [`CacheManager::get_or_fetch`] so concurrent identical queries share one
//! network call, while head-relative reads (latest block, gas price, logs, calls) always go to
//! the node. Missing entities come back as `Ok(None)`, never as an error.
//!
//! The fetch closures issue their dispatcher requests with a fresh cancellation token: a
//! caller abandoning its query only abandons its own wait.

use crate::{
    cache::{CacheKey, CacheManager, Fetched},
    chain::ChainState,
    error::{not_found_as_none, CoreError},
    types::{
        AddressInfo, BlockHeader, ContractInfo, GasPrices, LogFilter, LogRecord, ReceiptRecord,
        TokenInfo, TransactionRecord,
    },
    upstream::{Dispatcher, RpcRequest},
    utils::{format_hex_u64, is_prefixed_hex, parse_hex_u128, parse_hex_u64},
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A `null` result means the node does not know the entity.
pub(crate) fn require_found(value: Value, what: &'static str) -> Result<Value, CoreError> {
    if value.is_null() {
        Err(CoreError::NotFound(what.to_string()))
    } else {
        Ok(value)
    }
}

pub(crate) fn decode<T: DeserializeOwned>(what: &'static str, value: &Value) -> Result<T, CoreError> {
    T::deserialize(value).map_err(|e| CoreError::decode(what, &e))
}

fn decode_quantity(what: &'static str, value: &Value) -> Result<u128, CoreError> {
    value
        .as_str()
        .and_then(parse_hex_u128)
        .ok_or_else(|| CoreError::Decode { what, reason: format!("expected hex quantity, got {value}") })
}

fn decode_u64(what: &'static str, value: &Value) -> Result<u64, CoreError> {
    value
        .as_str()
        .and_then(parse_hex_u64)
        .ok_or_else(|| CoreError::Decode { what, reason: format!("expected hex quantity, got {value}") })
}

fn height_field(value: &Value, field: &str) -> Option<u64> {
    value.get(field).and_then(Value::as_str).and_then(parse_hex_u64)
}

fn block_tag(number: Option<u64>) -> Value {
    number.map_or_else(|| json!("latest"), |n| json!(format_hex_u64(n)))
}

pub struct Explorer {
    rpc: Arc<Dispatcher>,
    metadata: Option<Arc<Dispatcher>>,
    cache: Arc<CacheManager>,
    chain: Arc<ChainState>,
}

impl Explorer {
    #[must_use]
    pub fn new(rpc: Arc<Dispatcher>, cache: Arc<CacheManager>, chain: Arc<ChainState>) -> Self {
        Self { rpc, metadata: None, cache, chain }
    }

    /// Enables [`Self::contract_info`] and [`Self::token_info`].
    #[must_use]
    pub fn with_metadata(mut self, metadata: Arc<Dispatcher>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn rpc(&self) -> &Arc<Dispatcher> {
        &self.rpc
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<ChainState> {
        &self.chain
    }

    fn tip(&self) -> Option<u64> {
        self.chain.has_tip().then(|| self.chain.current_tip())
    }

    async fn cached<F, Fut>(&self, key: CacheKey, cancel: &CancellationToken, fetch: F) -> Result<Arc<Value>, CoreError>
    where
        F: FnOnce(Arc<Dispatcher>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Fetched, CoreError>> + Send + 'static,
    {
        let rpc = Arc::clone(&self.rpc);
        self.cache.get_or_fetch(&key, cancel, move || fetch(rpc)).await
    }

    async fn uncached(&self, request: RpcRequest, cancel: &CancellationToken) -> Result<Value, CoreError> {
        self.rpc.execute(&request.with_cancellation(cancel.clone())).await
    }

    /// # Errors
    ///
    /// Any [`CoreError`] except `NotFound`, which is `Ok(None)`.
    pub async fn block_by_number(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<BlockHeader>, CoreError> {
        let result = self
            .cached(CacheKey::block_number(number), cancel, move |rpc| async move {
                let request = RpcRequest::read("eth_getBlockByNumber", json!([format_hex_u64(number), false]));
                let value = require_found(rpc.execute(&request).await?, "block")?;
                Ok(Fetched::at_height(value, number))
            })
            .await;
        not_found_as_none(result.and_then(|v| decode("block", &v)))
    }

    /// # Errors
    ///
    /// Any [`CoreError`] except `NotFound`, which is `Ok(None)`.
    pub async fn block_by_hash(
        &self,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BlockHeader>, CoreError> {
        let hash = hash.trim().to_lowercase();
        let params = json!([hash.clone(), false]);
        let result = self
            .cached(CacheKey::block_hash(&hash), cancel, move |rpc| async move {
                let value = require_found(rpc.execute(&RpcRequest::read("eth_getBlockByHash", params)).await?, "block")?;
                let height = height_field(&value, "number")
                    .ok_or_else(|| CoreError::Decode { what: "block", reason: "missing number".into() })?;
                Ok(Fetched::at_height(value, height))
            })
            .await;
        not_found_as_none(result.and_then(|v| decode("block", &v)))
    }

    /// Current head block, always from the node.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached or answers garbage.
    pub async fn latest_block(&self, cancel: &CancellationToken) -> Result<BlockHeader, CoreError> {
        let request = RpcRequest::read("eth_getBlockByNumber", json!([block_tag(None), false]));
        let value = require_found(self.uncached(request, cancel).await?, "latest block")?;
        let block: BlockHeader = decode("block", &value)?;
        self.chain.observe_height(block.number);
        Ok(block)
    }

    /// Pending transactions are cached as volatile; mined ones by their block height.
    ///
    /// # Errors
    ///
    /// Any [`CoreError`] except `NotFound`, which is `Ok(None)`.
    pub async fn transaction(
        &self,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TransactionRecord>, CoreError> {
        let hash = hash.trim().to_lowercase();
        let params = json!([hash.clone()]);
        let result = self
            .cached(CacheKey::transaction(&hash), cancel, move |rpc| async move {
                let request = RpcRequest::read("eth_getTransactionByHash", params);
                let value = require_found(rpc.execute(&request).await?, "transaction")?;
                Ok(match height_field(&value, "blockNumber") {
                    Some(height) => Fetched::at_height(value, height),
                    None => Fetched::pending(value),
                })
            })
            .await;
        not_found_as_none(result.and_then(|v| decode("transaction", &v)))
    }

    /// # Errors
    ///
    /// Any [`CoreError`] except `NotFound`, which is `Ok(None)`.
    pub async fn receipt(
        &self,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceiptRecord>, CoreError> {
        let hash = hash.trim().to_lowercase();
        let params = json!([hash.clone()]);
        let result = self
            .cached(CacheKey::receipt(&hash), cancel, move |rpc| async move {
                let request = RpcRequest::read("eth_getTransactionReceipt", params);
                let value = require_found(rpc.execute(&request).await?, "receipt")?;
                Ok(match height_field(&value, "blockNumber") {
                    Some(height) => Fetched::at_height(value, height),
                    None => Fetched::pending(value),
                })
            })
            .await;
        not_found_as_none(result.and_then(|v| decode("receipt", &v)))
    }

    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached or rejects the filter.
    pub async fn logs(&self, filter: &LogFilter, cancel: &CancellationToken) -> Result<Vec<LogRecord>, CoreError> {
        let value = self.uncached(RpcRequest::read("eth_getLogs", filter.to_params()), cancel).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        decode("logs", &value)
    }

    /// Balance in wei at the current tip.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached or answers garbage.
    pub async fn balance(&self, address: &str, cancel: &CancellationToken) -> Result<u128, CoreError> {
        let address = address.trim().to_lowercase();
        let tip = self.tip();
        let params = json!([address.clone(), "latest"]);
        let value = self
            .cached(CacheKey::address_field("balance", &address), cancel, move |rpc| async move {
                let value = rpc.execute(&RpcRequest::read("eth_getBalance", params)).await?;
                Ok(Fetched::snapshot(value, tip))
            })
            .await?;
        decode_quantity("balance", &value)
    }

    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached or answers garbage.
    pub async fn nonce(&self, address: &str, cancel: &CancellationToken) -> Result<u64, CoreError> {
        let address = address.trim().to_lowercase();
        let tip = self.tip();
        let params = json!([address.clone(), "latest"]);
        let value = self
            .cached(CacheKey::address_field("nonce", &address), cancel, move |rpc| async move {
                let value = rpc.execute(&RpcRequest::read("eth_getTransactionCount", params)).await?;
                Ok(Fetched::snapshot(value, tip))
            })
            .await?;
        decode_u64("nonce", &value)
    }

    /// Deployed bytecode, `"0x"` for externally owned accounts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached.
    pub async fn code(&self, address: &str, cancel: &CancellationToken) -> Result<String, CoreError> {
        let address = address.trim().to_lowercase();
        let params = json!([address.clone(), "latest"]);
        let value = self
            .cached(CacheKey::contract_code(&address), cancel, move |rpc| async move {
                let value = rpc.execute(&RpcRequest::read("eth_getCode", params)).await?;
                Ok(Fetched::unscoped(value))
            })
            .await?;
        decode("code", &value)
    }

    /// Balance, nonce and code presence in one cached snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if any of the three lookups fails.
    pub async fn address_info(&self, address: &str, cancel: &CancellationToken) -> Result<AddressInfo, CoreError> {
        let address = address.trim().to_lowercase();
        let tip = self.tip();
        let owned = address.clone();
        let value = self
            .cached(CacheKey::address(&address), cancel, move |rpc| async move {
                let read = |method: &'static str| RpcRequest::read(method, json!([owned.clone(), "latest"]));
                let (balance, nonce, code) =
                    (read("eth_getBalance"), read("eth_getTransactionCount"), read("eth_getCode"));
                let (balance, nonce, code) =
                    futures::try_join!(rpc.execute(&balance), rpc.execute(&nonce), rpc.execute(&code))?;
                let code: String = decode("code", &code)?;
                let info = AddressInfo {
                    address: owned.clone(),
                    balance: decode_quantity("balance", &balance)?,
                    nonce: decode_u64("nonce", &nonce)?,
                    is_contract: code.len() > 2,
                    as_of_block: tip,
                };
                let value = serde_json::to_value(&info).map_err(|e| CoreError::decode("address", &e))?;
                Ok(Fetched::snapshot(value, tip))
            })
            .await?;
        decode("address", &value)
    }

    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached.
    pub async fn gas_prices(&self, cancel: &CancellationToken) -> Result<GasPrices, CoreError> {
        let value = self.uncached(RpcRequest::read("eth_gasPrice", json!([])), cancel).await?;
        Ok(GasPrices::from_node_price(decode_quantity("gas price", &value)?))
    }

    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached.
    pub async fn block_number(&self, cancel: &CancellationToken) -> Result<u64, CoreError> {
        let value = self.uncached(RpcRequest::read("eth_blockNumber", json!([])), cancel).await?;
        let number = decode_u64("block number", &value)?;
        self.chain.observe_height(number);
        Ok(number)
    }

    /// # Errors
    ///
    /// Returns [`CoreError`] if the node cannot be reached.
    pub async fn chain_id(&self, cancel: &CancellationToken) -> Result<u64, CoreError> {
        let value = self.uncached(RpcRequest::read("eth_chainId", json!([])), cancel).await?;
        decode_u64("chain id", &value)
    }

    /// Read-only contract call at `block` (latest when `None`).
    ///
    /// # Errors
    ///
    /// Reverts surface as [`CoreError::Permanent`].
    pub async fn call(
        &self,
        to: &str,
        data: &str,
        block: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<String, CoreError> {
        let params = json!([{ "to": to, "data": data }, block_tag(block)]);
        let value = self.uncached(RpcRequest::read("eth_call", params), cancel).await?;
        decode("call result", &value)
    }

    /// Forwards a transaction signed elsewhere. Exactly one attempt, never cached.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Permanent`] for a payload that is not `0x`-prefixed hex, otherwise
    /// the classified error of the single attempt.
    pub async fn send_raw_transaction(
        &self,
        signed_payload: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CoreError> {
        let payload = signed_payload.trim();
        let body = payload.strip_prefix("0x").unwrap_or_default();
        if body.is_empty() || body.len() % 2 != 0 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::Permanent("signed payload must be 0x-prefixed hex".into()));
        }
        let request = RpcRequest::submit("eth_sendRawTransaction", json!([payload]));
        let value = self.uncached(request, cancel).await?;
        let hash: String = decode("transaction hash", &value)?;
        debug!(hash = %hash, "raw transaction forwarded");
        Ok(hash)
    }

    fn metadata(&self) -> Result<Arc<Dispatcher>, CoreError> {
        self.metadata
            .clone()
            .ok_or_else(|| CoreError::Permanent("block explorer service is not configured".into()))
    }

    /// Verification status and source metadata from the block-explorer service.
    ///
    /// # Errors
    ///
    /// [`CoreError::Permanent`] when no service is configured; any other [`CoreError`] except
    /// `NotFound`, which is `Ok(None)`.
    pub async fn contract_info(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ContractInfo>, CoreError> {
        let metadata = self.metadata()?;
        let address = address.trim().to_lowercase();
        let owned = address.clone();
        let result = self
            .cache
            .get_or_fetch(&CacheKey::contract(&address), cancel, move || async move {
                let request = RpcRequest::read("contract.getsourcecode", json!({ "address": owned.clone() }));
                let value = metadata.execute(&request).await?;
                let info = contract_info_from(&owned, &value)?;
                let value = serde_json::to_value(&info).map_err(|e| CoreError::decode("contract", &e))?;
                Ok(Fetched::unscoped(value))
            })
            .await;
        not_found_as_none(result.and_then(|v| decode("contract", &v)))
    }

    /// # Errors
    ///
    /// [`CoreError::Permanent`] when no service is configured; any other [`CoreError`] except
    /// `NotFound`, which is `Ok(None)`.
    pub async fn token_info(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenInfo>, CoreError> {
        let metadata = self.metadata()?;
        let address = address.trim().to_lowercase();
        let owned = address.clone();
        let result = self
            .cache
            .get_or_fetch(&CacheKey::token(&address), cancel, move || async move {
                let request = RpcRequest::read("token.tokeninfo", json!({ "contractaddress": owned.clone() }));
                let value = metadata.execute(&request).await?;
                let info = token_info_from(&owned, &value)?;
                let value = serde_json::to_value(&info).map_err(|e| CoreError::decode("token", &e))?;
                Ok(Fetched::unscoped(value))
            })
            .await;
        not_found_as_none(result.and_then(|v| decode("token", &v)))
    }
}

fn first_record<'a>(what: &'static str, value: &'a Value) -> Result<&'a Value, CoreError> {
    match value {
        Value::Array(items) => items.first().ok_or_else(|| CoreError::NotFound(what.to_string())),
        Value::Object(_) => Ok(value),
        _ => Err(CoreError::Decode { what, reason: format!("unexpected result {value}") }),
    }
}

fn non_empty(record: &Value, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn contract_info_from(address: &str, value: &Value) -> Result<ContractInfo, CoreError> {
    let record = first_record("contract", value)?;
    let source_code = non_empty(record, "SourceCode");
    let abi = non_empty(record, "ABI").filter(|abi| !abi.starts_with("Contract source code not verified"));
    Ok(ContractInfo {
        address: address.to_string(),
        is_verified: source_code.is_some(),
        contract_name: non_empty(record, "ContractName"),
        compiler_version: non_empty(record, "CompilerVersion"),
        abi,
        source_code,
        implementation: non_empty(record, "Implementation").filter(|i| is_prefixed_hex(i, 40)),
    })
}

fn token_info_from(address: &str, value: &Value) -> Result<TokenInfo, CoreError> {
    let record = first_record("token", value)?;
    Ok(TokenInfo {
        address: address.to_string(),
        name: non_empty(record, "tokenName"),
        symbol: non_empty(record, "symbol"),
        decimals: non_empty(record, "divisor").and_then(|d| d.parse().ok()),
        total_supply: non_empty(record, "totalSupply"),
    })
}
