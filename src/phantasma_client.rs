use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

use crate::errors::SyncError;
use crate::models::token_flags;

pub const DEFAULT_RPC_URL: &str = "http://localhost:7077/rpc";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AppRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub symbol: String,
    pub name: String,
    #[serde(deserialize_with = "de_i64_or_string_as_i64")]
    pub decimals: i64,
    #[serde(deserialize_with = "de_token_flags")]
    pub flags: i32,
    #[serde(
        rename(deserialize = "maxSupply"),
        deserialize_with = "de_number_or_string_as_decimal"
    )]
    pub max_supply: BigDecimal,
    #[serde(
        rename(deserialize = "currentSupply"),
        deserialize_with = "de_number_or_string_as_decimal"
    )]
    pub current_supply: BigDecimal,
    #[serde(rename(deserialize = "ownerAddress"), default)]
    pub owner_address: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ChainRecord {
    pub name: String,
    pub address: String,
    #[serde(rename(deserialize = "parentAddress"), default)]
    pub parent_address: Option<String>,
    #[serde(deserialize_with = "de_i64_or_string_as_i64")]
    pub height: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EventRecord {
    #[serde(default)]
    pub data: String,
    #[serde(rename(deserialize = "eventAddress"))]
    pub event_address: String,
    #[serde(
        rename(deserialize = "evtKind"),
        alias = "kind",
        deserialize_with = "de_string_or_number_as_string"
    )]
    pub event_kind: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    #[serde(rename(deserialize = "txid"), alias = "hash")]
    pub hash: String,
    #[serde(deserialize_with = "de_i64_or_string_as_i64")]
    pub timestamp: i64,
    #[serde(default)]
    pub script: String,
    #[serde(default, deserialize_with = "de_optional_string")]
    pub result: String,
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub hash: String,
    #[serde(rename(deserialize = "previousHash"), default)]
    pub previous_hash: String,
    #[serde(deserialize_with = "de_i64_or_string_as_i64")]
    pub timestamp: i64,
    #[serde(deserialize_with = "de_i64_or_string_as_i64")]
    pub height: i64,
    #[serde(default)]
    pub payload: String,
    #[serde(default = "zero", deserialize_with = "de_number_or_string_as_decimal")]
    pub reward: BigDecimal,
    #[serde(rename(deserialize = "validatorAddress"), default)]
    pub validator_address: String,
    #[serde(rename(deserialize = "txs"), alias = "transactions", default)]
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TokenBalanceRecord {
    pub symbol: String,
    #[serde(rename(deserialize = "chainName"), alias = "chain")]
    pub chain_name: String,
    #[serde(default = "zero", deserialize_with = "de_number_or_string_as_decimal")]
    pub amount: BigDecimal,
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AccountRecord {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename(deserialize = "tokens"), alias = "balances", default)]
    pub token_balances: Vec<TokenBalanceRecord>,
}

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

fn de_i64_or_string_as_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(num) => num
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("expected an integer")),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("expected a number or a string")),
    }
}

fn de_number_or_string_as_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BigDecimal, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(num) => BigDecimal::from_str(&num.to_string()).map_err(serde::de::Error::custom),
        Value::String(s) => BigDecimal::from_str(&s).map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("expected a number or a string")),
    }
}

fn de_string_or_number_as_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(num) => Ok(num.to_string()),
        _ => Err(serde::de::Error::custom("expected a string or a number")),
    }
}

fn de_optional_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Flags come either as the raw bit set or as a comma separated list of names.
fn de_token_flags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(num) => num
            .as_i64()
            .map(|n| n as i32)
            .ok_or_else(|| serde::de::Error::custom("expected an integer")),
        Value::String(s) => match s.trim().parse::<i32>() {
            Ok(bits) => Ok(bits),
            Err(_) => parse_flag_names(&s).map_err(serde::de::Error::custom),
        },
        _ => Err(serde::de::Error::custom("expected a number or a string")),
    }
}

pub fn parse_flag_names(names: &str) -> Result<i32, String> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "None")
        .try_fold(0, |flags, name| match name {
            "Transferable" => Ok(flags | token_flags::TRANSFERABLE),
            "Fungible" => Ok(flags | token_flags::FUNGIBLE),
            "Finite" => Ok(flags | token_flags::FINITE),
            "Divisible" => Ok(flags | token_flags::DIVISIBLE),
            other => Err(format!("unknown token flag {}", other)),
        })
}

/// Read operations of the node the synchronizer depends on.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_apps(&self) -> Result<Vec<AppRecord>, SyncError>;
    async fn get_tokens(&self) -> Result<Vec<TokenRecord>, SyncError>;
    async fn get_chains(&self) -> Result<Vec<ChainRecord>, SyncError>;
    async fn get_block_height(&self, chain_address: &str) -> Result<i64, SyncError>;
    async fn get_block_by_height(
        &self,
        chain_address: &str,
        height: i64,
    ) -> Result<BlockRecord, SyncError>;
    async fn get_account(&self, address: &str) -> Result<AccountRecord, SyncError>;
}

#[derive(Deserialize, Debug)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

/// JSON-RPC client for a Phantasma node.
#[derive(Clone)]
pub struct PhantasmaClient {
    client: reqwest::Client,
    url: Url,
}

impl PhantasmaClient {
    pub fn new(url: &str) -> Result<PhantasmaClient, SyncError> {
        let url = Url::parse(url).map_err(|e| SyncError::unavailable("connect", e))?;
        Ok(PhantasmaClient {
            client: reqwest::Client::new(),
            url,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SyncError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::unavailable(method, e))?
            .error_for_status()
            .map_err(|e| SyncError::unavailable(method, e))?;
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::unavailable(method, e))?;
        log::debug!("{} response: {}", method, text);
        decode_response(method, &text)
    }
}

pub fn decode_response<T: DeserializeOwned>(method: &str, text: &str) -> Result<T, SyncError> {
    let response = serde_json::from_str::<RpcResponse>(text)
        .map_err(|e| SyncError::malformed(method, e.to_string()))?;
    if let Some(error) = response.error {
        return Err(SyncError::malformed(
            method,
            format!("error {}: {}", error.code, error.message),
        ));
    }
    let result = response
        .result
        .ok_or_else(|| SyncError::malformed(method, "missing result"))?;
    // The node reports some failures as {"error": "..."} inside the result.
    if let Some(message) = result.get("error").and_then(Value::as_str) {
        return Err(SyncError::malformed(method, message.to_string()));
    }
    serde_json::from_value(result).map_err(|e| SyncError::malformed(method, e.to_string()))
}

#[async_trait]
impl ChainRpc for PhantasmaClient {
    async fn get_apps(&self) -> Result<Vec<AppRecord>, SyncError> {
        self.call("getApps", serde_json::json!([])).await
    }

    async fn get_tokens(&self) -> Result<Vec<TokenRecord>, SyncError> {
        self.call("getTokens", serde_json::json!([])).await
    }

    async fn get_chains(&self) -> Result<Vec<ChainRecord>, SyncError> {
        self.call("getChains", serde_json::json!([])).await
    }

    async fn get_block_height(&self, chain_address: &str) -> Result<i64, SyncError> {
        let height: Value = self
            .call("getBlockHeight", serde_json::json!([chain_address]))
            .await?;
        let parsed = match &height {
            Value::Number(num) => num.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| SyncError::malformed("getBlockHeight", format!("bad height {}", height)))
    }

    async fn get_block_by_height(
        &self,
        chain_address: &str,
        height: i64,
    ) -> Result<BlockRecord, SyncError> {
        self.call(
            "getBlockByHeight",
            serde_json::json!([chain_address, height]),
        )
        .await
    }

    async fn get_account(&self, address: &str) -> Result<AccountRecord, SyncError> {
        self.call("getAccount", serde_json::json!([address])).await
    }
}
