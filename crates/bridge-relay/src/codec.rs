//! # Ledger Codec
//!
//! Binary encoding of ledger records is an external concern. Handlers reach
//! it through a [`CodecSlot`] that is filled once, asynchronously, at start-up.

use bridge_types::BridgeError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

/// Transaction hashes are 32 bytes.
pub const TX_HASH_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub unit: String,
    pub quantity: String,
}

impl Asset {
    pub fn lovelace(quantity: u64) -> Self {
        Self {
            unit: "lovelace".to_string(),
            quantity: quantity.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRef {
    pub kind: String,
    pub hash: String,
    /// Hex-encoded script; required to encode the reference.
    #[serde(default)]
    pub bytes: Option<String>,
}

/// One unspent transaction output as the wallet reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnspentOutput {
    pub tx_hash: String,
    pub index: u32,
    pub address: String,
    pub amount: Vec<Asset>,
    #[serde(default)]
    pub datum_hash: Option<String>,
    #[serde(default)]
    pub script_ref: Option<ScriptRef>,
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("invalid transaction hash: {0}")]
    InvalidTxHash(String),

    #[error("reference script {0} has no script bytes")]
    MissingScriptBytes(String),

    #[error("invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("encoding failed: {0}")]
    Encoding(String),
}

/// Encodes ledger records to their binary form.
pub trait LedgerCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode_output(&self, output: &UnspentOutput) -> Result<Vec<u8>, CodecError>;
}

#[derive(Serialize)]
struct EncodedScript {
    kind: String,
    bytes: Vec<u8>,
}

#[derive(Serialize)]
struct EncodedOutput<'a> {
    tx_hash: [u8; TX_HASH_LEN],
    index: u32,
    address: &'a str,
    amount: &'a [Asset],
    datum_hash: Option<Vec<u8>>,
    script_ref: Option<EncodedScript>,
}

/// The bundled codec, built on `bincode`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl BincodeCodec {
    fn tx_hash(hash: &str) -> Result<[u8; TX_HASH_LEN], CodecError> {
        let bytes = hex::decode(hash).map_err(|e| CodecError::InvalidTxHash(e.to_string()))?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            CodecError::InvalidTxHash(format!("expected {TX_HASH_LEN} bytes, got {}", bytes.len()))
        })
    }

    fn hex_field(field: &'static str, value: &str) -> Result<Vec<u8>, CodecError> {
        hex::decode(value).map_err(|e| CodecError::InvalidHex {
            field,
            reason: e.to_string(),
        })
    }
}

impl LedgerCodec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode_output(&self, output: &UnspentOutput) -> Result<Vec<u8>, CodecError> {
        let script_ref = match &output.script_ref {
            None => None,
            Some(script) => {
                let bytes = script
                    .bytes
                    .as_deref()
                    .ok_or_else(|| CodecError::MissingScriptBytes(script.hash.clone()))?;
                Some(EncodedScript {
                    kind: script.kind.clone(),
                    bytes: Self::hex_field("scriptRef.bytes", bytes)?,
                })
            }
        };

        let encoded = EncodedOutput {
            tx_hash: Self::tx_hash(&output.tx_hash)?,
            index: output.index,
            address: &output.address,
            amount: &output.amount,
            datum_hash: output
                .datum_hash
                .as_deref()
                .map(|h| Self::hex_field("datumHash", h))
                .transpose()?,
            script_ref,
        };
        bincode::serialize(&encoded).map_err(|e| CodecError::Encoding(e.to_string()))
    }
}

/// Holds the codec once it has been loaded.
#[derive(Default)]
pub struct CodecSlot {
    cell: OnceCell<Arc<dyn LedgerCodec>>,
}

impl CodecSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `loader` unless a codec is already present. Concurrent callers
    /// wait for the same load.
    pub async fn load<F, Fut>(&self, loader: F) -> Result<Arc<dyn LedgerCodec>, CodecError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<dyn LedgerCodec>, CodecError>>,
    {
        let codec = self.cell.get_or_try_init(loader).await?;
        info!(codec = codec.name(), "Ledger codec loaded");
        Ok(codec.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub fn get(&self) -> Result<Arc<dyn LedgerCodec>, BridgeError> {
        self.cell
            .get()
            .cloned()
            .ok_or_else(|| BridgeError::NotInitialized("ledger codec not loaded".into()))
    }
}
