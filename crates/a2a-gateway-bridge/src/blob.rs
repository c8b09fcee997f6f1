//! Typed opaque payloads carried through the central store.

use a2a_gateway_core::GatewayError;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// How the bytes of a [`TypedBlob`] are to be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobType {
    /// serde JSON document.
    Json,
    /// Raw binary.
    Bytes,
}

/// Serialized payload the bridge stores without interpreting.
///
/// On the wire: `{"type": "json" | "bytes", "data": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedBlob {
    #[serde(rename = "type")]
    pub blob_type: BlobType,
    /// Base64 encoded payload.
    pub data: String,
}

impl TypedBlob {
    /// Encode any serde value as a JSON blob.
    ///
    /// # Errors
    /// Returns `Serialization` if the value cannot be serialized.
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, GatewayError> {
        let bytes = serde_json::to_vec(value).map_err(|e| GatewayError::Serialization {
            context: "blob.encode(type=json)".into(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            blob_type: BlobType::Json,
            data: BASE64.encode(bytes),
        })
    }

    /// Wrap raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            blob_type: BlobType::Bytes,
            data: BASE64.encode(bytes),
        }
    }

    /// Decode the raw payload, whatever its type.
    ///
    /// # Errors
    /// Returns `Serialization` if `data` is not valid base64.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GatewayError> {
        BASE64.decode(&self.data).map_err(|e| GatewayError::Serialization {
            context: format!("blob.decode(type={})", self.type_name()),
            detail: e.to_string(),
        })
    }

    /// Decode a JSON blob into `T`.
    ///
    /// # Errors
    /// Returns `Serialization` for a bytes blob, bad base64 or a document
    /// that does not match `T`.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        if self.blob_type != BlobType::Json {
            return Err(GatewayError::Serialization {
                context: format!("blob.decode(type={})", self.type_name()),
                detail: "expected a json blob".into(),
            });
        }
        let bytes = self.to_bytes()?;
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Serialization {
            context: "blob.decode(type=json)".into(),
            detail: e.to_string(),
        })
    }

    const fn type_name(&self) -> &'static str {
        match self.blob_type {
            BlobType::Json => "json",
            BlobType::Bytes => "bytes",
        }
    }
}
