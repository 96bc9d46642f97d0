//! Adapter Bridge - External collaborator interface for fetching records
//!
//! The store never speaks a wire protocol itself; it requests records by id
//! list or by opaque link through this bridge and treats the returned
//! payloads opaquely. Retry policy belongs to the adapter, not the store.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::record::{RecordId, RecordIdentity, TypeKey};
use crate::relationships::metadata::RelationshipMeta;

/// Raw record payload as produced by the adapter/serializer pair
pub type RawRecord = Value;

/// Adapter-side failure surfaced to the store
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<AdapterError> for StoreError {
    fn from(err: AdapterError) -> Self {
        StoreError::Adapter(err.to_string())
    }
}

/// The network-facing collaborator the resolver fetches through
///
/// All three operations return raw payloads; materialization into record
/// cells happens in the store against the shared identity map.
#[async_trait]
pub trait AdapterBridge: Send + Sync {
    /// Fetch a single record by type and id
    async fn find(&self, type_key: &TypeKey, id: &RecordId) -> Result<RawRecord, AdapterError>;

    /// Fetch a batch of records of one type by id list
    async fn find_many(
        &self,
        type_key: &TypeKey,
        ids: &[RecordId],
    ) -> Result<Vec<RawRecord>, AdapterError>;

    /// Fetch the membership of a has-many relationship via an opaque link
    async fn find_has_many(
        &self,
        owner: &RecordIdentity,
        link: &str,
        meta: &RelationshipMeta,
    ) -> Result<Vec<RawRecord>, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_converts_to_store_error() {
        let err: StoreError = AdapterError::Request("connection refused".to_string()).into();
        assert_eq!(
            err,
            StoreError::Adapter("request failed: connection refused".to_string())
        );
    }

    #[test]
    fn test_opaque_error_passthrough() {
        let inner = anyhow::anyhow!("tls handshake failed");
        let err: StoreError = AdapterError::from(inner).into();
        assert!(matches!(err, StoreError::Adapter(msg) if msg.contains("tls handshake failed")));
    }
}
