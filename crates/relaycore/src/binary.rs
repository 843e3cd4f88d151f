//! Binary data collaborator.
//!
//! The engine never looks at binary bytes. Nodes store bytes through the
//! service and thread the returned [`BinaryRef`] handles through item
//! attachments.

use crate::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Handle to a stored binary blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryMetadata {
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[async_trait]
pub trait BinaryDataService: Send + Sync {
    async fn store(&self, data: Vec<u8>, metadata: BinaryMetadata) -> Result<BinaryRef, StoreError>;

    async fn retrieve(&self, handle: &BinaryRef) -> Result<Vec<u8>, StoreError>;
}

/// In-process binary store, used by the CLI and tests
#[derive(Clone, Default)]
pub struct MemoryBinaryStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBinaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BinaryDataService for MemoryBinaryStore {
    async fn store(
        &self,
        data: Vec<u8>,
        metadata: BinaryMetadata,
    ) -> Result<BinaryRef, StoreError> {
        let handle = BinaryRef {
            id: Uuid::new_v4().to_string(),
            file_name: metadata.file_name,
            mime_type: metadata.mime_type,
            size: data.len(),
        };
        self.blobs.write().await.insert(handle.id.clone(), data);
        Ok(handle)
    }

    async fn retrieve(&self, handle: &BinaryRef) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .await
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("binary {}", handle.id)))
    }
}
