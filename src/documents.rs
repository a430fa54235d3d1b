//! Document collaborator contract.
//!
//! Uploads and OCR happen outside the core. The core only asks whether a
//! document has been received for a session; it never sees the bytes.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait DocumentCollaborator: Send + Sync {
    async fn has_document(&self, session_id: Uuid) -> bool;
}

/// Tracks "document received" signals in memory.
#[derive(Default)]
pub struct InMemoryDocuments {
    received: RwLock<HashSet<Uuid>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the upload service received a document for `session_id`.
    pub async fn mark_received(&self, session_id: Uuid) {
        debug!(session_id = %session_id, "Document received");
        self.received.write().await.insert(session_id);
    }
}

#[async_trait]
impl DocumentCollaborator for InMemoryDocuments {
    async fn has_document(&self, session_id: Uuid) -> bool {
        self.received.read().await.contains(&session_id)
    }
}
