use relaycore::ExecutionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Process-wide map of running executions to their cancellation sources
#[derive(Clone, Default)]
pub struct ExecutionManager {
    active: Arc<RwLock<HashMap<ExecutionId, CancellationToken>>>,
}

impl ExecutionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, execution_id: &str, token: CancellationToken) {
        tracing::debug!("Registering execution {}", execution_id);
        self.active
            .write()
            .await
            .insert(execution_id.to_string(), token);
    }

    pub async fn unregister(&self, execution_id: &str) {
        self.active.write().await.remove(execution_id);
    }

    /// Trip the execution's cancellation source.
    ///
    /// Returns false when no execution with that id is running.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        match self.active.read().await.get(execution_id) {
            Some(token) => {
                tracing::info!("Cancellation requested for execution {}", execution_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, execution_id: &str) -> Option<CancellationToken> {
        self.active.read().await.get(execution_id).cloned()
    }

    pub async fn is_running(&self, execution_id: &str) -> bool {
        self.active.read().await.contains_key(execution_id)
    }

    /// Ids of registered executions, sorted
    pub async fn list_running(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = self.active.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_trips_registered_token() {
        let manager = ExecutionManager::new();
        let token = CancellationToken::new();
        manager.register("e1", token.clone()).await;

        assert!(manager.is_running("e1").await);
        assert!(manager.cancel("e1").await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn unknown_or_unregistered_ids_are_ignored() {
        let manager = ExecutionManager::new();
        assert!(!manager.cancel("missing").await);

        let token = CancellationToken::new();
        manager.register("e1", token.clone()).await;
        manager.unregister("e1").await;

        assert!(!manager.cancel("e1").await);
        assert!(!token.is_cancelled());
        assert!(manager.list_running().await.is_empty());
    }
}
