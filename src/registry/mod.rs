use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::{EngineError, ScriptDefinition};

/// Function registry collaborator.
///
/// Storage, listing and publication of script functions live outside the
/// engine; this is the read seam the engine resolves invocations through.
#[async_trait]
pub trait ScriptRegistry: Send + Sync {
    /// Look up a function by title and name.
    ///
    /// With `require_published` set, unpublished definitions resolve to
    /// `None`; without it the latest revision is returned regardless of
    /// publication state (developer test calls).
    async fn lookup(
        &self,
        title_id: &str,
        function_name: &str,
        require_published: bool,
    ) -> Result<Option<ScriptDefinition>, EngineError>;
}

/// In-memory registry for tests and single-process embeddings.
#[derive(Default)]
pub struct InMemoryScriptRegistry {
    scripts: RwLock<HashMap<(String, String), ScriptDefinition>>,
}

impl InMemoryScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a definition. Updates bump the stored version by
    /// one regardless of the version carried by `definition`.
    pub async fn store(&self, mut definition: ScriptDefinition) {
        let key = (
            definition.title_id.clone(),
            definition.function_name.clone(),
        );
        let mut scripts = self.scripts.write().await;
        if let Some(existing) = scripts.get(&key) {
            definition.version = existing.version + 1;
        }
        scripts.insert(key, definition);
    }

    /// Mark a stored definition as published.
    pub async fn publish(&self, title_id: &str, function_name: &str) -> Result<(), EngineError> {
        let key = (title_id.to_string(), function_name.to_string());
        let mut scripts = self.scripts.write().await;
        match scripts.get_mut(&key) {
            Some(definition) => {
                definition.published = true;
                Ok(())
            }
            None => Err(EngineError::FunctionNotFound(
                title_id.to_string(),
                function_name.to_string(),
            )),
        }
    }
}

#[async_trait]
impl ScriptRegistry for InMemoryScriptRegistry {
    async fn lookup(
        &self,
        title_id: &str,
        function_name: &str,
        require_published: bool,
    ) -> Result<Option<ScriptDefinition>, EngineError> {
        let key = (title_id.to_string(), function_name.to_string());
        let scripts = self.scripts.read().await;
        Ok(scripts
            .get(&key)
            .filter(|definition| definition.published || !require_published)
            .cloned())
    }
}
