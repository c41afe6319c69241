#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;

use crate::backend::{ArcBackend, Backend, CompletionStream};
use crate::models::CompletionRequest;
use async_trait::async_trait;
use eyre::{Context, Result, bail};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Routes completions to the connection a persona names as its provider.
#[derive(Default)]
pub struct Manager {
    connections: HashMap<String, ArcBackend>, /* Alias - Backend */
}

impl Manager {
    pub fn add_connection(&mut self, connection: ArcBackend) -> Result<()> {
        let alias = connection.name().to_string();

        if self.connections.contains_key(&alias) {
            bail!(format!("connection {} already exists", alias))
        }

        self.connections.insert(alias, connection);
        Ok(())
    }

    pub fn get_connection(&self, provider: &str) -> Option<&ArcBackend> {
        self.connections.get(provider)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[async_trait]
impl Backend for Manager {
    fn name(&self) -> &str {
        "Manager"
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream> {
        let connection = match self.get_connection(request.provider()) {
            Some(connection) => connection,
            None => {
                return Err(eyre::eyre!(
                    "provider {} is not available",
                    request.provider()
                ));
            }
        };
        let stream = connection
            .stream_completion(request, cancel)
            .await
            .wrap_err(format!("streaming completion from backend {}", connection.name()))?;
        Ok(stream)
    }
}
