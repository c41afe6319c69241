pub mod manager;
pub mod openai;

pub use manager::Manager;
pub use openai::OpenAI;

#[cfg(test)]
use mockall::automock;

use crate::{
    config::{BackendConfig, verbose},
    models::{CompletionEvent, CompletionRequest},
};
use async_trait::async_trait;
use eyre::Result;
use futures::stream::BoxStream;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Incremental completion output. The stream ends early, without a
/// [`CompletionEvent::Finish`], when the cancellation token fires.
pub type CompletionStream = BoxStream<'static, Result<CompletionEvent>>;

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Backend {
    fn name(&self) -> &str;
    async fn stream_completion(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream>;
}

pub type ArcBackend = Arc<dyn Backend + Send + Sync>;

pub async fn new_manager(config: &BackendConfig) -> Result<ArcBackend> {
    let connections = config
        .connections
        .iter()
        .filter(|c| c.enabled())
        .collect::<Vec<_>>();
    if connections.is_empty() {
        eyre::bail!("No backend connections configured");
    }

    let mut manager = manager::Manager::default();
    for connection in connections {
        let mut connection = connection.clone();
        if let (None, Some(secs)) = (connection.timeout(), config.timeout_secs) {
            connection = connection.with_timeout(Duration::from_secs(secs as u64));
        }

        let backend: ArcBackend = OpenAI::from(&connection).into();
        let name = backend.name().to_string();
        if let Err(err) = manager.add_connection(backend) {
            log::warn!("  [-] Failed to add backend connection: {}", err);
            continue;
        }
        verbose!("  [+] Added backend: {} ({})", name, connection.kind());
        log::debug!("Added backend connection: {}", name);
    }

    if manager.is_empty() {
        eyre::bail!("No backend connections available");
    }

    Ok(Arc::new(manager))
}
