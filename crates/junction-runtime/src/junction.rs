//! Assembly of a ready-to-use dispatch engine from configuration.

use std::sync::Arc;

use junction_core::{Dispatcher, PriorityRegistry};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::{ConfigLoader, JunctionConfig, validate_config};
use crate::error::RuntimeResult;
use crate::queue::TokioQueue;

/// A registry, a configured dispatcher and, inside a tokio runtime, a queue
/// worker for queued handlers.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let junction = Junction::load()?;
///     junction.registry().register(audit_handler(), priority::LOW);
///
///     let order = junction.dispatcher().dispatch(OrderPlaced::new(42))?;
///
///     junction.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Junction {
    config: JunctionConfig,
    registry: Arc<PriorityRegistry>,
    dispatcher: Arc<Dispatcher>,
    queue: Option<Arc<TokioQueue>>,
}

impl Junction {
    /// Loads configuration from the default sources and assembles the engine.
    pub fn load() -> RuntimeResult<Self> {
        let config = ConfigLoader::new().load()?;
        Self::from_config(&config)
    }

    /// Assembles the engine described by `config`.
    ///
    /// Without a running tokio runtime no queue worker is started, and
    /// dispatching a queued handler reports that no queue is configured.
    pub fn from_config(config: &JunctionConfig) -> RuntimeResult<Self> {
        validate_config(config)?;

        let registry = Arc::new(PriorityRegistry::new());
        let mut dispatcher =
            Dispatcher::new(Arc::clone(&registry)).with_config(config.dispatcher_config());

        let queue = match Handle::try_current() {
            Ok(handle) => {
                let queue = Arc::new(TokioQueue::spawn_on(
                    &handle,
                    config.queue.default_queue.clone(),
                    config.queue.capacity,
                ));
                dispatcher = dispatcher.with_queue(queue.clone());
                Some(queue)
            }
            Err(_) => {
                debug!("No tokio runtime, queue worker not started");
                None
            }
        };

        info!(
            graceful = config.dispatcher.graceful,
            strict = config.dispatcher.strict,
            debug = config.dispatcher.debug,
            breaker = config.circuit_breaker.enabled,
            queue = queue.is_some(),
            "Junction assembled"
        );

        Ok(Self {
            config: config.clone(),
            registry,
            dispatcher: Arc::new(dispatcher),
            queue,
        })
    }

    /// The configuration the engine was assembled from.
    pub fn config(&self) -> &JunctionConfig {
        &self.config
    }

    /// The registry handlers are registered into.
    pub fn registry(&self) -> &Arc<PriorityRegistry> {
        &self.registry
    }

    /// The dispatcher, configured from the `dispatcher` and
    /// `circuit_breaker` sections.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The queue worker, if one was started.
    pub fn queue(&self) -> Option<&Arc<TokioQueue>> {
        self.queue.as_ref()
    }

    /// Stops the queue worker, waiting for in-flight attempts.
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Junction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Junction")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
