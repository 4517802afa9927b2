//! Dispatch registry
//!
//! Routes inbound messages by type to at most one handler and to any number
//! of listeners. Each callee runs in its own task with its own copy of the
//! message, so an error or panic in one never reaches the others.

use async_trait::async_trait;
use lumen_core::domain::message::Message;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

/// Something that reacts to an inbound message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

/// Wraps an async closure as a handler
///
/// The returned `Arc` is also the listener's identity for
/// [`DispatchRegistry::remove_event_listener`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Default)]
struct Routes {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    listeners: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
}

/// Type-keyed handler and listener table
#[derive(Default)]
pub struct DispatchRegistry {
    routes: RwLock<Routes>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Routes> {
        self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Routes> {
        self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets the handler for `kind`, replacing any previous one
    pub fn register_handler(&self, kind: &str, handler: Arc<dyn MessageHandler>) {
        if self.write().handlers.insert(kind.to_string(), handler).is_some() {
            debug!("Replaced handler for '{}'", kind);
        }
    }

    pub fn add_event_listener(&self, kind: &str, listener: Arc<dyn MessageHandler>) {
        self.write()
            .listeners
            .entry(kind.to_string())
            .or_default()
            .push(listener);
    }

    /// Removes the first listener for `kind` that is `listener` itself
    ///
    /// Returns whether one was removed.
    pub fn remove_event_listener(&self, kind: &str, listener: &Arc<dyn MessageHandler>) -> bool {
        let mut routes = self.write();
        let Some(listeners) = routes.listeners.get_mut(kind) else {
            return false;
        };

        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    #[allow(dead_code)]
    pub fn listener_count(&self, kind: &str) -> usize {
        self.read().listeners.get(kind).map_or(0, Vec::len)
    }

    /// Routes one inbound message to its handler, then to its listeners
    pub async fn dispatch(&self, message: Message) {
        let Some(kind) = message.kind().map(str::to_string) else {
            warn!("Dropping message without a type: {:?}", message.fields);
            return;
        };

        let handler = self.read().handlers.get(&kind).cloned();
        match handler {
            Some(handler) => invoke(&kind, "Handler", handler, message.clone()).await,
            None => debug!("No handler for '{}'", kind),
        }

        self.notify_listeners(&kind, &message).await;
    }

    /// Delivers `message` to every listener of `kind`, in registration order
    pub async fn notify_listeners(&self, kind: &str, message: &Message) {
        let listeners = self.read().listeners.get(kind).cloned().unwrap_or_default();
        for listener in listeners {
            invoke(kind, "Listener", listener, message.clone()).await;
        }
    }
}

async fn invoke(kind: &str, role: &str, callee: Arc<dyn MessageHandler>, message: Message) {
    let task = tokio::spawn(async move { callee.handle(message).await });

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("{} for '{}' failed: {:#}", role, kind, e),
        Err(e) => error!("{} for '{}' panicked: {}", role, kind, e),
    }
}
