//! User-supplied lifecycle hooks.
//!
//! Every hook is optional and cloneable, so the same [`Callbacks`] can be
//! shared between the manager task and the public `Client` handle. Each
//! invocation runs on its own `tokio::spawn`'d task, so a hook that blocks or
//! panics cannot wedge the connection manager; a panic is caught via the
//! task's `JoinHandle` and logged rather than propagated.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::error;

use crate::error::Error;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A boxed, cheaply-clonable async callback.
pub type AsyncHook = Arc<dyn Fn() -> BoxFuture + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(Error) -> BoxFuture + Send + Sync>;

#[derive(Clone, Default)]
pub struct Callbacks {
    pub connected: Option<AsyncHook>,
    pub disconnected: Option<AsyncHook>,
    pub reconnected: Option<AsyncHook>,
    pub closed: Option<AsyncHook>,
    pub error: Option<ErrorHook>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("reconnected", &self.reconnected.is_some())
            .field("closed", &self.closed.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl Callbacks {
    pub async fn fire_connected(&self) {
        if let Some(hook) = &self.connected {
            if let Some(msg) = run_guarded("connected_cb", hook()).await {
                self.fire_error(Error::InvalidCallbackType(msg)).await;
            }
        }
    }

    pub async fn fire_disconnected(&self) {
        if let Some(hook) = &self.disconnected {
            if let Some(msg) = run_guarded("disconnected_cb", hook()).await {
                self.fire_error(Error::InvalidCallbackType(msg)).await;
            }
        }
    }

    pub async fn fire_reconnected(&self) {
        if let Some(hook) = &self.reconnected {
            if let Some(msg) = run_guarded("reconnected_cb", hook()).await {
                self.fire_error(Error::InvalidCallbackType(msg)).await;
            }
        }
    }

    pub async fn fire_closed(&self) {
        if let Some(hook) = &self.closed {
            if let Some(msg) = run_guarded("closed_cb", hook()).await {
                self.fire_error(Error::InvalidCallbackType(msg)).await;
            }
        }
    }

    /// Reports an error via `error_cb`, or logs it directly if no hook is
    /// registered. A panicking `error_cb` is only ever logged, never
    /// re-reported through itself.
    pub async fn fire_error(&self, err: Error) {
        match &self.error {
            Some(hook) => {
                if let Some(msg) = run_guarded("error_cb", hook(err)).await {
                    error!(callback = "error_cb", panic = %msg, "error_cb itself panicked");
                }
            }
            None => error!(error = %err, "unhandled client error (no error_cb registered)"),
        }
    }
}

/// Runs `fut` on its own task so a panicking callback can't wedge the caller.
/// Returns the panic payload as a string if it panicked.
async fn run_guarded(name: &'static str, fut: BoxFuture) -> Option<String> {
    match tokio::spawn(fut).await {
        Ok(()) => None,
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(callback = name, panic = %msg, "user callback panicked");
            Some(msg)
        }
        Err(join_err) => {
            error!(callback = name, error = %join_err, "callback task failed to complete");
            Some(join_err.to_string())
        }
    }
}
