//! System-bus capability seam.
//!
//! The real transport (D-Bus on the managed platform) lives outside this
//! service. The engine consumes only the narrow capability defined here:
//! subscribe to a match rule and receive raw property-bag notifications,
//! plus the method-call entry point callers use to start operations.
//! [`LoopbackBus`] is the in-process implementation used by the binary's
//! default wiring and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Errors surfaced by the bus capability.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("subscription rejected: {0}")]
    SubscribeRejected(String),

    #[error("no handler registered for {path} {method}")]
    NoSuchMethod { path: String, method: String },

    #[error("bus call failed: {0}")]
    CallFailed(String),

    #[error("signal delivery error: {0}")]
    Signal(String),
}

/// Raw property-changed notification payload.
///
/// The engine never parses this; each caller validates it once at the
/// boundary into its own typed signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notification {
    pub path: String,
    pub interface: String,
    pub properties: serde_json::Map<String, Value>,
}

impl Notification {
    /// Build a properties-changed notification from a JSON object.
    pub fn property_changed(
        path: impl Into<String>,
        interface: impl Into<String>,
        properties: Value,
    ) -> Self {
        Self {
            path: path.into(),
            interface: interface.into(),
            properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }
}

/// One delivery from a subscription: the (error, payload) pair the
/// underlying transport produces.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub error: Option<BusError>,
    pub notification: Notification,
}

impl SignalEvent {
    pub fn ok(notification: Notification) -> Self {
        Self { error: None, notification }
    }

    pub fn err(error: BusError) -> Self {
        Self { error: Some(error), notification: Notification::default() }
    }
}

/// An open notification subscription. Dropping it unsubscribes.
///
/// Events published before the subscription was opened are never
/// replayed.
pub struct Subscription {
    rx: mpsc::Receiver<SignalEvent>,
    closed: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    /// Next matching event; `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<SignalEvent> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.rx.recv().await
    }

    /// Tear down the subscription. Idempotent, safe even if the
    /// subscription never matched anything.
    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.active.fetch_sub(1, Ordering::AcqRel);
            self.rx.close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// The asynchronous publish/subscribe and method-call transport.
#[async_trait]
pub trait SystemBus: Send + Sync {
    /// Register interest in notifications matching `rule`.
    async fn subscribe(&self, rule: &str) -> Result<Subscription, BusError>;

    /// Invoke a method on a bus object.
    async fn call(
        &self,
        service: &str,
        path: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, BusError>;
}

/// Build the standard properties-changed match rule for an object path.
pub fn properties_changed_rule(path: &str) -> String {
    format!(
        "type='signal',interface='org.freedesktop.DBus.Properties',\
         member='PropertiesChanged',path='{path}'"
    )
}

/// Extract the `path='...'` component of a match rule.
pub fn rule_path(rule: &str) -> Option<&str> {
    let start = rule.find("path='")? + "path='".len();
    let rest = &rule[start..];
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

type MethodHandler = Box<dyn Fn(Value) -> Result<Value, BusError> + Send + Sync>;

struct Subscriber {
    path: String,
    tx: mpsc::Sender<SignalEvent>,
    closed: Arc<AtomicBool>,
}

/// In-process bus: publish/subscribe keyed by object path plus a method
/// handler table.
///
/// Tracks subscription accounting so tests can assert that no
/// subscription outlives its task.
#[derive(Default)]
pub struct LoopbackBus {
    subscribers: Mutex<Vec<Subscriber>>,
    methods: Mutex<HashMap<(String, String), MethodHandler>>,
    opened: AtomicUsize,
    active: Arc<AtomicUsize>,
    fail_next_subscribe: AtomicBool,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `call` on `path`/`method`.
    pub async fn register_method<F>(&self, path: &str, method: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value, BusError> + Send + Sync + 'static,
    {
        self.methods
            .lock()
            .await
            .insert((path.to_string(), method.to_string()), Box::new(handler));
    }

    /// Deliver a notification to every subscription matching its path.
    pub async fn publish(&self, notification: Notification) {
        self.dispatch(SignalEvent::ok(notification)).await;
    }

    /// Deliver a transport-level error to subscriptions on `path`.
    pub async fn publish_error(&self, path: &str, error: BusError) {
        let mut event = SignalEvent::err(error);
        event.notification.path = path.to_string();
        self.dispatch(event).await;
    }

    async fn dispatch(&self, event: SignalEvent) {
        let targets: Vec<mpsc::Sender<SignalEvent>> = {
            let mut subscribers = self.subscribers.lock().await;
            subscribers.retain(|s| !s.closed.load(Ordering::Acquire) && !s.tx.is_closed());
            subscribers
                .iter()
                .filter(|s| s.path == event.notification.path)
                .map(|s| s.tx.clone())
                .collect()
        };
        // a subscriber that stopped draining must not stall the bus, so
        // its overflow is dropped instead of awaited
        for tx in targets {
            if tx.try_send(event.clone()).is_err() {
                tracing::warn!(
                    path = %event.notification.path,
                    "dropping signal for slow subscriber"
                );
            }
        }
    }

    /// Total subscriptions ever opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    /// Currently open subscriptions.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Make the next `subscribe` fail, exercising the creation-failure
    /// path.
    pub fn fail_next_subscribe(&self) {
        self.fail_next_subscribe.store(true, Ordering::Release);
    }
}

#[async_trait]
impl SystemBus for LoopbackBus {
    async fn subscribe(&self, rule: &str) -> Result<Subscription, BusError> {
        if self.fail_next_subscribe.swap(false, Ordering::AcqRel) {
            return Err(BusError::SubscribeRejected("injected failure".to_string()));
        }
        let path = rule_path(rule)
            .ok_or_else(|| BusError::SubscribeRejected(format!("match rule has no path: {rule}")))?
            .to_string();

        let (tx, rx) = mpsc::channel(32);
        let closed = Arc::new(AtomicBool::new(false));
        self.subscribers.lock().await.push(Subscriber {
            path,
            tx,
            closed: Arc::clone(&closed),
        });
        self.opened.fetch_add(1, Ordering::AcqRel);
        self.active.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(rule, "opened bus subscription");
        Ok(Subscription { rx, closed, active: Arc::clone(&self.active) })
    }

    async fn call(
        &self,
        _service: &str,
        path: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, BusError> {
        let methods = self.methods.lock().await;
        let handler = methods
            .get(&(path.to_string(), method.to_string()))
            .ok_or_else(|| BusError::NoSuchMethod {
                path: path.to_string(),
                method: method.to_string(),
            })?;
        handler(args)
    }
}
