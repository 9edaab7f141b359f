//! Event routing
//!
//! Handlers register against an event pattern and an optional action
//! pattern. `*` matches anything; every other pattern is an exact,
//! case-sensitive comparison. The registry is built once at startup and is
//! read-only afterwards.

use async_trait::async_trait;
use hookwise_core::WebhookDelivery;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Pattern segment matching any value
pub const WILDCARD: &str = "*";

/// Event or action pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Exact(String),
}

impl Pattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == WILDCARD {
            Pattern::Any
        } else {
            Pattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => expected == value,
        }
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Self {
        Pattern::parse(pattern)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Any => write!(f, "{}", WILDCARD),
            Pattern::Exact(value) => write!(f, "{}", value),
        }
    }
}

/// What a handler receives: the persisted delivery and its parsed body
#[derive(Debug, Clone)]
pub struct EventContext {
    pub delivery: WebhookDelivery,
    pub payload: serde_json::Value,
}

impl EventContext {
    pub fn new(delivery: WebhookDelivery, payload: serde_json::Value) -> Self {
        Self { delivery, payload }
    }

    pub fn event(&self) -> &str {
        self.delivery.event()
    }

    pub fn action(&self) -> Option<&str> {
        self.delivery.action()
    }
}

/// Handler failures
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::InvalidPayload(e.to_string())
    }
}

/// Event handler invoked for matching deliveries
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &EventContext) -> Result<(), HandlerError>;
}

/// Produces a handler instance for one dispatch
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn EventHandler> + Send + Sync>;

/// One entry in the registry
#[derive(Clone)]
pub struct EventRegistration {
    pub event: Pattern,
    /// `None` matches any action, including deliveries without one
    pub action: Option<Pattern>,
    pub handler_id: String,
    factory: HandlerFactory,
}

impl EventRegistration {
    pub fn matches(&self, event: &str, action: Option<&str>) -> bool {
        if !self.event.matches(event) {
            return false;
        }
        match (&self.action, action) {
            (None, _) | (Some(Pattern::Any), _) => true,
            (Some(Pattern::Exact(expected)), Some(actual)) => expected == actual,
            (Some(Pattern::Exact(_)), None) => false,
        }
    }

    pub fn handler(&self) -> Arc<dyn EventHandler> {
        (self.factory)()
    }
}

impl std::fmt::Debug for EventRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistration")
            .field("event", &self.event)
            .field("action", &self.action)
            .field("handler_id", &self.handler_id)
            .finish()
    }
}

/// Immutable set of registrations
#[derive(Debug, Clone)]
pub struct EventRegistry {
    registrations: Arc<[EventRegistration]>,
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    /// Registrations matching `event`/`action`, in registration order
    pub fn resolve(&self, event: &str, action: Option<&str>) -> Vec<&EventRegistration> {
        self.registrations
            .iter()
            .filter(|r| r.matches(event, action))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRegistration> {
        self.registrations.iter()
    }
}

#[derive(Default)]
pub struct EventRegistryBuilder {
    registrations: Vec<EventRegistration>,
}

impl EventRegistryBuilder {
    /// Register a factory producing a handler per dispatch
    pub fn register(
        mut self,
        event: &str,
        action: Option<&str>,
        handler_id: impl Into<String>,
        factory: HandlerFactory,
    ) -> Self {
        self.registrations.push(EventRegistration {
            event: Pattern::parse(event),
            action: action.map(Pattern::parse),
            handler_id: handler_id.into(),
            factory,
        });
        self
    }

    /// Register a shared handler instance
    pub fn register_handler<H>(
        self,
        event: &str,
        action: Option<&str>,
        handler_id: impl Into<String>,
        handler: Arc<H>,
    ) -> Self
    where
        H: EventHandler + 'static,
    {
        let factory: HandlerFactory = Arc::new(move || handler.clone() as Arc<dyn EventHandler>);
        self.register(event, action, handler_id, factory)
    }

    pub fn build(self) -> EventRegistry {
        EventRegistry {
            registrations: self.registrations.into(),
        }
    }
}

/// A handler that returned an error
#[derive(Debug, Clone, Serialize)]
pub struct HandlerFailure {
    pub handler_id: String,
    pub error: String,
}

/// Result of running every matching handler once
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Handler ids invoked, in order
    pub invoked: Vec<String>,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// One line per failure, for replay task bookkeeping
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.handler_id, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub(crate) fn record(&mut self, handler_id: &str, result: Result<(), HandlerError>) {
        self.invoked.push(handler_id.to_string());
        if let Err(e) = result {
            self.failures.push(HandlerFailure {
                handler_id: handler_id.to_string(),
                error: e.to_string(),
            });
        }
    }
}

/// Runs matching handlers for a persisted delivery
#[derive(Debug, Clone)]
pub struct EventRouter {
    registry: Arc<EventRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Invoke each matching handler once, sequentially.
    ///
    /// A failing handler does not stop the others. No match is not an error.
    pub async fn dispatch(&self, ctx: &EventContext) -> DispatchReport {
        let mut report = DispatchReport::default();
        let matches = self.registry.resolve(ctx.event(), ctx.action());

        if matches.is_empty() {
            debug!(
                delivery_id = %ctx.delivery.id(),
                event = %ctx.delivery.qualified_event(),
                "No handlers registered"
            );
            return report;
        }

        for registration in matches {
            let result = registration.handler().handle(ctx).await;
            if let Err(e) = &result {
                warn!(
                    delivery_id = %ctx.delivery.id(),
                    handler_id = %registration.handler_id,
                    error = %e,
                    "Event handler failed"
                );
            }
            report.record(&registration.handler_id, result);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwise_core::DeliveryId;
    use parking_lot::Mutex;

    struct Recording {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Recording {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle(&self, ctx: &EventContext) -> Result<(), HandlerError> {
            self.calls.lock().push(ctx.delivery.qualified_event());
            if self.fail {
                Err(HandlerError::Failed("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn context(event: &str, action: Option<&str>) -> EventContext {
        let delivery = WebhookDelivery::new(DeliveryId::new("d-1"), event, b"{}".to_vec())
            .with_action(action.map(String::from));
        EventContext::new(delivery, serde_json::json!({}))
    }

    #[test]
    fn test_pattern_matching() {
        assert!(Pattern::parse("*").matches("anything"));
        assert!(Pattern::parse("issues").matches("issues"));
        assert!(!Pattern::parse("issues").matches("Issues"));
        assert!(!Pattern::parse("issues").matches("issue_comment"));
        assert_eq!(Pattern::parse("*").to_string(), "*");
    }

    #[test]
    fn test_registration_matching() {
        let h = Recording::new(false);
        let registry = EventRegistry::builder()
            .register_handler("issues", Some("opened"), "exact", h.clone())
            .register_handler("issues", Some("*"), "any-action", h.clone())
            .register_handler("*", None, "catch-all", h.clone())
            .build();

        let ids = |event: &str, action: Option<&str>| -> Vec<String> {
            registry
                .resolve(event, action)
                .iter()
                .map(|r| r.handler_id.clone())
                .collect()
        };

        assert_eq!(ids("issues", Some("opened")), vec!["exact", "any-action", "catch-all"]);
        assert_eq!(ids("issues", Some("closed")), vec!["any-action", "catch-all"]);
        assert_eq!(ids("issues", None), vec!["any-action", "catch-all"]);
        assert_eq!(ids("push", None), vec!["catch-all"]);
    }

    #[tokio::test]
    async fn test_dispatch_runs_in_order() {
        let first = Recording::new(false);
        let second = Recording::new(false);
        let router = EventRouter::new(Arc::new(
            EventRegistry::builder()
                .register_handler("push", None, "first", first.clone())
                .register_handler("push", None, "second", second.clone())
                .build(),
        ));

        let report = router.dispatch(&context("push", None)).await;

        assert!(report.is_success());
        assert_eq!(report.invoked, vec!["first", "second"]);
        assert_eq!(first.calls.lock().len(), 1);
        assert_eq!(second.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_handlers() {
        let failing = Recording::new(true);
        let healthy = Recording::new(false);
        let router = EventRouter::new(Arc::new(
            EventRegistry::builder()
                .register_handler("issues", None, "failing", failing.clone())
                .register_handler("issues", None, "healthy", healthy.clone())
                .build(),
        ));

        let report = router.dispatch(&context("issues", Some("opened"))).await;

        assert!(!report.is_success());
        assert_eq!(report.invoked.len(), 2);
        assert_eq!(report.failures[0].handler_id, "failing");
        assert_eq!(report.failure_summary(), "failing: Handler failed: boom");
        assert_eq!(*healthy.calls.lock(), vec!["issues.opened"]);
    }

    #[tokio::test]
    async fn test_no_match_is_empty_success() {
        let router = EventRouter::new(Arc::new(EventRegistry::builder().build()));

        let report = router.dispatch(&context("ping", None)).await;

        assert!(report.is_success());
        assert!(report.invoked.is_empty());
    }

    #[tokio::test]
    async fn test_factory_called_per_dispatch() {
        let created = Arc::new(Mutex::new(0usize));
        let counter = created.clone();
        let factory: HandlerFactory = Arc::new(move || {
            *counter.lock() += 1;
            Recording::new(false) as Arc<dyn EventHandler>
        });
        let router = EventRouter::new(Arc::new(
            EventRegistry::builder().register("*", None, "fresh", factory).build(),
        ));

        router.dispatch(&context("push", None)).await;
        router.dispatch(&context("push", None)).await;

        assert_eq!(*created.lock(), 2);
    }
}
