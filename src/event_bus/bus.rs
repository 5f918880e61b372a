//! # Event Bus
//!
//! In-process pub/sub plus a request/response channel keyed by
//! correlation id. Delivery is single-process and in-memory; `emit`
//! fans a payload out to every subscriber of its
//! `EventType` and completes only once all of them have settled.
//! `request` invokes exactly the first subscriber registered for a
//! type and resolves when that handler calls [`EventBus::respond`] or
//! [`EventBus::respond_error`], or when the timeout elapses.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::domain::{EventEnvelope, EventType, IntoTaskEvent, TaskEvent};
use crate::errors::{ErrorKind, Result, SupervisorError};
use crate::ids::CorrelationId;

/// Requests that go unanswered for longer than this are swept by the
/// GC pass and logged, regardless of their individual `timeoutMs`.
const STALE_REQUEST_AGE: Duration = Duration::from_secs(60);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type HandlerFn = Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct Subscription {
    id: SubscriptionId,
    handler: HandlerFn,
}

struct PendingRequest {
    sender: oneshot::Sender<Result<TaskEvent>>,
    created_at: std::time::Instant,
}

struct Inner {
    config: Configuration,
    subscriptions: DashMap<EventType, Vec<Subscription>>,
    total_subscriptions: AtomicUsize,
    pending_requests: DashMap<CorrelationId, PendingRequest>,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to the bus. Cheap to clone (an `Arc` underneath), the
/// way every handler holds its own copy.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        let bus = Self {
            inner: Arc::new(Inner {
                config,
                subscriptions: DashMap::new(),
                total_subscriptions: AtomicUsize::new(0),
                pending_requests: DashMap::new(),
                gc_handle: Mutex::new(None),
            }),
        };
        bus.start_gc();
        bus
    }

    fn start_gc(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let now = std::time::Instant::now();
                let stale: Vec<CorrelationId> = inner
                    .pending_requests
                    .iter()
                    .filter(|entry| now.duration_since(entry.created_at) > STALE_REQUEST_AGE)
                    .map(|entry| *entry.key())
                    .collect();
                for id in stale {
                    if let Some((_, pending)) = inner.pending_requests.remove(&id) {
                        warn!(correlation_id = %id, "garbage-collecting stale pending request");
                        let _ = pending.sender.send(Err(SupervisorError::new(
                            ErrorKind::SystemError,
                            "request garbage-collected after exceeding stale age",
                        )));
                    }
                }
            }
        });
        // Best-effort: if `new` races a `dispose`, the lock is brief.
        if let Ok(mut guard) = self.inner.gc_handle.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Registers `handler` for `event_type`. Fails with
    /// `RESOURCE_LIMIT_EXCEEDED` once the total subscription cap is
    /// hit; logs a warning when a single event type approaches its
    /// per-event listener cap.
    pub fn subscribe<F, Fut>(&self, event_type: EventType, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.inner.total_subscriptions.load(Ordering::SeqCst) >= self.inner.config.max_total_subscriptions
        {
            return Err(SupervisorError::new(
                ErrorKind::ResourceLimitExceeded,
                "maximum total subscriptions exceeded",
            ));
        }

        let id = SubscriptionId(Uuid::new_v4());
        let boxed: HandlerFn = Arc::new(move |env| Box::pin(handler(env)));

        let mut entry = self.inner.subscriptions.entry(event_type).or_default();
        entry.push(Subscription { id, handler: boxed });
        let count = entry.len();
        drop(entry);

        self.inner.total_subscriptions.fetch_add(1, Ordering::SeqCst);

        if count >= self.inner.config.max_listeners_per_event {
            warn!(?event_type, count, "approaching max listeners for event type");
        }
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        for mut entry in self.inner.subscriptions.iter_mut() {
            if let Some(pos) = entry.value().iter().position(|s| s.id == id) {
                entry.value_mut().remove(pos);
                self.inner.total_subscriptions.fetch_sub(1, Ordering::SeqCst);
                return Ok(());
            }
        }
        Err(SupervisorError::new(
            ErrorKind::InvalidOperation,
            "unknown subscription id",
        ))
    }

    /// Emits `payload` to every subscriber of its event type and waits
    /// for all of them to settle. A single failing handler surfaces as
    /// an aggregated bus error.
    pub async fn emit(&self, payload: impl IntoTaskEvent) -> Result<()> {
        let event = payload.into_event();
        let envelope = EventEnvelope::new("supervisor", event);
        let kind = envelope.payload.kind();
        debug!(?kind, event_id = %envelope.event_id, "emitting event");

        let handlers: Vec<HandlerFn> = self
            .inner
            .subscriptions
            .get(&kind)
            .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            return Ok(());
        }

        let futures = handlers.into_iter().map(|h| {
            let envelope = envelope.clone();
            async move { h(envelope).await }
        });
        let results = futures::future::join_all(futures).await;

        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::new(
                ErrorKind::SystemError,
                format!("{} of subscriber(s) failed: {}", errors.len(), errors.join("; ")),
            ))
        }
    }

    /// Invokes exactly the first subscriber of `payload`'s event type
    /// and waits for a [`EventBus::respond`]/[`EventBus::respond_error`]
    /// call correlated to this request, or for `timeout` to elapse.
    pub async fn request(
        &self,
        payload: impl IntoTaskEvent,
        timeout: Duration,
    ) -> Result<TaskEvent> {
        let event = payload.into_event();
        let kind = event.kind();

        let first_handler = self
            .inner
            .subscriptions
            .get(&kind)
            .and_then(|subs| subs.first().map(|s| s.handler.clone()));

        let Some(handler) = first_handler else {
            return Err(SupervisorError::new(
                ErrorKind::SystemError,
                format!("no handler registered for {kind:?}"),
            ));
        };

        let correlation_id = CorrelationId::generate();
        let envelope = EventEnvelope::new("supervisor", event).with_correlation(correlation_id);

        let (tx, rx) = oneshot::channel();
        self.inner.pending_requests.insert(
            correlation_id,
            PendingRequest {
                sender: tx,
                created_at: std::time::Instant::now(),
            },
        );

        tokio::spawn(async move {
            if let Err(err) = handler(envelope).await {
                warn!(%err, "request handler returned an error before responding");
            }
        });

        let outcome = tokio::time::timeout(timeout, rx).await;
        // Whether we succeeded or timed out, make sure no stale entry lingers.
        self.inner.pending_requests.remove(&correlation_id);

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SupervisorError::new(
                ErrorKind::SystemError,
                "request handler dropped without responding",
            )),
            Err(_) => Err(SupervisorError::new(
                ErrorKind::SystemError,
                format!("request timed out after {}ms", timeout.as_millis()),
            )),
        }
    }

    /// Resolves a pending `request` with a successful value. A second
    /// call for the same `correlation_id`, or a call after the request
    /// already timed out, is silently ignored.
    pub fn respond(&self, correlation_id: CorrelationId, value: impl IntoTaskEvent) {
        if let Some((_, pending)) = self.inner.pending_requests.remove(&correlation_id) {
            let _ = pending.sender.send(Ok(value.into_event()));
        }
    }

    /// Resolves a pending `request` with a failure. Same double-resolve
    /// and resolve-after-timeout semantics as [`EventBus::respond`].
    pub fn respond_error(&self, correlation_id: CorrelationId, err: SupervisorError) {
        if let Some((_, pending)) = self.inner.pending_requests.remove(&correlation_id) {
            let _ = pending.sender.send(Err(err));
        }
    }

    #[must_use]
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.inner
            .subscriptions
            .get(&event_type)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn pending_request_count(&self) -> usize {
        self.inner.pending_requests.len()
    }

    /// Clears all handlers, cancels all pending requests, and stops
    /// the GC ticker.
    pub async fn dispose(&self) {
        if let Some(handle) = self.inner.gc_handle.lock().await.take() {
            handle.abort();
        }
        self.inner.subscriptions.clear();
        self.inner.total_subscriptions.store(0, Ordering::SeqCst);
        for entry in self.inner.pending_requests.iter() {
            let _ = entry
                .value()
                .sender
                .send(Err(SupervisorError::new(ErrorKind::SystemError, "bus disposed")))
                .is_ok();
        }
        self.inner.pending_requests.clear();
    }
}

#[async_trait::async_trait]
impl crate::container::Disposable for EventBus {
    async fn dispose(&self) {
        EventBus::dispose(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{NextTaskQuery, NextTaskResponse, TaskQueued};
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn emit_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new(Configuration::default());
        bus.emit(TaskQueued {
            task_id: crate::ids::TaskId::new("t1").unwrap(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn emit_waits_for_all_subscribers() {
        let bus = EventBus::new(Configuration::default());
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            bus.subscribe(EventType::TaskQueued, move |_env| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        }
        bus.emit(TaskQueued {
            task_id: crate::ids::TaskId::new("t1").unwrap(),
        })
        .await
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn emit_aggregates_handler_errors() {
        let bus = EventBus::new(Configuration::default());
        bus.subscribe(EventType::TaskQueued, |_env| async {
            Err(SupervisorError::new(ErrorKind::SystemError, "boom"))
        })
        .unwrap();
        let result = bus
            .emit(TaskQueued {
                task_id: crate::ids::TaskId::new("t1").unwrap(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn request_invokes_only_first_subscriber() {
        let bus = EventBus::new(Configuration::default());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_a = calls.clone();
        let bus_a = bus.clone();
        bus.subscribe(EventType::NextTaskQuery, move |env| {
            let calls = calls_a.clone();
            let bus = bus_a.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                bus.respond(env.correlation_id.unwrap(), NextTaskResponse { task: None });
                Ok(())
            }
        })
        .unwrap();

        let calls_b = calls.clone();
        bus.subscribe(EventType::NextTaskQuery, move |_env| {
            let calls = calls_b.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

        let response = bus
            .request(NextTaskQuery, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(matches!(response, TaskEvent::NextTaskResponse(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_times_out_when_nobody_responds() {
        let bus = EventBus::new(Configuration::default());
        bus.subscribe(EventType::NextTaskQuery, |_env| async { Ok(()) })
            .unwrap();
        let result = bus.request(NextTaskQuery, Duration::from_millis(50)).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::SystemError);
    }

    #[tokio::test]
    async fn request_with_no_handler_is_system_error() {
        let bus = EventBus::new(Configuration::default());
        let result = bus.request(NextTaskQuery, Duration::from_millis(50)).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::SystemError);
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_dropped_silently() {
        let bus = EventBus::new(Configuration::default());
        let bus_clone = bus.clone();
        bus.subscribe(EventType::NextTaskQuery, move |env| {
            let bus = bus_clone.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                // Responds after the caller has already timed out.
                bus.respond(env.correlation_id.unwrap(), NextTaskResponse { task: None });
                Ok(())
            }
        })
        .unwrap();

        let result = bus.request(NextTaskQuery, Duration::from_millis(10)).await;
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(150)).await;
        // No panic, no observable effect: the late respond() found nothing pending.
    }

    #[tokio::test]
    async fn double_resolve_is_ignored() {
        let bus = EventBus::new(Configuration::default());
        bus.subscribe(EventType::NextTaskQuery, |_env| async { Ok(()) })
            .unwrap();
        let correlation_id = CorrelationId::generate();
        bus.respond(correlation_id, NextTaskResponse { task: None });
        bus.respond(correlation_id, NextTaskResponse { task: None });
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_errors() {
        let bus = EventBus::new(Configuration::default());
        let err = bus.unsubscribe(SubscriptionId(Uuid::new_v4())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOperation);
    }

    #[tokio::test]
    async fn dispose_clears_handlers_and_pending_requests() {
        let bus = EventBus::new(Configuration::default());
        bus.subscribe(EventType::TaskQueued, |_env| async { Ok(()) })
            .unwrap();
        bus.dispose().await;
        assert_eq!(bus.subscriber_count(EventType::TaskQueued), 0);
        assert_eq!(bus.pending_request_count(), 0);
    }
}
