use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trellis_core::{
    BoxError, BoxedTransport, DeliveryMode, DeliveryStream, Hook, SubscribeOptions,
    TransportSubscriptionId,
};

use super::{LocalEmitReport, SubscriptionId};
use crate::error::{EventBusError, EventBusResult, HookDeliveryError};
use crate::manager::panic_message;

type Listener<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

struct SubscriptionEntry {
    plugin_id: Arc<str>,
    hook_id: &'static str,
    mode: DeliveryMode,
    /// Erased `Listener<T>` for local dispatch.
    listener: Arc<dyn Any + Send + Sync>,
    transport_id: TransportSubscriptionId,
    cancel: CancellationToken,
}

struct BusInner {
    transport: BoxedTransport,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl BusInner {
    async fn remove(&self, id: SubscriptionId) -> EventBusResult<()> {
        let Some(entry) = self.subscriptions.lock().remove(&id) else {
            return Ok(());
        };
        entry.cancel.cancel();
        self.transport.unsubscribe(entry.transport_id).await?;
        debug!(hook = entry.hook_id, plugin = %entry.plugin_id, subscription = %id, "Unsubscribed");
        Ok(())
    }
}

/// Runs one listener, turning errors and panics into a rendered cause.
async fn invoke<T>(listener: &Listener<T>, payload: T) -> Result<(), String> {
    match AssertUnwindSafe(async move { listener(payload).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

/// Feeds transport deliveries of one subscription to its listener.
///
/// Cancellation is only observed between deliveries, so a listener that has
/// started always runs to completion.
async fn consume<T>(
    hook_id: &'static str,
    plugin_id: Arc<str>,
    id: SubscriptionId,
    listener: Listener<T>,
    mut deliveries: DeliveryStream,
    cancel: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
{
    loop {
        let payload = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = deliveries.next() => match next {
                Some(payload) => payload,
                None => break,
            },
        };
        let value = match serde_json::from_slice::<T>(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(hook = hook_id, subscription = %id, error = %e, "Dropping undecodable payload");
                continue;
            }
        };
        if let Err(cause) = invoke(&listener, value).await {
            warn!(hook = hook_id, plugin = %plugin_id, subscription = %id, %cause, "Hook listener failed");
        }
    }
    debug!(hook = hook_id, subscription = %id, "Hook consumer stopped");
}

// =============================================================================
// EventBus
// =============================================================================

/// Typed publish/subscribe over a [`Transport`](trellis_core::Transport).
///
/// - [`subscribe`](Self::subscribe) registers a listener in broadcast mode
///   (every subscribed instance gets a copy) or work-queue mode (one listener
///   across the fleet gets each payload).
/// - [`emit`](Self::emit) hands a payload to the transport and resolves once
///   the transport accepted it.
/// - [`emit_local`](Self::emit_local) runs every listener of this process
///   concurrently, whatever its mode, and never fails.
/// - [`shutdown`](Self::shutdown) removes this process's subscriptions and
///   closes the transport connection.
///
/// The bus is the only owner of its subscription state; there is no global
/// registry.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Opens `transport` and returns a bus on top of it.
    pub async fn connect(transport: BoxedTransport) -> EventBusResult<Self> {
        transport.connect().await?;
        info!(transport = %transport.name(), "Event bus connected");
        Ok(Self {
            inner: Arc::new(BusInner {
                transport,
                subscriptions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Name of the underlying transport.
    pub fn transport_name(&self) -> &str {
        self.inner.transport.name()
    }

    /// Live subscriptions of this process.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has started.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> EventBusResult<()> {
        if self.is_shut_down() {
            Err(EventBusError::Closed)
        } else {
            Ok(())
        }
    }

    /// Subscribes `listener` to `hook` on behalf of `plugin_id`.
    ///
    /// Work-queue subscriptions of all instances form one competing-consumer
    /// group per hook id.  The returned handle removes only this
    /// subscription; dropping it leaves the subscription in place until
    /// [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    ///
    /// [`EventBusError::Closed`] after shutdown, or the transport's error.
    pub async fn subscribe<T, F, Fut>(
        &self,
        plugin_id: &str,
        hook: Hook<T>,
        listener: F,
        options: SubscribeOptions,
    ) -> EventBusResult<Unsubscribe>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.ensure_open()?;
        let listener: Listener<T> = Arc::new(move |payload| listener(payload).boxed());
        let subscription = self
            .inner
            .transport
            .subscribe(hook.id(), options.mode)
            .await?;

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let plugin_id: Arc<str> = Arc::from(plugin_id);
        let cancel = CancellationToken::new();
        // Checked under the lock so a concurrent shutdown either sees this
        // entry when it drains or has already flagged the bus.
        let inserted = {
            let mut subscriptions = self.inner.subscriptions.lock();
            let open = !self.is_shut_down();
            if open {
                subscriptions.insert(
                    id,
                    SubscriptionEntry {
                        plugin_id: Arc::clone(&plugin_id),
                        hook_id: hook.id(),
                        mode: options.mode,
                        listener: Arc::new(Arc::clone(&listener)),
                        transport_id: subscription.id,
                        cancel: cancel.clone(),
                    },
                );
            }
            open
        };
        if !inserted {
            self.inner.transport.unsubscribe(subscription.id).await?;
            return Err(EventBusError::Closed);
        }

        tokio::spawn(consume(
            hook.id(),
            Arc::clone(&plugin_id),
            id,
            listener,
            subscription.deliveries,
            cancel,
        ));
        debug!(hook = %hook, plugin = %plugin_id, subscription = %id, mode = %options.mode, "Subscribed");

        Ok(Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            id,
        })
    }

    /// Publishes `payload` on `hook` through the transport.
    ///
    /// Resolves once the transport accepted the payload.  Broadcast
    /// subscribers receive it at least once per instance; work-queue
    /// subscribers receive it on exactly one instance.  No ordering is
    /// guaranteed across emits.
    pub async fn emit<T: Serialize>(&self, hook: Hook<T>, payload: &T) -> EventBusResult<()> {
        self.ensure_open()?;
        let bytes = serde_json::to_vec(payload).map_err(|source| EventBusError::Encode {
            hook_id: hook.id().to_string(),
            source,
        })?;
        self.inner.transport.publish(hook.id(), bytes).await?;
        Ok(())
    }

    /// Delivers `payload` to every listener of this process, bypassing the
    /// transport.
    ///
    /// Listeners run concurrently and every one of them runs to completion.
    /// Failures are logged and reported, never returned as an error.
    pub async fn emit_local<T>(&self, hook: Hook<T>, payload: T) -> LocalEmitReport
    where
        T: Clone + Send + 'static,
    {
        let mut targets: Vec<(SubscriptionId, Arc<str>, Listener<T>)> = {
            let subscriptions = self.inner.subscriptions.lock();
            subscriptions
                .iter()
                .filter(|(_, entry)| entry.hook_id == hook.id())
                .filter_map(|(id, entry)| {
                    entry
                        .listener
                        .downcast_ref::<Listener<T>>()
                        .map(|l| (*id, Arc::clone(&entry.plugin_id), Arc::clone(l)))
                })
                .collect()
        };
        targets.sort_by_key(|(id, _, _)| *id);

        let outcomes = future::join_all(targets.iter().map(|(id, plugin_id, listener)| {
            let payload = payload.clone();
            async move { (*id, plugin_id, invoke(listener, payload).await) }
        }))
        .await;

        let mut report = LocalEmitReport {
            invoked: outcomes.len(),
            failures: Vec::new(),
        };
        for (subscription, plugin_id, outcome) in outcomes {
            if let Err(cause) = outcome {
                warn!(hook = %hook, plugin = %plugin_id, %subscription, %cause, "Local hook listener failed");
                report.failures.push(HookDeliveryError {
                    hook_id: hook.id().to_string(),
                    plugin_id: plugin_id.to_string(),
                    subscription,
                    cause,
                });
            }
        }
        report
    }

    /// Removes every subscription of this process and closes the transport.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> EventBusResult<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let entries: Vec<(SubscriptionId, SubscriptionEntry)> =
            self.inner.subscriptions.lock().drain().collect();
        for (_, entry) in &entries {
            entry.cancel.cancel();
        }
        for (id, entry) in &entries {
            if let Err(e) = self.inner.transport.unsubscribe(entry.transport_id).await {
                warn!(hook = entry.hook_id, subscription = %id, error = %e, "Failed to unsubscribe during shutdown");
            }
        }

        self.inner.transport.close().await?;
        info!(subscriptions = entries.len(), "Event bus shut down");
        Ok(())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscriptions = self.inner.subscriptions.lock();
        let (broadcast, work_queue) =
            subscriptions
                .values()
                .fold((0, 0), |(b, w), entry| match entry.mode {
                    DeliveryMode::Broadcast => (b + 1, w),
                    DeliveryMode::WorkQueue => (b, w + 1),
                });
        f.debug_struct("EventBus")
            .field("transport", &self.inner.transport.name())
            .field("broadcast", &broadcast)
            .field("work_queue", &work_queue)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

// =============================================================================
// Unsubscribe
// =============================================================================

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    id: SubscriptionId,
}

impl Unsubscribe {
    /// The subscription this handle controls.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the subscription.  Deliveries already in progress complete.
    ///
    /// A no-op if the bus is gone or already shut down.
    pub async fn unsubscribe(self) -> EventBusResult<()> {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id).await,
            None => Ok(()),
        }
    }
}
