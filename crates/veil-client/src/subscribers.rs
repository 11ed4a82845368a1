use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{error, warn};

use veil_core::HubEvent;

type Handler = Arc<dyn Fn(&HubEvent) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    token: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    handlers: RwLock<BTreeMap<String, Entry>>,
    next_token: AtomicU64,
    last_event: RwLock<Option<HubEvent>>,
}

/// Fan-out of one inbound event stream to independent handlers.
///
/// Handlers are keyed by subscriber id; registering an id again replaces the
/// earlier handler. A handler that errors or panics is logged and skipped;
/// the rest still see the event.
#[derive(Clone, Default)]
pub struct Subscribers {
    registry: Arc<Registry>,
}

/// Outcome of one [`Subscribers::dispatch`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub invoked: usize,
    pub failed: usize,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, id: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&HubEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = id.into();
        let token = self.registry.next_token.fetch_add(1, Ordering::Relaxed);
        let previous = self.registry.handlers.write().insert(
            id.clone(),
            Entry {
                token,
                handler: Arc::new(handler),
            },
        );
        if previous.is_some() {
            tracing::debug!(subscriber = %id, "subscriber replaced");
        }
        Subscription {
            id,
            token,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every registered handler with `event`.
    ///
    /// Handlers run against a snapshot taken on entry, so a handler may
    /// register or unregister subscribers without deadlocking.
    pub fn dispatch(&self, event: &HubEvent) -> DispatchSummary {
        *self.registry.last_event.write() = Some(event.clone());

        let snapshot: Vec<(String, Handler)> = self
            .registry
            .handlers
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.handler)))
            .collect();

        let mut summary = DispatchSummary {
            invoked: snapshot.len(),
            failed: 0,
        };
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (*handler)(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    summary.failed += 1;
                    warn!(subscriber = %id, event = event.event_type(), error = %e, "subscriber failed");
                }
                Err(panic) => {
                    summary.failed += 1;
                    error!(
                        subscriber = %id,
                        event = event.event_type(),
                        panic = panic_message(panic.as_ref()),
                        "subscriber panicked"
                    );
                }
            }
        }
        summary
    }

    /// Most recent event passed to [`dispatch`](Self::dispatch).
    pub fn last_event(&self) -> Option<HubEvent> {
        self.registry.last_event.read().clone()
    }

    pub fn len(&self) -> usize {
        self.registry.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.handlers.read().contains_key(id)
    }
}

/// Capability to remove one registration.
///
/// Dropping it does nothing; removal happens only through
/// [`unregister`](Self::unregister).
#[must_use = "keep the subscription to be able to unregister"]
pub struct Subscription {
    id: String,
    token: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove this registration. Returns `false` if the id has since been
    /// re-registered (the newer handler stays) or is already gone.
    pub fn unregister(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut handlers = registry.handlers.write();
        match handlers.get(&self.id) {
            Some(entry) if entry.token == self.token => {
                let _ = handlers.remove(&self.id);
                true
            }
            _ => false,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use veil_core::{LogLevel, PartyId};

    fn sample() -> HubEvent {
        HubEvent::log(PartyId::A, LogLevel::Info, "hello")
    }

    fn counter(subs: &Subscribers, id: &str) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = subs.register(id, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, sub)
    }

    #[test]
    fn every_handler_sees_each_event() {
        let subs = Subscribers::new();
        let (x, _sx) = counter(&subs, "x");
        let (y, _sy) = counter(&subs, "y");

        let summary = subs.dispatch(&sample());
        assert_eq!(summary, DispatchSummary { invoked: 2, failed: 0 });
        assert_eq!(x.load(Ordering::SeqCst), 1);
        assert_eq!(y.load(Ordering::SeqCst), 1);
        assert!(matches!(subs.last_event(), Some(HubEvent::LogEntry(_))));
    }

    #[test]
    fn failing_handler_does_not_stop_others() {
        let subs = Subscribers::new();
        let _sx = subs.register("x", |_| anyhow::bail!("widget broke"));
        let (y, _sy) = counter(&subs, "y");

        let summary = subs.dispatch(&sample());
        assert_eq!(summary.failed, 1);
        assert_eq!(y.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let subs = Subscribers::new();
        let _sx = subs.register("x", |_| panic!("widget exploded"));
        let (y, _sy) = counter(&subs, "y");

        let summary = subs.dispatch(&sample());
        assert_eq!(summary, DispatchSummary { invoked: 2, failed: 1 });
        assert_eq!(y.load(Ordering::SeqCst), 1);

        subs.dispatch(&sample());
        assert_eq!(y.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reregistering_replaces_handler() {
        let subs = Subscribers::new();
        let (old, _old_sub) = counter(&subs, "x");
        let (new, _new_sub) = counter(&subs, "x");
        assert_eq!(subs.len(), 1);

        subs.dispatch(&sample());
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_unregister_keeps_newer_handler() {
        let subs = Subscribers::new();
        let (_old, old_sub) = counter(&subs, "x");
        let (new, new_sub) = counter(&subs, "x");

        assert!(!old_sub.unregister());
        assert!(subs.contains("x"));
        subs.dispatch(&sample());
        assert_eq!(new.load(Ordering::SeqCst), 1);

        assert!(new_sub.unregister());
        assert!(subs.is_empty());
    }

    #[test]
    fn dropping_subscription_keeps_handler() {
        let subs = Subscribers::new();
        let (count, sub) = counter(&subs, "x");
        drop(sub);
        subs.dispatch(&sample());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let subs = Subscribers::new();
        let inner = subs.clone();
        let _s = subs.register("spawner", move |_| {
            let _late = inner.register("late", |_| Ok(()));
            Ok(())
        });
        let summary = subs.dispatch(&sample());
        assert_eq!(summary.invoked, 1);
        assert!(subs.contains("late"));
    }

    #[test]
    fn last_event_tracks_latest() {
        let subs = Subscribers::new();
        assert!(subs.last_event().is_none());
        subs.dispatch(&sample());
        let latest = HubEvent::error("boom");
        subs.dispatch(&latest);
        assert_eq!(subs.last_event(), Some(latest));
    }
}
