//! Inbound message routing.
//!
//! Collaborators above the transport (authentication, channels, global
//! requests) register a [`MessageHandler`] for an inclusive message-type
//! range. The receive loop hands every non-control packet to the router,
//! which forwards it to the first matching registration.
//!
//! Ranges may overlap; the first match in registration order wins, and
//! that order is stable. When the transport dies, every registered handler
//! receives exactly one terminal `None` so it can release its own waiters.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skiff_platform::{SkiffError, SkiffResult};

/// A consumer of inbound transport messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message payload, or `None` when the transport closed.
    ///
    /// Invoked only from the receive task, so a handler sees messages in
    /// on-wire order. Returning an error is fatal for the connection.
    async fn handle_message(&self, payload: Option<&[u8]>) -> SkiffResult<()>;
}

/// An observer of connection teardown.
#[async_trait]
pub trait ConnectionMonitor: Send + Sync {
    /// Called exactly once when the connection is lost, with the recorded
    /// cause if any.
    async fn connection_lost(&self, cause: Option<&SkiffError>);
}

struct HandlerEntry {
    handler: Arc<dyn MessageHandler>,
    low: u8,
    high: u8,
}

/// Registry of message handlers keyed by type range.
#[derive(Default)]
pub struct MessageRouter {
    entries: Mutex<Vec<HandlerEntry>>,
}

impl MessageRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for the inclusive message-type range `low..=high`.
    pub fn register(&self, handler: Arc<dyn MessageHandler>, low: u8, high: u8) {
        let mut entries = self.entries.lock().expect("handler registry poisoned");
        entries.push(HandlerEntry { handler, low, high });
    }

    /// Removes the first registration matching this exact handler instance
    /// and range. Returns whether one was removed.
    pub fn unregister(&self, handler: &Arc<dyn MessageHandler>, low: u8, high: u8) -> bool {
        let mut entries = self.entries.lock().expect("handler registry poisoned");
        if let Some(pos) = entries.iter().position(|e| {
            Arc::ptr_eq(&e.handler, handler) && e.low == low && e.high == high
        }) {
            entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Routes one message to the first handler whose range covers its type.
    ///
    /// The registry lock is not held across the handler callback; handlers
    /// are free to send.
    ///
    /// # Errors
    ///
    /// [`SkiffError::UnexpectedMessage`] if no registration covers
    /// `msg_type`; otherwise whatever the handler returns.
    pub async fn dispatch(&self, msg_type: u8, payload: &[u8]) -> SkiffResult<()> {
        let handler = {
            let entries = self.entries.lock().expect("handler registry poisoned");
            entries
                .iter()
                .find(|e| e.low <= msg_type && msg_type <= e.high)
                .map(|e| Arc::clone(&e.handler))
        };

        match handler {
            Some(handler) => handler.handle_message(Some(payload)).await,
            None => Err(SkiffError::UnexpectedMessage(msg_type)),
        }
    }

    /// Delivers the terminal `None` to every registered handler, in
    /// registration order, swallowing handler errors.
    pub async fn terminate(&self) {
        let handlers: Vec<Arc<dyn MessageHandler>> = {
            let entries = self.entries.lock().expect("handler registry poisoned");
            entries.iter().map(|e| Arc::clone(&e.handler)).collect()
        };

        for handler in handlers {
            let _ = handler.handle_message(None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every delivery; `None` is recorded as 0xFFFF.
    struct Recorder {
        seen: Mutex<Vec<u16>>,
        fail: bool,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn seen(&self) -> Vec<u16> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle_message(&self, payload: Option<&[u8]>) -> SkiffResult<()> {
            let tag = payload.map(|p| p[0] as u16).unwrap_or(0xFFFF);
            self.seen.lock().unwrap().push(tag);
            if self.fail {
                Err(SkiffError::Protocol("handler rejected message".into()))
            } else {
                Ok(())
            }
        }
    }

    fn as_handler(r: &Arc<Recorder>) -> Arc<dyn MessageHandler> {
        Arc::clone(r) as Arc<dyn MessageHandler>
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_range() {
        let router = MessageRouter::new();
        let auth = Recorder::new();
        let channels = Recorder::new();
        router.register(as_handler(&auth), 50, 79);
        router.register(as_handler(&channels), 80, 127);

        router.dispatch(51, &[51]).await.unwrap();
        router.dispatch(94, &[94]).await.unwrap();

        assert_eq!(auth.seen(), vec![51]);
        assert_eq!(channels.seen(), vec![94]);
    }

    #[tokio::test]
    async fn test_overlapping_ranges_first_wins() {
        let router = MessageRouter::new();
        let first = Recorder::new();
        let second = Recorder::new();
        router.register(as_handler(&first), 50, 100);
        router.register(as_handler(&second), 50, 100);

        router.dispatch(60, &[60]).await.unwrap();

        assert_eq!(first.seen(), vec![60]);
        assert!(second.seen().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_requires_identity() {
        let router = MessageRouter::new();
        let a = Recorder::new();
        let b = Recorder::new();
        router.register(as_handler(&a), 50, 79);
        router.register(as_handler(&b), 50, 79);

        // Wrong range: nothing removed.
        assert!(!router.unregister(&as_handler(&a), 50, 80));

        // Exact identity: removes only `a`, so `b` now receives.
        assert!(router.unregister(&as_handler(&a), 50, 79));
        router.dispatch(50, &[50]).await.unwrap();
        assert!(a.seen().is_empty());
        assert_eq!(b.seen(), vec![50]);
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_is_error() {
        let router = MessageRouter::new();
        let result = router.dispatch(200, &[200]).await;
        assert!(matches!(result, Err(SkiffError::UnexpectedMessage(200))));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let router = MessageRouter::new();
        let failing = Recorder::failing();
        router.register(as_handler(&failing), 0, 255);
        assert!(router.dispatch(90, &[90]).await.is_err());
    }

    #[tokio::test]
    async fn test_terminate_reaches_all_in_order_and_swallows_errors() {
        let router = MessageRouter::new();
        let order = Arc::new(AtomicUsize::new(0));

        struct Ordered {
            order: Arc<AtomicUsize>,
            rank: Mutex<Option<usize>>,
            fail: bool,
        }

        #[async_trait]
        impl MessageHandler for Ordered {
            async fn handle_message(&self, payload: Option<&[u8]>) -> SkiffResult<()> {
                if payload.is_none() {
                    let rank = self.order.fetch_add(1, Ordering::SeqCst);
                    *self.rank.lock().unwrap() = Some(rank);
                }
                if self.fail {
                    Err(SkiffError::Protocol("goodbye failed".into()))
                } else {
                    Ok(())
                }
            }
        }

        let first = Arc::new(Ordered {
            order: Arc::clone(&order),
            rank: Mutex::new(None),
            fail: true,
        });
        let second = Arc::new(Ordered {
            order: Arc::clone(&order),
            rank: Mutex::new(None),
            fail: false,
        });
        router.register(Arc::clone(&first) as Arc<dyn MessageHandler>, 50, 79);
        router.register(Arc::clone(&second) as Arc<dyn MessageHandler>, 80, 127);

        router.terminate().await;

        assert_eq!(*first.rank.lock().unwrap(), Some(0));
        assert_eq!(*second.rank.lock().unwrap(), Some(1));
    }
}
