use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::cancellation::CancellationToken;
use crate::event::{AgentEvent, NativeEvent};
use crate::traits::EventHandler;

/// A per-call `EventHandler` slot shared with the long-running bridge task.
///
/// The bridge itself outlives any single `Execute`/`SendMessage` call; the
/// handler does not. `Execute` installs a handler here for the duration of
/// its call and clears it afterward (spec §4.3 "per-call handler dispatch"),
/// rather than the bridge owning a fixed handler for its whole lifetime.
pub type SharedEventHandler = Arc<RwLock<Option<Arc<dyn EventHandler>>>>;

/// Configuration for one `run_bridge` invocation.
pub struct BridgeConfig<E: NativeEvent> {
    pub source: mpsc::Receiver<E>,
    pub outbound: mpsc::Sender<AgentEvent>,
    /// `Some(id)` only for multiplexed transports (the `rpc` backend); events
    /// whose own `scope_id()` doesn't match are dropped. `None` disables
    /// scope filtering entirely (single-session backends never implement
    /// a scoping notion at all).
    pub scope_id: Option<String>,
    pub event_handler: Option<SharedEventHandler>,
    pub stop: CancellationToken,
    /// Invoked once, on bridge exit, iff no real `TurnComplete` event was
    /// ever observed — latches "the current turn is done" for backends that
    /// can terminate without a distinct turn-complete event (spec §4.2 step 4).
    pub on_turn_complete: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// The single task per live subprocess that reads native events, normalizes
/// them, and fans out to the outbound channel and optional per-call handler
/// (spec §4.2). There must be exactly one of these per subprocess — running
/// two against the same source channel would split the stream.
pub fn run_bridge<E: NativeEvent>(mut config: BridgeConfig<E>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut turn_completed = false;

        loop {
            tokio::select! {
                biased;
                _ = config.stop.cancelled() => {
                    tracing::debug!(target: "agmux::bridge", "stop signalled, draining");
                    break;
                }
                maybe_native = config.source.recv() => {
                    let Some(native) = maybe_native else {
                        tracing::debug!(target: "agmux::bridge", "source channel closed");
                        break;
                    };

                    if config.scope_id.is_some() && native.scope_id() != config.scope_id.as_deref() {
                        continue;
                    }

                    let canonical: Option<AgentEvent> = native.classify().into();
                    let Some(event) = canonical else {
                        continue;
                    };

                    if event.is_turn_complete() {
                        turn_completed = true;
                    }

                    if let Some(slot) = &config.event_handler
                        && let Some(handler) = slot.read().await.as_ref()
                    {
                        handler.handle(&event);
                    }

                    // Non-blocking: slow consumers drop events rather than
                    // block the subprocess (spec §5).
                    if config.outbound.try_send(event).is_err() {
                        tracing::warn!(target: "agmux::bridge", "outbound channel full or closed, dropping event");
                    }
                }
            }
        }

        if !turn_completed {
            if let Some(cb) = config.on_turn_complete.take() {
                cb();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamEventKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Fake {
        scope: Option<String>,
        kind: FakeKind,
    }

    enum FakeKind {
        Text(String),
        Turn,
    }

    impl NativeEvent for Fake {
        fn scope_id(&self) -> Option<&str> {
            self.scope.as_deref()
        }

        fn classify(self) -> StreamEventKind {
            match self.kind {
                FakeKind::Text(s) => StreamEventKind::Text(s),
                FakeKind::Turn => StreamEventKind::TurnComplete {
                    turn_number: 1,
                    success: true,
                    duration_ms: 10,
                    cost_usd: 0.0,
                },
            }
        }
    }

    #[tokio::test]
    async fn forwards_recognized_events_in_order() {
        let (tx, rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let stop = CancellationToken::new();

        let handle = run_bridge(BridgeConfig {
            source: rx,
            outbound: out_tx,
            scope_id: None,
            event_handler: None,
            stop: stop.clone(),
            on_turn_complete: None,
        });

        tx.send(Fake { scope: None, kind: FakeKind::Text("hello".into()) })
            .await
            .unwrap();
        tx.send(Fake { scope: None, kind: FakeKind::Text(" world".into()) })
            .await
            .unwrap();
        drop(tx);

        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert!(matches!(first, AgentEvent::Text { delta } if delta == "hello"));
        assert!(matches!(second, AgentEvent::Text { delta } if delta == " world"));
        assert!(out_rx.recv().await.is_none());

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn drops_events_outside_configured_scope() {
        let (tx, rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let stop = CancellationToken::new();

        let handle = run_bridge(BridgeConfig {
            source: rx,
            outbound: out_tx,
            scope_id: Some("thread-a".to_string()),
            event_handler: None,
            stop,
            on_turn_complete: None,
        });

        tx.send(Fake {
            scope: Some("thread-b".into()),
            kind: FakeKind::Text("nope".into()),
        })
        .await
        .unwrap();
        tx.send(Fake {
            scope: Some("thread-a".into()),
            kind: FakeKind::Text("yes".into()),
        })
        .await
        .unwrap();
        drop(tx);

        let only = out_rx.recv().await.unwrap();
        assert!(matches!(only, AgentEvent::Text { delta } if delta == "yes"));
        assert!(out_rx.recv().await.is_none());

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn latches_turn_complete_once_on_exit_without_real_event() {
        let (tx, rx) = mpsc::channel::<Fake>(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let stop = CancellationToken::new();
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_clone = invoked.clone();

        let handle = run_bridge(BridgeConfig {
            source: rx,
            outbound: out_tx,
            scope_id: None,
            event_handler: None,
            stop,
            on_turn_complete: Some(Arc::new(move || {
                invoked_clone.store(true, Ordering::SeqCst);
            })),
        });

        drop(tx);
        handle.await.unwrap();
        assert!(invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn does_not_latch_if_real_turn_complete_seen() {
        let (tx, rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let stop = CancellationToken::new();
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_clone = invoked.clone();

        let handle = run_bridge(BridgeConfig {
            source: rx,
            outbound: out_tx,
            scope_id: None,
            event_handler: None,
            stop,
            on_turn_complete: Some(Arc::new(move || {
                invoked_clone.store(true, Ordering::SeqCst);
            })),
        });

        tx.send(Fake { scope: None, kind: FakeKind::Turn }).await.unwrap();
        drop(tx);
        let _ = out_rx.recv().await;
        handle.await.unwrap();

        assert!(!invoked.load(Ordering::SeqCst));
        let _ = Duration::from_millis(0);
    }
}
