//! Scripted mock `Provider`s: no real subprocess, callers control exactly
//! which `ExecuteResult`s come back and which `AgentEvent`s stream first.
//! Shared implementation replacing what would otherwise be duplicated
//! across `agmux-manager::runner` and `agmux-planner::agent`'s own test
//! modules.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use agmux_providers::{
    AgentEvent, CancellationToken, EventStream, ExecuteConfig, ExecuteResult, LongRunningProvider,
    Provider, Result,
};

/// One scripted turn: the event handler (if any) receives `events` in
/// order, then `execute`/`send_message` resolves with `result`.
#[derive(Clone)]
pub struct ScriptedEvent {
    pub events: Vec<AgentEvent>,
    pub result: ExecuteResult,
}

impl ScriptedEvent {
    pub fn just(result: ExecuteResult) -> Self {
        Self { events: Vec::new(), result }
    }
}

/// A `Provider`/`LongRunningProvider` driven entirely by a pre-recorded
/// script. Each `execute`/`send_message` call pops the next scripted turn;
/// once exhausted, the last turn is repeated (so a single-turn script still
/// works for callers that call more than once, e.g. a builder retried
/// across planner iterations).
pub struct ScriptedProvider {
    name: String,
    turns: Mutex<VecDeque<ScriptedEvent>>,
    last: Mutex<Option<ScriptedEvent>>,
    event_tx: Mutex<Option<mpsc::Sender<AgentEvent>>>,
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<AgentEvent>>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, script: Vec<ScriptedEvent>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            name: name.into(),
            turns: Mutex::new(script.into()),
            last: Mutex::new(None),
            event_tx: Mutex::new(Some(tx)),
            event_rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    /// Convenience constructor for a single successful turn with no
    /// streamed events.
    pub fn single(name: impl Into<String>, result: ExecuteResult) -> Self {
        Self::new(name, vec![ScriptedEvent::just(result)])
    }

    /// A sender test code can use to push events onto this provider's
    /// `events()` stream before calling `execute`/`send_message`, modeling
    /// a backend that streams ahead of the per-call handler being attached.
    pub fn event_sender(&self) -> mpsc::Sender<AgentEvent> {
        self.event_tx.lock().unwrap().clone().expect("event sender taken")
    }

    fn next_turn(&self) -> ScriptedEvent {
        let mut turns = self.turns.lock().unwrap();
        if let Some(turn) = turns.pop_front() {
            *self.last.lock().unwrap() = Some(turn.clone());
            return turn;
        }
        self.last
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ScriptedEvent::just(ExecuteResult::ok("")))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _prompt: &str,
        config: ExecuteConfig,
    ) -> Result<ExecuteResult> {
        let turn = self.next_turn();
        if let Some(handler) = &config.event_handler {
            for event in &turn.events {
                handler.handle(event);
            }
        }
        Ok(turn.result)
    }

    fn events(&self) -> EventStream {
        let rx = self.event_rx.lock().unwrap().take().unwrap_or_else(|| mpsc::channel(1).1);
        EventStream::new(rx)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LongRunningProvider for ScriptedProvider {
    async fn start(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn send_message(&self, _cancel: CancellationToken, _message: &str) -> Result<ExecuteResult> {
        Ok(self.next_turn().result)
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_scripted_turns_in_order_then_repeats_the_last() {
        let provider = ScriptedProvider::new(
            "mock",
            vec![
                ScriptedEvent::just(ExecuteResult::ok("first")),
                ScriptedEvent::just(ExecuteResult::ok("second")),
            ],
        );

        let r1 = provider.execute(CancellationToken::new(), "p", ExecuteConfig::new()).await.unwrap();
        let r2 = provider.execute(CancellationToken::new(), "p", ExecuteConfig::new()).await.unwrap();
        let r3 = provider.execute(CancellationToken::new(), "p", ExecuteConfig::new()).await.unwrap();

        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
        assert_eq!(r3.text, "second");
    }

    #[tokio::test]
    async fn event_handler_receives_scripted_events_before_the_result() {
        use std::sync::Arc;
        use agmux_providers::EventHandler;

        struct Collector(std::sync::Mutex<Vec<String>>);
        impl EventHandler for Collector {
            fn handle(&self, event: &AgentEvent) {
                if let AgentEvent::Text { delta } = event {
                    self.0.lock().unwrap().push(delta.clone());
                }
            }
        }

        let provider = ScriptedProvider::new(
            "mock",
            vec![ScriptedEvent {
                events: vec![AgentEvent::Text { delta: "hi".into() }],
                result: ExecuteResult::ok("hi"),
            }],
        );
        let collector = Arc::new(Collector(std::sync::Mutex::new(Vec::new())));
        let config = ExecuteConfig::new().event_handler(collector.clone());
        provider.execute(CancellationToken::new(), "p", config).await.unwrap();

        assert_eq!(collector.0.lock().unwrap().as_slice(), &["hi".to_string()]);
    }
}
