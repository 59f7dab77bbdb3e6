//! Prompt coordination
//!
//! A privileged call may hand back a prompt instead of finishing. Completing
//! it means: subscribe to `Prompt.Completed`, ask the prompt object to show
//! itself, then wait for the completion signal emitted by *that* prompt.
//!
//! ```text
//! Idle -> AwaitingSubscription -> Subscribed -> RemoteInvoked -> Completed
//!                                                             -> Dismissed
//!                                                             -> Failed
//! ```
//!
//! The subscription is always in place before `Prompt.Prompt` is invoked, so
//! a prompt that completes immediately cannot be missed. Signals from other
//! prompts share the stream and are skipped. A listener thread scoped to one
//! wait filters the stream and returns the first matching completion; the
//! caller only joins that thread, so waiting is safe from inside an async
//! runtime. The listener has exited by the time [`Prompt::wait`] returns.
//!
//! The wait has no timeout. Closing the connection ends the event stream and
//! surfaces as [`Error::ChannelClosed`].

use std::thread;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace, warn};

use crate::bus::Bus;
use crate::connection::{MatchRule, Signal, SubscriptionId};
use crate::constants::{prompt, PROMPT_INTERFACE};
use crate::error::{Error, Result};
use crate::value::{self, ObjectPath, Reply, Value};

/// Lifecycle of one prompt wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Idle,
    AwaitingSubscription,
    Subscribed,
    RemoteInvoked,
    Completed,
    Dismissed,
    Failed,
}

impl PromptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingSubscription => "awaiting-subscription",
            Self::Subscribed => "subscribed",
            Self::RemoteInvoked => "remote-invoked",
            Self::Completed => "completed",
            Self::Dismissed => "dismissed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dismissed | Self::Failed)
    }
}

impl std::fmt::Display for PromptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a prompt ended
#[derive(Debug, PartialEq)]
pub enum PromptOutcome {
    /// The operation went through; carries the prompt's result value
    Completed(Value),
    /// The user declined
    Dismissed,
}

/// Body of a `Completed` signal: `(dismissed: bool, result: variant)`
#[derive(Debug)]
struct Completion {
    dismissed: bool,
    result: Value,
}

impl Completion {
    fn decode(body: Vec<Value>) -> Result<Self> {
        let mut reply = Reply::new(body, 2)?;
        Ok(Self {
            dismissed: reply.next()?,
            result: value::into_inner(reply.next()?),
        })
    }
}

/// Handle to a remote prompt object
///
/// A prompt is waited on at most once. Waiting again, or waiting after a
/// terminal state, fails with [`Error::PromptSpent`].
#[derive(Debug)]
pub struct Prompt {
    path: ObjectPath,
    bus: Bus,
    state: PromptState,
}

impl Prompt {
    pub fn new(bus: Bus, path: ObjectPath) -> Self {
        Self {
            path,
            bus,
            state: PromptState::Idle,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn state(&self) -> PromptState {
        self.state
    }

    /// Show the prompt and block until it completes or is dismissed
    pub fn wait(&mut self, window_id: &str) -> Result<PromptOutcome> {
        if self.state != PromptState::Idle {
            return Err(Error::PromptSpent(self.path.clone()));
        }

        let outcome = self.run(window_id);
        let terminal = match &outcome {
            Ok(PromptOutcome::Completed(_)) => PromptState::Completed,
            Ok(PromptOutcome::Dismissed) => PromptState::Dismissed,
            Err(_) => PromptState::Failed,
        };
        self.transition(terminal);
        outcome
    }

    /// Dismiss the prompt without showing it
    pub fn dismiss(mut self) -> Result<()> {
        if self.state != PromptState::Idle {
            return Err(Error::PromptSpent(self.path.clone()));
        }
        self.bus
            .call(&self.path, PROMPT_INTERFACE, prompt::DISMISS, Vec::new())?;
        self.transition(PromptState::Dismissed);
        Ok(())
    }

    fn run(&mut self, window_id: &str) -> Result<PromptOutcome> {
        self.transition(PromptState::AwaitingSubscription);
        let rule = MatchRule::signal(PROMPT_INTERFACE, prompt::SIGNAL_COMPLETED);
        let subscription = self.bus.connection().subscribe(rule)?;
        self.transition(PromptState::Subscribed);

        let id = subscription.id();
        let events = subscription.into_events();
        let path = self.path.clone();

        thread::scope(|scope| {
            let listener = scope.spawn(move || listen(&path, events));

            if let Err(e) = self.invoke(window_id) {
                // Ends the listener
                self.release(id);
                let _ = listener.join();
                return Err(e);
            }

            // Only a thread join here: the caller may be on an async runtime
            let completion = listener.join();
            self.release(id);
            match completion {
                Ok(Some(Ok(Completion { dismissed: true, .. }))) => Ok(PromptOutcome::Dismissed),
                Ok(Some(Ok(Completion { result, .. }))) => Ok(PromptOutcome::Completed(result)),
                Ok(Some(Err(e))) => Err(e),
                Ok(None) | Err(_) => Err(Error::ChannelClosed(self.path.clone())),
            }
        })
    }

    fn invoke(&mut self, window_id: &str) -> Result<()> {
        self.bus.call(
            &self.path,
            PROMPT_INTERFACE,
            prompt::PROMPT,
            vec![Value::from(window_id.to_string())],
        )?;
        self.transition(PromptState::RemoteInvoked);
        Ok(())
    }

    fn release(&self, id: SubscriptionId) {
        if let Err(e) = self.bus.connection().unsubscribe(id) {
            warn!(path = %self.path, "Failed to release prompt subscription: {}", e);
        }
    }

    fn transition(&mut self, next: PromptState) {
        debug!(path = %self.path, from = %self.state, to = %next, "Prompt state");
        self.state = next;
    }
}

/// Return the first completion for `path`, skipping everything else.
/// `None` means the stream ended first.
fn listen(
    path: &ObjectPath,
    mut events: UnboundedReceiver<Signal>,
) -> Option<Result<Completion>> {
    while let Some(signal) = events.blocking_recv() {
        if signal.path != *path
            || signal.interface != PROMPT_INTERFACE
            || signal.member != prompt::SIGNAL_COMPLETED
        {
            trace!(%path, other = %signal.path, "Skipping completion for another prompt");
            continue;
        }

        return Some(Completion::decode(signal.body));
    }
    debug!(%path, "Event stream ended before prompt completed");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::connection::{Connection, SignalRouter, Subscription};
    use crate::error::TransportError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Connection that answers `Prompt.Prompt` by emitting a fixed script
    #[derive(Default)]
    struct ScriptedConnection {
        router: SignalRouter,
        script: Mutex<Vec<Signal>>,
        log: Mutex<Vec<String>>,
        fail_prompt: bool,
        close_on_prompt: bool,
    }

    impl ScriptedConnection {
        fn with_script(script: Vec<Signal>) -> Self {
            Self {
                script: Mutex::new(script),
                ..Default::default()
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl Connection for ScriptedConnection {
        fn call(
            &self,
            path: &ObjectPath,
            _interface: &str,
            method: &str,
            args: Vec<Value>,
        ) -> std::result::Result<Vec<Value>, TransportError> {
            self.record(format!("call {} {} {:?}", method, path, args));
            if self.fail_prompt {
                return Err(TransportError::new("prompt refused"));
            }
            if self.close_on_prompt {
                self.router.close();
            }
            for signal in self.script.lock().unwrap().drain(..) {
                self.router.emit(&signal);
            }
            Ok(Vec::new())
        }

        fn get_property(
            &self,
            _path: &ObjectPath,
            _interface: &str,
            _name: &str,
        ) -> std::result::Result<Value, TransportError> {
            Err(TransportError::new("no properties"))
        }

        fn set_property(
            &self,
            _path: &ObjectPath,
            _interface: &str,
            _name: &str,
            _value: Value,
        ) -> std::result::Result<(), TransportError> {
            Err(TransportError::new("no properties"))
        }

        fn subscribe(&self, rule: MatchRule) -> std::result::Result<Subscription, TransportError> {
            self.record(format!("subscribe {}.{}", rule.interface, rule.member));
            Ok(self.router.subscribe(rule))
        }

        fn unsubscribe(&self, id: SubscriptionId) -> std::result::Result<(), TransportError> {
            self.record("unsubscribe".to_string());
            self.router.release(id);
            Ok(())
        }
    }

    fn path(s: &str) -> ObjectPath {
        ObjectPath::try_from(s).unwrap()
    }

    fn completed(prompt_path: &str, dismissed: bool, result: Value) -> Signal {
        Signal::new(
            path(prompt_path),
            PROMPT_INTERFACE,
            prompt::SIGNAL_COMPLETED,
            vec![Value::from(dismissed), value::variant(result)],
        )
    }

    fn prompt_on(conn: &Arc<ScriptedConnection>, prompt_path: &str) -> Prompt {
        let bus = Bus::new(conn.clone(), ClientConfig::default());
        Prompt::new(bus, path(prompt_path))
    }

    #[test]
    fn test_subscribes_before_invoking() {
        let conn = Arc::new(ScriptedConnection::with_script(vec![completed(
            "/prompt/1",
            false,
            Value::from(""),
        )]));
        let mut prompt = prompt_on(&conn, "/prompt/1");

        prompt.wait("window-7").unwrap();

        let log = conn.log();
        assert_eq!(log[0], "subscribe org.freedesktop.Secret.Prompt.Completed");
        assert!(log[1].starts_with("call Prompt /prompt/1"));
        assert!(log[1].contains("window-7"));
        assert_eq!(log[2], "unsubscribe");
        assert!(conn.router.is_empty());
    }

    #[test]
    fn test_skips_other_prompts_in_any_order() {
        let signal = |name: char| match name {
            'A' => completed("/prompt/A", false, Value::from(path("/a"))),
            'B' => completed("/prompt/B", false, Value::from(path("/b"))),
            _ => completed("/prompt/C", true, Value::from("")),
        };

        for order in ["ABC", "ACB", "BAC", "BCA", "CAB", "CBA"] {
            let script = order.chars().map(signal).collect();
            let conn = Arc::new(ScriptedConnection::with_script(script));
            let mut prompt = prompt_on(&conn, "/prompt/B");

            let outcome = prompt.wait("").unwrap();
            assert_eq!(outcome, PromptOutcome::Completed(Value::from(path("/b"))), "{}", order);
            assert_eq!(prompt.state(), PromptState::Completed);
        }
    }

    #[test]
    fn test_dismissed_is_not_an_error_value() {
        let conn = Arc::new(ScriptedConnection::with_script(vec![completed(
            "/prompt/1",
            true,
            Value::from(path("/ignored")),
        )]));
        let mut prompt = prompt_on(&conn, "/prompt/1");

        assert_eq!(prompt.wait("").unwrap(), PromptOutcome::Dismissed);
        assert_eq!(prompt.state(), PromptState::Dismissed);
    }

    #[test]
    fn test_stream_closed_while_waiting() {
        let conn = Arc::new(ScriptedConnection {
            close_on_prompt: true,
            ..Default::default()
        });
        let mut prompt = prompt_on(&conn, "/prompt/1");

        let err = prompt.wait("").unwrap_err();
        assert!(matches!(err, Error::ChannelClosed(ref p) if p.as_str() == "/prompt/1"));
        assert_eq!(prompt.state(), PromptState::Failed);
    }

    #[test]
    fn test_undecodable_completion() {
        let conn = Arc::new(ScriptedConnection::with_script(vec![Signal::new(
            path("/prompt/1"),
            PROMPT_INTERFACE,
            prompt::SIGNAL_COMPLETED,
            vec![Value::from("yes")],
        )]));
        let mut prompt = prompt_on(&conn, "/prompt/1");

        assert!(matches!(prompt.wait(""), Err(Error::Decode(_))));
        assert_eq!(prompt.state(), PromptState::Failed);
    }

    #[test]
    fn test_invoke_failure_releases_subscription() {
        let conn = Arc::new(ScriptedConnection {
            fail_prompt: true,
            ..Default::default()
        });
        let mut prompt = prompt_on(&conn, "/prompt/1");

        assert!(matches!(prompt.wait(""), Err(Error::Transport(_))));
        assert_eq!(prompt.state(), PromptState::Failed);
        assert_eq!(conn.log().last().map(String::as_str), Some("unsubscribe"));
        assert!(conn.router.is_empty());
    }

    #[test]
    fn test_delivers_once() {
        let done = || completed("/prompt/1", false, Value::from(""));
        let conn = Arc::new(ScriptedConnection::with_script(vec![done(), done()]));
        let mut prompt = prompt_on(&conn, "/prompt/1");

        assert!(prompt.wait("").is_ok());
        // Late duplicates have nowhere to go
        assert_eq!(conn.router.emit(&done()), 0);
        assert!(matches!(prompt.wait(""), Err(Error::PromptSpent(_))));
    }

    #[test]
    fn test_completion_from_another_thread() {
        let conn = Arc::new(ScriptedConnection::default());
        let mut prompt = prompt_on(&conn, "/prompt/1");

        let emitter = {
            let conn = conn.clone();
            std::thread::spawn(move || {
                // Wait until the prompt is subscribed
                while conn.router.is_empty() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                conn.router.emit(&completed("/prompt/2", false, Value::from("")));
                conn.router.emit(&completed("/prompt/1", false, Value::from(path("/c"))));
            })
        };

        let outcome = prompt.wait("").unwrap();
        emitter.join().unwrap();
        assert_eq!(outcome, PromptOutcome::Completed(Value::from(path("/c"))));
    }

    #[tokio::test]
    async fn test_wait_inside_async_runtime() {
        let conn = Arc::new(ScriptedConnection::with_script(vec![completed(
            "/prompt/1",
            false,
            Value::from(path("/done")),
        )]));
        let mut prompt = prompt_on(&conn, "/prompt/1");

        let outcome = prompt.wait("").unwrap();
        assert_eq!(outcome, PromptOutcome::Completed(Value::from(path("/done"))));
        assert!(conn.router.is_empty());
    }

    #[test]
    fn test_dismiss() {
        let conn = Arc::new(ScriptedConnection::default());
        let prompt = prompt_on(&conn, "/prompt/9");

        prompt.dismiss().unwrap();
        assert_eq!(conn.log(), vec!["call Dismiss /prompt/9 []".to_string()]);
    }
}
