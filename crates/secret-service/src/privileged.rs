//! Privileged operations
//!
//! Delete, create-collection, lock and unlock answer with a primary result
//! and a prompt path. The `/` prompt means the call already took effect and
//! the primary result is final. Any other path names a prompt that has to be
//! completed first; its result value replaces or extends the primary one.
//!
//! Whether a dismissed or failed prompt leaves remote state untouched is up
//! to the service; the client assumes it does and never retries.

use tracing::{debug, info};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::prompt::{Prompt, PromptOutcome};
use crate::value::{ObjectPath, Value};

/// Reply of a call that may need confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct Pending<T> {
    pub result: T,
    pub prompt: ObjectPath,
}

impl<T> Pending<T> {
    pub fn new(result: T, prompt: ObjectPath) -> Self {
        Self { result, prompt }
    }

    pub fn needs_prompt(&self) -> bool {
        !self.prompt.is_root()
    }
}

/// Finish a privileged call
///
/// Without a prompt the primary result is returned as is and no subscription
/// is opened. Otherwise the prompt is run to completion and `complete` turns
/// the primary result and the prompt's result value into the final value.
/// A dismissed prompt yields [`Error::PromptDismissed`].
pub fn execute<T, F>(bus: &Bus, pending: Pending<T>, complete: F) -> Result<T>
where
    F: FnOnce(T, Value) -> Result<T>,
{
    if !pending.needs_prompt() {
        debug!("No prompt required");
        return Ok(pending.result);
    }

    info!(prompt = %pending.prompt, "Operation requires a prompt");
    let mut prompt = Prompt::new(bus.clone(), pending.prompt);
    match prompt.wait(&bus.config().window_id)? {
        PromptOutcome::Completed(value) => complete(pending.result, value),
        PromptOutcome::Dismissed => {
            info!(prompt = %prompt.path(), "Prompt dismissed");
            Err(Error::PromptDismissed)
        }
    }
}
