//! Operator interaction seam.
//!
//! Interactive choices and cancellation go through small capabilities so the
//! orchestrator never touches a terminal directly and tests can script them.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::UpdateError;

/// Presents choices to the operator.
pub trait Prompter: Send + Sync {
    /// Present an indexed list and return the chosen index.
    fn choose(&self, prompt: &str, options: &[String]) -> Result<usize, UpdateError>;
}

/// Stdin/stdout prompter for interactive runs.
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn choose(&self, prompt: &str, options: &[String]) -> Result<usize, UpdateError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{prompt}:").ok();
        for (i, option) in options.iter().enumerate() {
            writeln!(out, "  [{i}] {option}").ok();
        }
        write!(out, "Select number: ").ok();
        out.flush().ok();

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|_| UpdateError::Canceled)?;
        let index: usize = line.trim().parse().map_err(|_| UpdateError::InvalidSelection)?;
        if index >= options.len() {
            return Err(UpdateError::InvalidSelection);
        }
        Ok(index)
    }
}

/// Deterministic prompter for tests: answers from a queue.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<usize>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[usize]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn choose(&self, _prompt: &str, options: &[String]) -> Result<usize, UpdateError> {
        let index = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(UpdateError::Canceled)?;
        if index >= options.len() {
            return Err(UpdateError::InvalidSelection);
        }
        Ok(index)
    }
}

/// Out-of-band cancellation flag, shared with a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
