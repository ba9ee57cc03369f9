//! User interaction for the KnxFtp client.
//!
//! Console rendering lives in [`console`]. Components that need an answer
//! from the user take a [`Confirm`] so they can run without a terminal.

pub mod console;

pub use console::{render_progress, ConsoleObserver, ConsolePrompt};

/// Asks the user a yes/no question.
pub trait Confirm {
    /// Returns `true` if the user agreed.
    fn confirm(&mut self, question: &str) -> bool;
}

/// Answers every question the same way and remembers what was asked.
#[derive(Debug, Clone, Default)]
pub struct FixedAnswer {
    answer: bool,
    questions: Vec<String>,
}

impl FixedAnswer {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            questions: Vec::new(),
        }
    }

    /// Number of questions asked so far.
    pub fn asked(&self) -> usize {
        self.questions.len()
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }
}

impl Confirm for FixedAnswer {
    fn confirm(&mut self, question: &str) -> bool {
        self.questions.push(question.to_string());
        self.answer
    }
}
