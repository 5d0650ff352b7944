// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operator prompts.
//!
//! Destructive operations, e.g., wiping an existing site directory or
//! writing into a production database, are gated behind a confirmation.
//! Declining a confirmation is not an error. The operation simply stops
//! before doing anything.

use inquire::{Confirm, InquireError, Text};
use tracing::info;

/// Ask the operator questions.
pub trait Prompter {
    /// Ask a yes or no question.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if question cannot be asked.
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;

    /// Ask for a line of text.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if question cannot be asked.
    fn text(&self, message: &str) -> Result<String>;
}

/// Prompt through the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new(message).with_default(default).prompt()?)
    }

    fn text(&self, message: &str) -> Result<String> {
        Ok(Text::new(message).prompt()?)
    }
}

/// Accept every confirmation without asking.
///
/// Used for unattended runs. Text questions still cannot be answered, and
/// fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, message: &str, _default: bool) -> Result<bool> {
        info!("{message} yes (assumed)");
        Ok(true)
    }

    fn text(&self, message: &str) -> Result<String> {
        Err(PromptError::Unattended(message.to_string()))
    }
}

/// Prompting error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Terminal interaction failed, or was cancelled.
    #[error(transparent)]
    Inquire(#[from] InquireError),

    /// Question needs an answer nobody is around to give.
    #[error("cannot answer {0:?} in unattended mode")]
    Unattended(String),
}

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;

    use std::{cell::RefCell, collections::VecDeque};

    /// Answer prompts from a queue, recording every question.
    #[derive(Debug, Default)]
    pub(crate) struct Scripted {
        confirms: RefCell<VecDeque<bool>>,
        texts: RefCell<VecDeque<String>>,
        pub(crate) asked: RefCell<Vec<String>>,
    }

    impl Scripted {
        pub(crate) fn confirming(answers: impl IntoIterator<Item = bool>) -> Self {
            Self {
                confirms: RefCell::new(answers.into_iter().collect()),
                ..Default::default()
            }
        }

        pub(crate) fn answering(mut self, texts: impl IntoIterator<Item = &'static str>) -> Self {
            self.texts = RefCell::new(texts.into_iter().map(ToString::to_string).collect());
            self
        }

        pub(crate) fn questions(&self) -> Vec<String> {
            self.asked.borrow().clone()
        }
    }

    impl Prompter for Scripted {
        fn confirm(&self, message: &str, default: bool) -> Result<bool> {
            self.asked.borrow_mut().push(message.to_string());
            Ok(self.confirms.borrow_mut().pop_front().unwrap_or(default))
        }

        fn text(&self, message: &str) -> Result<String> {
            self.asked.borrow_mut().push(message.to_string());
            self.texts
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| PromptError::Unattended(message.to_string()))
        }
    }
}
