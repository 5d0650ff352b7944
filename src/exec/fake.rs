// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scripted executor for tests.
//!
//! Records every command it receives, and answers from a script of
//! substring rules. Commands that match no rule succeed with empty output.

use crate::{
    config::Environment,
    exec::{Command, Connect, Executor, Output, Result},
};

use std::{cell::RefCell, rc::Rc};

#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub(crate) host: String,
    pub(crate) line: String,
    pub(crate) stdin: Option<String>,
}

#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    pattern: String,
    output: Output,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeExecutor {
    host: String,
    journal: Rc<RefCell<Vec<Record>>>,
    script: Rc<RefCell<Vec<Rule>>>,
}

impl FakeExecutor {
    pub(crate) fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            journal: Rc::default(),
            script: Rc::default(),
        }
    }

    /// Executor for another host sharing the same journal and script.
    pub(crate) fn sibling(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            journal: Rc::clone(&self.journal),
            script: Rc::clone(&self.script),
        }
    }

    /// Answer commands containing pattern on any host.
    pub(crate) fn respond(&self, pattern: impl Into<String>, output: Output) {
        self.script.borrow_mut().push(Rule {
            host: None,
            pattern: pattern.into(),
            output,
        });
    }

    /// Answer commands containing pattern on this host only.
    pub(crate) fn respond_here(&self, pattern: impl Into<String>, output: Output) {
        self.script.borrow_mut().push(Rule {
            host: Some(self.host.clone()),
            pattern: pattern.into(),
            output,
        });
    }

    pub(crate) fn records(&self) -> Vec<Record> {
        self.journal.borrow().clone()
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.journal
            .borrow()
            .iter()
            .map(|record| record.line.clone())
            .collect()
    }

    pub(crate) fn lines_on(&self, host: &str) -> Vec<String> {
        self.journal
            .borrow()
            .iter()
            .filter(|record| record.host == host)
            .map(|record| record.line.clone())
            .collect()
    }

    pub(crate) fn ran(&self, pattern: &str) -> bool {
        self.journal
            .borrow()
            .iter()
            .any(|record| record.line.contains(pattern))
    }

    pub(crate) fn position(&self, pattern: &str) -> Option<usize> {
        self.journal
            .borrow()
            .iter()
            .position(|record| record.line.contains(pattern))
    }
}

impl Executor for FakeExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &Command) -> Result<Output> {
        let line = command.to_shell_line();
        self.journal.borrow_mut().push(Record {
            host: self.host.clone(),
            line: line.clone(),
            stdin: command
                .stdin_payload()
                .map(|payload| String::from_utf8_lossy(payload).into_owned()),
        });

        let output = self
            .script
            .borrow()
            .iter()
            .find(|rule| {
                rule.host.as_deref().is_none_or(|host| host == self.host)
                    && line.contains(&rule.pattern)
            })
            .map(|rule| rule.output.clone())
            .unwrap_or_else(|| Output::success_with(""));

        Ok(output)
    }
}

impl Connect for FakeExecutor {
    type Executor = FakeExecutor;

    /// Sibling labelled with the environment's first host, or "local".
    fn connect(&self, environment: &Environment) -> Self::Executor {
        self.sibling(environment.primary_host().unwrap_or("local"))
    }
}
