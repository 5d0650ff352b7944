// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Placeholder templating for settings files.
//!
//! Sites ship one settings template per host type, e.g.,
//! `settings.staging.php`, containing `%PLACEHOLDER%` tokens. Rendering
//! replaces each token whose name matches a template variable of the
//! environment. Matching is case-insensitive against the uppercased variable
//! name, so variable `db_db` fills `%DB_DB%`.
//!
//! Rendering happens in a single pass. Values are inserted verbatim, and are
//! never scanned for placeholders themselves.

use regex::{Captures, Regex};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // INVARIANT: Pattern is a valid literal.
    Regex::new(r"%([A-Za-z][A-Za-z0-9_]*)%").expect("placeholder pattern is valid")
});

/// Result of rendering a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Rendered text.
    pub text: String,

    /// Names of placeholders no variable covered, uppercased.
    pub unresolved: BTreeSet<String>,
}

impl Rendered {
    /// Take rendered text, refusing any leftover placeholder.
    ///
    /// # Errors
    ///
    /// - Return [`TemplateError::Unresolved`] if placeholders remain.
    pub fn into_strict(self) -> Result<String> {
        if !self.unresolved.is_empty() {
            return Err(TemplateError::Unresolved(
                self.unresolved.into_iter().collect::<Vec<_>>().join(", "),
            ));
        }

        Ok(self.text)
    }
}

/// Render template with variables.
///
/// Tokens without a matching variable are left untouched, and reported in
/// [`Rendered::unresolved`].
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> Rendered {
    let lookup = variables
        .iter()
        .map(|(key, value)| (key.to_uppercase(), value.as_str()))
        .collect::<BTreeMap<_, _>>();

    let mut unresolved = BTreeSet::new();
    let text = PLACEHOLDER
        .replace_all(template, |captures: &Captures<'_>| {
            let name = captures[1].to_uppercase();
            match lookup.get(&name) {
                Some(value) => (*value).to_string(),
                None => {
                    let token = captures[0].to_string();
                    unresolved.insert(name);
                    token
                }
            }
        })
        .into_owned();

    Rendered { text, unresolved }
}

/// Templating error types.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Placeholders remain after rendering.
    #[error("unresolved placeholders: {0}")]
    Unresolved(String),
}

/// Friendly result alias :3
type Result<T, E = TemplateError> = std::result::Result<T, E>;
