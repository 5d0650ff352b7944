// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Changeset retention.
//!
//! Old changesets are kept around after being replaced so a release can be
//! rolled back by hand. They are pruned by age. The changesets directory is
//! listed on the host with `find -printf '%T@ %f\n'`, i.e., one line per
//! directory holding its modification time in fractional seconds since the
//! epoch followed by its name. Selection of what to prune happens locally.

use crate::exec::Command;

use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use tracing::warn;

/// Changeset directory with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetAge {
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Command listing every directory under changesets with its age.
pub fn listing_command(changesets: &Path) -> Command {
    Command::new("find")
        .args([".", "-maxdepth", "1", "-type", "d", "-printf", "%T@ %f\\n"])
        .current_dir(changesets)
        .quiet()
}

/// Parse listing produced by [`listing_command`].
pub fn parse_listing(listing: &str) -> Vec<ChangesetAge> {
    listing
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parsed = line.split_once(' ').and_then(|(stamp, name)| {
                let seconds = stamp.parse::<f64>().ok()?;
                let modified = DateTime::from_timestamp(seconds.trunc() as i64, 0)?;
                Some(ChangesetAge {
                    name: name.to_string(),
                    modified,
                })
            });

            if parsed.is_none() {
                warn!("skip unexpected changeset listing line {line:?}");
            }

            parsed
        })
        .collect()
}

/// Select changesets older than given number of days.
///
/// The synthetic `.` entry and the active changeset are never selected.
pub fn expired(
    changesets: &[ChangesetAge],
    now: DateTime<Utc>,
    days: u32,
    active: Option<&str>,
) -> Vec<String> {
    let cutoff = now - Duration::days(i64::from(days));
    changesets
        .iter()
        .filter(|changeset| changeset.name != ".")
        .filter(|changeset| Some(changeset.name.as_str()) != active)
        .filter(|changeset| changeset.modified < cutoff)
        .map(|changeset| changeset.name.clone())
        .collect()
}
