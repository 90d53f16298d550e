//! Interactive duplicate review as an explicit state machine.
//!
//! ```text
//! Idle -> Scanning -> AwaitingReview -> Reviewing(i) -> Completed
//!              \------------------------------------->/
//! ```
//!
//! A rescan is allowed from every state and discards all review progress.
//! The session only tracks membership; deleting the file itself is the
//! caller's job.

use std::fmt;
use std::path::Path;

use crate::error::ReviewError;

use super::DuplicateGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Idle,
    Scanning,
    AwaitingReview,
    /// Index of the group under review
    Reviewing(usize),
    Completed,
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewState::Idle => f.write_str("idle"),
            ReviewState::Scanning => f.write_str("scanning"),
            ReviewState::AwaitingReview => f.write_str("awaiting review"),
            ReviewState::Reviewing(i) => write!(f, "reviewing group {i}"),
            ReviewState::Completed => f.write_str("completed"),
        }
    }
}

/// What happened to the group under review after a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The group still has two or more members and stays under review
    Shrunk { remaining: usize },
    /// The group fell below two members and review moved on
    Retired,
}

/// Review progress over the groups of one scan.
#[derive(Debug)]
pub struct ReviewSession {
    state: ReviewState,
    groups: Vec<DuplicateGroup>,
}

impl Default for ReviewSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewSession {
    pub fn new() -> Self {
        Self {
            state: ReviewState::Idle,
            groups: Vec::new(),
        }
    }

    pub fn state(&self) -> ReviewState {
        self.state
    }

    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    /// Enter `Scanning`, dropping any previous groups and progress.
    pub fn begin_scan(&mut self) {
        self.groups.clear();
        self.state = ReviewState::Scanning;
    }

    /// Leave `Scanning` with the scan's groups.
    pub fn finish_scan(&mut self, groups: Vec<DuplicateGroup>) -> Result<(), ReviewError> {
        self.expect(ReviewState::Scanning, "finish a scan")?;
        self.state = if groups.is_empty() {
            ReviewState::Completed
        } else {
            ReviewState::AwaitingReview
        };
        self.groups = groups;
        Ok(())
    }

    pub fn start_review(&mut self) -> Result<(), ReviewError> {
        self.expect(ReviewState::AwaitingReview, "start review")?;
        self.state = ReviewState::Reviewing(0);
        Ok(())
    }

    /// Group under review, if any.
    pub fn current(&self) -> Option<&DuplicateGroup> {
        match self.state {
            ReviewState::Reviewing(i) => self.groups.get(i),
            _ => None,
        }
    }

    /// Move past the current group without changing it.
    pub fn skip(&mut self) -> Result<(), ReviewError> {
        let index = self.reviewing_index("skip")?;
        self.advance_from(index);
        Ok(())
    }

    /// Remove one member of the current group.
    ///
    /// A group left with fewer than two members is retired and review
    /// advances; a larger group shrinks and stays under review.
    pub fn delete(&mut self, path: &Path) -> Result<DeleteOutcome, ReviewError> {
        let index = self.reviewing_index("delete")?;
        let group = &mut self.groups[index];
        if !group.remove(path) {
            return Err(ReviewError::NotAMember(path.to_path_buf()));
        }

        if group.is_retired() {
            self.advance_from(index);
            Ok(DeleteOutcome::Retired)
        } else {
            Ok(DeleteOutcome::Shrunk {
                remaining: group.len(),
            })
        }
    }

    fn advance_from(&mut self, index: usize) {
        self.state = if index + 1 < self.groups.len() {
            ReviewState::Reviewing(index + 1)
        } else {
            ReviewState::Completed
        };
    }

    fn reviewing_index(&self, action: &'static str) -> Result<usize, ReviewError> {
        match self.state {
            ReviewState::Reviewing(i) if i < self.groups.len() => Ok(i),
            state => Err(ReviewError::InvalidTransition {
                state: state.to_string(),
                action,
            }),
        }
    }

    fn expect(&self, wanted: ReviewState, action: &'static str) -> Result<(), ReviewError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(ReviewError::InvalidTransition {
                state: self.state.to_string(),
                action,
            })
        }
    }
}
