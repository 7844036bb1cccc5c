//! Pull checkpoints: monotonic cursors over a collection's change history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::document::{Document, DocumentKey};
use crate::error::{Error, Result};

/// Cursor marking the last synchronized point in a collection's history.
///
/// The cursor is a lower bound on `updated_at` plus the set of document keys
/// already synchronized at exactly that bound. Tracking the boundary keys
/// lets a caller re-fetch a timestamp shared by more documents than one page
/// could hold without skipping any of them: the boundary is requested one
/// millisecond early and documents already seen are dropped locally.
///
/// Checkpoints are owned by the caller; the core never persists them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    updated_at: i64,
    boundary: BTreeSet<DocumentKey>,
}

impl Checkpoint {
    /// Checkpoint from before any document: everything is newer.
    pub fn origin() -> Self {
        Self::default()
    }

    /// Checkpoint at a known timestamp with no boundary history.
    pub fn at(updated_at: i64) -> Self {
        Self {
            updated_at,
            boundary: BTreeSet::new(),
        }
    }

    /// Timestamp of the newest synchronized document.
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Lower bound to request from the remote (strict greater-than).
    ///
    /// One less than the boundary timestamp when boundary documents are
    /// tracked, so the boundary itself is included in the next response.
    pub fn request_bound(&self) -> i64 {
        if self.boundary.is_empty() {
            self.updated_at
        } else {
            self.updated_at - 1
        }
    }

    /// Extra page slots needed to re-fetch the boundary without losing room
    /// for unseen documents.
    pub fn refetch_overhead(&self) -> usize {
        self.boundary.len()
    }

    /// Whether a document at the boundary timestamp was already synchronized.
    pub fn contains(&self, document: &Document) -> Result<bool> {
        Ok(document.updated_at()? == self.updated_at && self.boundary.contains(&document.key()?))
    }

    /// Advance through documents returned by a pull, in ascending order.
    ///
    /// The cursor never moves backwards; advancing through an empty slice is
    /// a no-op.
    pub fn advance(&mut self, documents: &[Document]) -> Result<()> {
        let last = match documents.last() {
            Some(last) => last,
            None => return Ok(()),
        };

        let next = last.updated_at()?;
        if next < self.updated_at {
            return Err(Error::Protocol(format!(
                "checkpoint would move backwards: {} -> {}",
                self.updated_at, next
            )));
        }
        if next > self.updated_at {
            self.boundary.clear();
        }
        self.updated_at = next;

        for document in documents {
            if document.updated_at()? == next {
                self.boundary.insert(document.key()?);
            }
        }
        Ok(())
    }
}
