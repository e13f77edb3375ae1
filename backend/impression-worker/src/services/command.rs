//! Dedup orchestration between the recently-seen store and the sink.
//!
//! Order matters: impressions are written first and only marked as seen once
//! the write succeeded. A crash between the two leaves them unmarked, so a
//! redelivered batch writes them again (a duplicate row) instead of losing
//! them.

use std::collections::HashSet;

use tracing::debug;

use crate::error::Result;
use crate::models::Impression;
use crate::services::recently_seen::RecentlySeenStore;
use crate::services::writer::ImpressionWriter;

/// Counts from one `store_impressions` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Impressions handed in
    pub received: usize,
    /// Left after collapsing duplicates within the batch
    pub unique: usize,
    /// Unique impressions the store reported as already persisted
    pub already_seen: usize,
    pub written: usize,
}

impl StoreOutcome {
    /// Impressions not written because they were duplicates.
    pub fn skipped(&self) -> usize {
        self.received - self.written
    }
}

pub struct ImpressionCommandService<R, W> {
    recently_seen: R,
    writer: W,
}

impl<R, W> ImpressionCommandService<R, W>
where
    R: RecentlySeenStore,
    W: ImpressionWriter,
{
    pub fn new(recently_seen: R, writer: W) -> Self {
        Self {
            recently_seen,
            writer,
        }
    }

    pub fn recently_seen(&self) -> &R {
        &self.recently_seen
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Persist the impressions not seen before.
    ///
    /// Any store or writer error is returned as-is; the caller is expected to
    /// replay the whole input.
    pub async fn store_impressions(&self, impressions: &[Impression]) -> Result<StoreOutcome> {
        let mut outcome = StoreOutcome {
            received: impressions.len(),
            ..StoreOutcome::default()
        };

        let unique = unique_by_identity(impressions);
        outcome.unique = unique.len();
        if unique.is_empty() {
            return Ok(outcome);
        }

        let seen = self.recently_seen.has_many(&unique).await?;
        let unseen: Vec<Impression> = unique
            .into_iter()
            .zip(seen)
            .filter_map(|(impression, seen)| (!seen).then_some(impression))
            .collect();
        outcome.already_seen = outcome.unique - unseen.len();

        if unseen.is_empty() {
            debug!(
                received = outcome.received,
                "All impressions in batch were already seen"
            );
            return Ok(outcome);
        }

        self.writer.write_many(&unseen).await?;
        self.recently_seen.add_many(&unseen).await?;
        outcome.written = unseen.len();

        debug!(
            received = outcome.received,
            unique = outcome.unique,
            already_seen = outcome.already_seen,
            written = outcome.written,
            "Stored impressions"
        );
        Ok(outcome)
    }
}

/// First occurrence of each identity key, in input order.
fn unique_by_identity(impressions: &[Impression]) -> Vec<Impression> {
    let mut keys = HashSet::with_capacity(impressions.len());
    impressions
        .iter()
        .filter(|impression| keys.insert(impression.identity_key()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_by_identity_keeps_first_occurrence() {
        let a = Impression::new("a", 1, "u1", "a1");
        let b = Impression::new("b", 1, "u1", "a1");
        let a_later = Impression::new("a", 2, "u1", "a1");

        let unique = unique_by_identity(&[a.clone(), b.clone(), a.clone(), a_later.clone(), b]);

        assert_eq!(unique.len(), 3);
        assert_eq!(unique[0], a);
        assert_eq!(unique[1].id, "b");
        assert_eq!(unique[2], a_later);
    }

    #[test]
    fn test_outcome_skipped() {
        let outcome = StoreOutcome {
            received: 5,
            unique: 4,
            already_seen: 1,
            written: 3,
        };
        assert_eq!(outcome.skipped(), 2);
    }
}
