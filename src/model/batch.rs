//! Chunking of bulk writes.
//!
//! The store caps the number of mutations per commit, so a bulk put is split
//! into chunks. Planning is a pure fold over the items' routes; the store
//! executes the resulting chunks in order.

use crate::core::EntityKey;

/// Items per commit for non-transactional bulk puts.
pub const DEFAULT_BATCH_LIMIT: usize = 490;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    InsertAutoId,
    Upsert,
}

impl Route {
    /// Auto-assigned keys are inserted, everything else is upserted.
    pub fn for_key(key: &EntityKey) -> Self {
        if key.is_persisted() {
            Self::Upsert
        } else {
            Self::InsertAutoId
        }
    }
}

/// Positions (into the planned input) of the items sharing one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchChunk {
    pub insert_auto_id: Vec<usize>,
    pub upsert: Vec<usize>,
}

impl BatchChunk {
    pub fn len(&self) -> usize {
        self.insert_auto_id.len() + self.upsert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All positions in input order.
    pub fn indices(&self) -> Vec<usize> {
        let mut all: Vec<usize> = self
            .insert_auto_id
            .iter()
            .chain(&self.upsert)
            .copied()
            .collect();
        all.sort_unstable();
        all
    }
}

/// Splits `routes` into chunks of at most `limit` items.
///
/// Items are counted regardless of route: once a chunk holds `limit` items,
/// the next item starts a new chunk, so mixed inserts and upserts share the
/// budget. An empty input plans no chunk.
pub fn plan_batch<I>(routes: I, limit: usize) -> Vec<BatchChunk>
where
    I: IntoIterator<Item = Route>,
{
    let limit = limit.max(1);
    let (mut chunks, last) = routes.into_iter().enumerate().fold(
        (Vec::new(), BatchChunk::default()),
        |(mut chunks, mut current), (index, route)| {
            if current.len() == limit {
                chunks.push(std::mem::take(&mut current));
            }
            match route {
                Route::InsertAutoId => current.insert_auto_id.push(index),
                Route::Upsert => current.upsert.push(index),
            }
            (chunks, current)
        },
    );
    if !last.is_empty() {
        chunks.push(last);
    }
    chunks
}
