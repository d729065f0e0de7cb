//! Tag-indexed action block selection.
//!
//! Serves the legacy single-shot action-select shim and any deployment that
//! resolves query-mode action blocks in-process rather than through an
//! external provider.

use async_trait::async_trait;
use dashmap::DashMap;

use reverie_domain::TagQuery;

use crate::infrastructure::ports::{ActionSelectPort, GenError};

/// One registered action block and its tags.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub block_id: String,
    pub tags: Vec<String>,
}

#[derive(Default)]
pub struct MemoryBlockIndex {
    blocks: DashMap<String, BlockEntry>,
}

impl MemoryBlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, block_id: impl Into<String>, tags: Vec<String>) {
        let block_id = block_id.into();
        self.blocks.insert(
            block_id.clone(),
            BlockEntry { block_id, tags },
        );
    }

    fn matches(entry: &BlockEntry, query: &TagQuery) -> bool {
        let has_all = query
            .include
            .iter()
            .all(|tag| entry.tags.iter().any(|t| t == tag));
        let has_none = query
            .exclude
            .iter()
            .all(|tag| !entry.tags.iter().any(|t| t == tag));
        has_all && has_none
    }

    /// Number of include tags an entry shares with the query.
    fn overlap(entry: &BlockEntry, query: &TagQuery) -> usize {
        entry
            .tags
            .iter()
            .filter(|tag| query.include.contains(tag))
            .count()
    }
}

#[async_trait]
impl ActionSelectPort for MemoryBlockIndex {
    async fn select_block(&self, query: &TagQuery) -> Result<Option<String>, GenError> {
        // Best match by include-tag overlap; ties break on block id so the
        // result is stable across calls.
        let best = self
            .blocks
            .iter()
            .filter(|entry| Self::matches(entry.value(), query))
            .map(|entry| (Self::overlap(entry.value(), query), entry.block_id.clone()))
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));
        Ok(best.map(|(_, block_id)| block_id))
    }
}
