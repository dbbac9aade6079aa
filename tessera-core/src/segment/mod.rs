//! Index sources: immutable segments exposing a sorted term dictionary and
//! codec-owned posting storage.
//!
//! Segment construction from raw documents and on-disk container formats
//! live outside this crate; anything implementing [`IndexSource`] can be
//! queried and merged. [`RamSegment`] is the in-memory implementation used
//! by tests and as the natural landing place for merge output.

mod ram;

pub use ram::{RamSegment, SegmentBuilder};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecAccess, TermIndexCtx};
use crate::Gen;
use crate::structures::{MaskedDocsRegistry, TombstoneSet};

/// Descriptor callers keep in their segment bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Generation of the segment; larger is newer.
    pub generation: Gen,
    /// Number of distinct documents in the segment.
    pub num_docs: u32,
}

/// Cursor over a segment's term dictionary in ascending lexicographic
/// byte order.
pub trait TermCursor {
    /// Current entry, or `None` once exhausted.
    fn cur(&self) -> Option<(&[u8], TermIndexCtx)>;

    fn advance(&mut self);
}

/// An immutable unit of index: sorted term dictionary, posting storage and
/// a generation, plus the tombstones this segment contributes against older
/// generations.
pub trait IndexSource: Send + Sync {
    fn meta(&self) -> SegmentMeta;

    fn generation(&self) -> Gen {
        self.meta().generation
    }

    /// True when the segment holds no terms at all; the drivers skip such
    /// sources entirely.
    fn index_empty(&self) -> bool;

    /// Documents of older generations masked by this segment.
    fn masked_documents(&self) -> Option<Arc<TombstoneSet>>;

    fn codec_access(&self) -> &dyn CodecAccess;

    fn term_cursor(&self) -> Box<dyn TermCursor + '_>;

    /// Directory entry for a term token, if present.
    fn resolve_term(&self, token: &[u8]) -> Option<TermIndexCtx>;
}

/// An ordered set of index sources queried together.
///
/// Execution against source `i` must not see documents that sources of
/// strictly newer generations have masked; `scanner_registry_for` builds
/// that per-source registry. Fan-out results keep the insertion order.
#[derive(Default)]
pub struct SourceCollection {
    sources: Vec<Arc<dyn IndexSource>>,
}

impl SourceCollection {
    pub fn new(sources: Vec<Arc<dyn IndexSource>>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[Arc<dyn IndexSource>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Registry masking source `idx` with the tombstones of every strictly
    /// newer source in the collection.
    pub fn scanner_registry_for(&self, idx: usize) -> MaskedDocsRegistry {
        let r#gen = self.sources[idx].generation();
        let sets = self
            .sources
            .iter()
            .filter(|s| s.generation() > r#gen)
            .filter_map(|s| s.masked_documents())
            .collect();
        MaskedDocsRegistry::new(sets)
    }
}
