//! Tessera core - query execution and segment merging over an inverted index
//!
//! This crate is the execution heart of the tessera search engine:
//! - Posting codecs behind a decoder/writer contract, with a varint block
//!   codec as the default and byte-copy fast paths between equal codecs
//! - Per-segment query execution that walks a boolean/phrase query tree,
//!   materializes per-term hits and hands matches to a caller-supplied scorer
//! - Multi-way segment merging across generations, honoring tombstone
//!   masking contributed by newer generations
//! - A rayon fan-out driver running one isolated execution per segment
//!
//! Query parsing, segment construction from raw documents, and on-disk
//! container formats live outside this crate; segments reach us through the
//! [`segment::IndexSource`] trait and queries arrive already processed.

pub mod codec;
pub mod error;
pub mod merge;
pub mod query;
pub mod segment;
pub mod structures;

// Re-exports from codec
pub use codec::{
    BlockPostings, BlockWriter, ChunkRef, CodecAccess, MergeParticipant, PostingDecoder,
    PostingWriter, TermIndexCtx,
};

// Re-exports from structures
pub use structures::{DocWordsSpace, MaskedDocsRegistry, TermHit, TermHits, TombstoneSet};

// Re-exports from segment
pub use segment::{IndexSource, RamSegment, SegmentBuilder, SegmentMeta, SourceCollection, TermCursor};

// Re-exports from query
pub use query::{
    DocumentFilter, DocumentScorer, ExecFlags, MatchedDocument, MatchedQueryTerm, Query,
    QueryBuilder, QueryIndexTerm, QueryIndexTerms, QueryNode, QueryTermCtx, QueryTermId,
    QueryTermInstance, RewriteCtx, Verdict, exec_query, exec_query_collection,
    exec_query_collection_par,
};

// Re-exports from merge
pub use merge::{MergeCandidate, MergeCandidatesCollection, SourceRetention};

pub use error::{Error, Result};

/// Document ID, dense within a segment.
pub type DocId = u32;
/// Token position of a hit inside a document.
pub type TokenPos = u16;
/// Segment generation; larger is newer.
pub type Gen = u64;
/// Segment-local term ID assigned during query compilation. 0 is reserved.
pub type ExecTermId = u16;
/// Flags attached to a query token by the query pre-processor.
pub type TokenFlags = u16;

/// Sentinel document ID marking an exhausted posting stream.
pub const TERMINATED: DocId = DocId::MAX;

/// Hard bounds shared by codecs and the execution engine.
pub struct Limits;

impl Limits {
    /// Exclusive upper bound for token positions; also the capacity of
    /// [`DocWordsSpace`].
    pub const MAX_POSITION: TokenPos = 8192;
    /// Maximum payload bytes carried by a single hit.
    pub const MAX_PAYLOAD: usize = 8;
}
