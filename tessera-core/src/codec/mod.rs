//! Posting codec contract.
//!
//! A codec is a (decoder, writer) pair identified by a stable string. The
//! merge engine compares identifiers to decide when posting chunks can be
//! copied byte-for-byte instead of decoded and re-encoded, and when a
//! codec-native multi-way merge can run in place of the generic one.

mod block;
mod vint;

pub use block::{BLOCK_CODEC, BlockPostings, BlockWriter};

use crate::error::Result;
use crate::structures::{DocWordsSpace, MaskedDocsRegistry, TermHits};
use crate::{DocId, ExecTermId, TERMINATED, TokenPos};

/// Locator of one term's posting chunk inside a codec's posting storage.
/// Opaque outside the codec that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkRef {
    pub offset: u64,
    pub len: u32,
}

/// Per-term directory entry: how many documents the term's posting list
/// holds, and where its chunk lives. `documents == 0` marks a degenerate
/// term that carries no postings and is elided by merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermIndexCtx {
    pub documents: u32,
    pub chunk: ChunkRef,
}

/// Read access to one segment's posting storage.
pub trait CodecAccess: Send + Sync {
    fn codec_identifier(&self) -> &'static str;

    /// Decoder positioned at the first document of the term's posting list
    /// (or already exhausted when `tctx.documents == 0`).
    fn new_decoder<'a>(&'a self, tctx: &TermIndexCtx) -> Result<Box<dyn PostingDecoder + 'a>>;

    /// Raw bytes of a term's chunk, for same-codec byte-level copies.
    fn chunk_bytes(&self, chunk: &ChunkRef) -> Result<&[u8]>;
}

/// Forward-only cursor over one term's posting list.
pub trait PostingDecoder {
    /// Current document, or [`TERMINATED`] once the stream is exhausted.
    fn doc(&self) -> DocId;

    /// Frequency of the current document; 0 once exhausted.
    fn freq(&self) -> u32;

    /// Advance to the next document. Returns false on exhaustion, after
    /// which `doc()` reports [`TERMINATED`].
    fn next(&mut self) -> Result<bool>;

    /// First document >= `target`. The default walks `next()`; codecs with
    /// skip structures override this.
    fn seek(&mut self, target: DocId) -> Result<DocId> {
        while self.doc() < target {
            if !self.next()? {
                break;
            }
        }
        Ok(self.doc())
    }

    /// Decode the current document's hits into `out` in ascending-position
    /// order, stamping each position into `dws` for `term` when provided.
    /// At most once per document, before the next `next()`/`seek()`.
    fn materialize_hits(
        &mut self,
        term: ExecTermId,
        dws: Option<&mut DocWordsSpace>,
        out: &mut TermHits,
    ) -> Result<()>;
}

/// One same-codec source taking part in a codec-native term merge.
///
/// Participants are handed over newest-generation-first; when several carry
/// the same document, the first one's hits win.
pub struct MergeParticipant<'a> {
    pub access: &'a dyn CodecAccess,
    pub tctx: TermIndexCtx,
    pub registry: MaskedDocsRegistry,
}

/// Write side of a segment build or merge.
///
/// Exactly one term is open at a time, and inside it exactly one document,
/// so a single stateful object covers both per-term encoding and the
/// session-level chunk operations. Document IDs must strictly ascend within
/// a term, positions within a document.
pub trait PostingWriter {
    fn codec_identifier(&self) -> &'static str;

    fn begin_term(&mut self);

    fn begin_document(&mut self, doc: DocId) -> Result<()>;

    fn new_hit(&mut self, pos: TokenPos, payload: &[u8]) -> Result<()>;

    fn end_document(&mut self) -> Result<()>;

    /// Finalize the open term, returning its directory entry.
    fn end_term(&mut self) -> Result<TermIndexCtx>;

    /// Same-codec fast path: copy a whole term's chunk without re-encoding.
    /// Callers check codec-identifier equality first; a mismatch is an error.
    /// Used instead of `begin_term`/`end_term`, not inside them.
    fn append_chunk(&mut self, src: &dyn CodecAccess, tctx: &TermIndexCtx) -> Result<TermIndexCtx>;

    /// Codec-native multi-way merge of same-codec participants into the
    /// currently open term. Surviving documents keep their hit bytes
    /// verbatim; masked ones emit nothing.
    fn merge(&mut self, participants: &[MergeParticipant<'_>]) -> Result<()>;
}

/// Decoder over an empty posting list; used for `documents == 0` entries.
pub(crate) struct EmptyDecoder;

impl PostingDecoder for EmptyDecoder {
    fn doc(&self) -> DocId {
        TERMINATED
    }

    fn freq(&self) -> u32 {
        0
    }

    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn materialize_hits(
        &mut self,
        _term: ExecTermId,
        _dws: Option<&mut DocWordsSpace>,
        _out: &mut TermHits,
    ) -> Result<()> {
        Err(crate::Error::Corruption(
            "materialize_hits on an exhausted decoder".into(),
        ))
    }
}
