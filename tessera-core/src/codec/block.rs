//! Block codec - varint delta encoding of postings with positions and
//! payloads.
//!
//! Chunk layout, self-contained per term:
//!
//! ```text
//! per document: vint(doc_delta) vint(freq)
//!   per hit:    vint((pos_delta << 4) | payload_len) [payload_len raw bytes]
//! ```
//!
//! The first document of a chunk and the first hit of a document are stored
//! absolute; later ones as strictly positive deltas. Deltas restart at each
//! chunk boundary, which is what makes whole-chunk byte copies between
//! storages of this codec valid.

use super::vint::{read_vint, write_vint};
use super::{
    ChunkRef, CodecAccess, EmptyDecoder, MergeParticipant, PostingDecoder, PostingWriter,
    TermIndexCtx,
};
use crate::error::{Error, Result};
use crate::structures::{DocWordsSpace, TermHit, TermHits};
use crate::{DocId, ExecTermId, Limits, TERMINATED, TokenPos};

/// Stable identifier of this codec.
pub const BLOCK_CODEC: &str = "block/1";

// ── Read side ────────────────────────────────────────────────────────────

/// Posting storage of one segment encoded with the block codec.
#[derive(Debug, Clone, Default)]
pub struct BlockPostings {
    data: Vec<u8>,
}

impl BlockPostings {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl CodecAccess for BlockPostings {
    fn codec_identifier(&self) -> &'static str {
        BLOCK_CODEC
    }

    fn new_decoder<'a>(&'a self, tctx: &TermIndexCtx) -> Result<Box<dyn PostingDecoder + 'a>> {
        if tctx.documents == 0 {
            return Ok(Box::new(EmptyDecoder));
        }
        let bytes = self.chunk_bytes(&tctx.chunk)?;
        Ok(Box::new(BlockDecoder::new(bytes, tctx.documents)?))
    }

    fn chunk_bytes(&self, chunk: &ChunkRef) -> Result<&[u8]> {
        let start = chunk.offset as usize;
        let end = start + chunk.len as usize;
        self.data
            .get(start..end)
            .ok_or_else(|| Error::Corruption("posting chunk out of storage range".into()))
    }
}

/// Decoder over one term's chunk. Positioned at the first document on
/// creation.
struct BlockDecoder<'a> {
    rest: &'a [u8],
    /// Documents not yet surfaced (excludes the current one).
    remaining: u32,
    cur_doc: DocId,
    cur_freq: u32,
    hits_consumed: bool,
}

impl<'a> BlockDecoder<'a> {
    fn new(bytes: &'a [u8], documents: u32) -> Result<Self> {
        debug_assert!(documents > 0);
        let mut dec = Self {
            rest: bytes,
            remaining: documents,
            cur_doc: 0,
            cur_freq: 0,
            hits_consumed: true,
        };
        dec.remaining -= 1;
        dec.read_doc_header(true)?;
        Ok(dec)
    }

    fn read_doc_header(&mut self, first: bool) -> Result<()> {
        let delta = read_vint(&mut self.rest)?;
        let doc = if first {
            delta
        } else {
            if delta == 0 {
                return Err(Error::Corruption("document ids out of order".into()));
            }
            self.cur_doc as u64 + delta
        };
        if doc >= TERMINATED as u64 {
            return Err(Error::Corruption("document id out of range".into()));
        }
        let freq = read_vint(&mut self.rest)?;
        if freq == 0 {
            return Err(Error::Corruption("zero-frequency document".into()));
        }
        if freq > Limits::MAX_POSITION as u64 {
            return Err(Error::Corruption("frequency exceeds position limit".into()));
        }
        self.cur_doc = doc as DocId;
        self.cur_freq = freq as u32;
        self.hits_consumed = false;
        Ok(())
    }

    /// Parse the current document's hits, feeding each to `f`.
    fn walk_hits(&mut self, mut f: impl FnMut(TokenPos, &[u8])) -> Result<()> {
        let mut prev: u64 = 0;
        for i in 0..self.cur_freq {
            let v = read_vint(&mut self.rest)?;
            let len = (v & 0xF) as usize;
            let delta = v >> 4;
            if len > Limits::MAX_PAYLOAD {
                return Err(Error::Corruption("hit payload too long".into()));
            }
            let pos = if i == 0 {
                delta
            } else {
                if delta == 0 {
                    return Err(Error::Corruption("hit positions out of order".into()));
                }
                prev + delta
            };
            if pos >= Limits::MAX_POSITION as u64 {
                return Err(Error::Corruption("hit position out of range".into()));
            }
            if self.rest.len() < len {
                return Err(Error::Corruption("truncated hit payload".into()));
            }
            let (payload, rest) = self.rest.split_at(len);
            self.rest = rest;
            f(pos as TokenPos, payload);
            prev = pos;
        }
        self.hits_consumed = true;
        Ok(())
    }

    /// Raw encoded bytes of the current document's hits; consumes them.
    /// Valid to splice into another chunk of this codec because hit deltas
    /// restart at each document.
    fn hit_span(&mut self) -> Result<&'a [u8]> {
        let start = self.rest;
        self.walk_hits(|_, _| {})?;
        Ok(&start[..start.len() - self.rest.len()])
    }
}

impl PostingDecoder for BlockDecoder<'_> {
    fn doc(&self) -> DocId {
        self.cur_doc
    }

    fn freq(&self) -> u32 {
        self.cur_freq
    }

    fn next(&mut self) -> Result<bool> {
        if self.cur_doc == TERMINATED {
            return Ok(false);
        }
        if !self.hits_consumed {
            self.walk_hits(|_, _| {})?;
        }
        if self.remaining == 0 {
            if !self.rest.is_empty() {
                return Err(Error::Corruption("trailing bytes in posting chunk".into()));
            }
            self.cur_doc = TERMINATED;
            self.cur_freq = 0;
            return Ok(false);
        }
        self.remaining -= 1;
        self.read_doc_header(false)?;
        Ok(true)
    }

    fn materialize_hits(
        &mut self,
        term: ExecTermId,
        dws: Option<&mut DocWordsSpace>,
        out: &mut TermHits,
    ) -> Result<()> {
        if self.cur_doc == TERMINATED {
            return Err(Error::Corruption(
                "materialize_hits on an exhausted decoder".into(),
            ));
        }
        if self.hits_consumed {
            return Err(Error::Corruption(
                "hits of the current document were already consumed".into(),
            ));
        }
        out.reset_for(self.cur_doc, self.cur_freq);
        match dws {
            Some(dws) => self.walk_hits(|pos, payload| {
                out.push(TermHit::new(pos, payload));
                dws.set(term, pos);
            })?,
            None => self.walk_hits(|pos, payload| {
                out.push(TermHit::new(pos, payload));
            })?,
        }
        Ok(())
    }
}

// ── Write side ───────────────────────────────────────────────────────────

/// Stateful writer producing block-codec posting storage, for segment
/// builds and merge outputs.
#[derive(Debug, Default)]
pub struct BlockWriter {
    data: Vec<u8>,

    term_open: bool,
    term_start: usize,
    term_docs: u32,
    term_has_docs: bool,
    prev_doc: DocId,

    doc_open: bool,
    pending_doc: DocId,
    doc_buf: Vec<u8>,
    doc_hits: u32,
    prev_pos: TokenPos,
}

impl BlockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze the written storage into its read-side form.
    pub fn finish(self) -> BlockPostings {
        debug_assert!(!self.term_open);
        BlockPostings::new(self.data)
    }

    fn write_doc_header(&mut self, doc: DocId, freq: u32) {
        let delta = if self.term_has_docs {
            (doc - self.prev_doc) as u64
        } else {
            doc as u64
        };
        // Vec sinks cannot fail
        write_vint(&mut self.data, delta).unwrap();
        write_vint(&mut self.data, freq as u64).unwrap();
        self.prev_doc = doc;
        self.term_has_docs = true;
        self.term_docs += 1;
    }
}

impl PostingWriter for BlockWriter {
    fn codec_identifier(&self) -> &'static str {
        BLOCK_CODEC
    }

    fn begin_term(&mut self) {
        debug_assert!(!self.term_open && !self.doc_open);
        self.term_open = true;
        self.term_start = self.data.len();
        self.term_docs = 0;
        self.term_has_docs = false;
        self.prev_doc = 0;
    }

    fn begin_document(&mut self, doc: DocId) -> Result<()> {
        debug_assert!(self.term_open && !self.doc_open);
        if doc == TERMINATED {
            return Err(Error::Corruption("document id out of range".into()));
        }
        if self.term_has_docs && doc <= self.prev_doc {
            return Err(Error::Corruption("document ids out of order".into()));
        }
        self.pending_doc = doc;
        self.doc_buf.clear();
        self.doc_hits = 0;
        self.doc_open = true;
        Ok(())
    }

    fn new_hit(&mut self, pos: TokenPos, payload: &[u8]) -> Result<()> {
        debug_assert!(self.doc_open);
        if pos >= Limits::MAX_POSITION {
            return Err(Error::Corruption("hit position out of range".into()));
        }
        if payload.len() > Limits::MAX_PAYLOAD {
            return Err(Error::Corruption("hit payload too long".into()));
        }
        let delta = if self.doc_hits == 0 {
            pos as u64
        } else {
            if pos <= self.prev_pos {
                return Err(Error::Corruption("hit positions out of order".into()));
            }
            (pos - self.prev_pos) as u64
        };
        write_vint(&mut self.doc_buf, (delta << 4) | payload.len() as u64).unwrap();
        self.doc_buf.extend_from_slice(payload);
        self.prev_pos = pos;
        self.doc_hits += 1;
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        debug_assert!(self.doc_open);
        if self.doc_hits == 0 {
            return Err(Error::Corruption("document with no hits".into()));
        }
        self.write_doc_header(self.pending_doc, self.doc_hits);
        self.data.extend_from_slice(&self.doc_buf);
        self.doc_open = false;
        Ok(())
    }

    fn end_term(&mut self) -> Result<TermIndexCtx> {
        debug_assert!(self.term_open && !self.doc_open);
        self.term_open = false;
        Ok(TermIndexCtx {
            documents: self.term_docs,
            chunk: ChunkRef {
                offset: self.term_start as u64,
                len: (self.data.len() - self.term_start) as u32,
            },
        })
    }

    fn append_chunk(&mut self, src: &dyn CodecAccess, tctx: &TermIndexCtx) -> Result<TermIndexCtx> {
        debug_assert!(!self.term_open);
        if src.codec_identifier() != BLOCK_CODEC {
            return Err(Error::CodecMismatch {
                expected: BLOCK_CODEC,
                got: src.codec_identifier(),
            });
        }
        let bytes = src.chunk_bytes(&tctx.chunk)?;
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        Ok(TermIndexCtx {
            documents: tctx.documents,
            chunk: ChunkRef {
                offset,
                len: bytes.len() as u32,
            },
        })
    }

    fn merge(&mut self, participants: &[MergeParticipant<'_>]) -> Result<()> {
        debug_assert!(self.term_open && !self.doc_open);
        let mut decoders = Vec::with_capacity(participants.len());
        for p in participants {
            if p.access.codec_identifier() != BLOCK_CODEC {
                return Err(Error::CodecMismatch {
                    expected: BLOCK_CODEC,
                    got: p.access.codec_identifier(),
                });
            }
            if p.tctx.documents == 0 {
                continue;
            }
            let bytes = p.access.chunk_bytes(&p.tctx.chunk)?;
            decoders.push((BlockDecoder::new(bytes, p.tctx.documents)?, &p.registry));
        }

        let mut to_advance: Vec<usize> = Vec::with_capacity(decoders.len());
        while !decoders.is_empty() {
            to_advance.clear();
            to_advance.push(0);
            let mut lowest = decoders[0].0.doc();
            for (i, (dec, _)) in decoders.iter().enumerate().skip(1) {
                let doc = dec.doc();
                if doc < lowest {
                    lowest = doc;
                    to_advance.clear();
                    to_advance.push(i);
                } else if doc == lowest {
                    to_advance.push(i);
                }
            }

            // Participants arrive newest-generation-first, so the first
            // decoder holding the lowest doc is the surviving version.
            let (winner, registry) = &mut decoders[to_advance[0]];
            if !registry.test(lowest) {
                let freq = winner.freq();
                let span = winner.hit_span()?;
                self.write_doc_header(lowest, freq);
                self.data.extend_from_slice(span);
            }

            for &i in to_advance.iter().rev() {
                if !decoders[i].0.next()? {
                    decoders.remove(i);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_term(
        writer: &mut BlockWriter,
        docs: &[(DocId, &[(TokenPos, &[u8])])],
    ) -> TermIndexCtx {
        writer.begin_term();
        for (doc, hits) in docs {
            writer.begin_document(*doc).unwrap();
            for (pos, payload) in *hits {
                writer.new_hit(*pos, payload).unwrap();
            }
            writer.end_document().unwrap();
        }
        writer.end_term().unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut writer = BlockWriter::new();
        let tctx = write_term(
            &mut writer,
            &[
                (0, &[(1, b"" as &[u8]), (5, b"xy")]),
                (3, &[(2, b"")]),
                (900, &[(0, b"abc"), (1, b""), (8191, b"12345678")]),
            ],
        );
        assert_eq!(tctx.documents, 3);
        let postings = writer.finish();

        let mut dec = postings.new_decoder(&tctx).unwrap();
        let mut hits = TermHits::new();

        assert_eq!(dec.doc(), 0);
        assert_eq!(dec.freq(), 2);
        dec.materialize_hits(1, None, &mut hits).unwrap();
        assert_eq!(hits.all()[0].pos, 1);
        assert_eq!(hits.all()[1].pos, 5);
        assert_eq!(hits.all()[1].payload(), b"xy");

        assert!(dec.next().unwrap());
        assert_eq!(dec.doc(), 3);
        assert_eq!(dec.freq(), 1);

        assert!(dec.next().unwrap());
        assert_eq!(dec.doc(), 900);
        dec.materialize_hits(1, None, &mut hits).unwrap();
        assert_eq!(hits.freq(), 3);
        assert_eq!(hits.all()[0].payload(), b"abc");
        assert_eq!(hits.all()[2].pos, 8191);
        assert_eq!(hits.all()[2].payload(), b"12345678");

        assert!(!dec.next().unwrap());
        assert_eq!(dec.doc(), TERMINATED);
    }

    #[test]
    fn test_skip_without_materializing() {
        let mut writer = BlockWriter::new();
        let tctx = write_term(
            &mut writer,
            &[
                (1, &[(0, b"aa" as &[u8]), (3, b"")]),
                (2, &[(7, b"bb")]),
            ],
        );
        let postings = writer.finish();

        let mut dec = postings.new_decoder(&tctx).unwrap();
        assert!(dec.next().unwrap());
        assert_eq!(dec.doc(), 2);

        let mut hits = TermHits::new();
        dec.materialize_hits(1, None, &mut hits).unwrap();
        assert_eq!(hits.all()[0].pos, 7);
        assert_eq!(hits.all()[0].payload(), b"bb");
    }

    #[test]
    fn test_seek() {
        static HIT: [(TokenPos, &[u8]); 1] = [(1, b"")];
        let mut writer = BlockWriter::new();
        let docs: Vec<(DocId, &[(TokenPos, &[u8])])> =
            (0..50).map(|i| (i * 2, &HIT[..])).collect();
        let tctx = write_term(&mut writer, &docs);
        let postings = writer.finish();

        let mut dec = postings.new_decoder(&tctx).unwrap();
        assert_eq!(dec.seek(40).unwrap(), 40);
        assert_eq!(dec.seek(41).unwrap(), 42);
        assert_eq!(dec.seek(99).unwrap(), TERMINATED);
    }

    #[test]
    fn test_dws_stamping() {
        let mut writer = BlockWriter::new();
        let tctx = write_term(&mut writer, &[(4, &[(2, b"" as &[u8]), (9, b"")])]);
        let postings = writer.finish();

        let mut dec = postings.new_decoder(&tctx).unwrap();
        let mut dws = DocWordsSpace::new(Limits::MAX_POSITION);
        let mut hits = TermHits::new();
        dec.materialize_hits(7, Some(&mut dws), &mut hits).unwrap();

        assert!(dws.test(7, 2));
        assert!(dws.test(7, 9));
        assert!(!dws.test(7, 3));
    }

    #[test]
    fn test_writer_rejects_out_of_order_docs() {
        let mut writer = BlockWriter::new();
        writer.begin_term();
        writer.begin_document(5).unwrap();
        writer.new_hit(0, b"").unwrap();
        writer.end_document().unwrap();
        assert!(writer.begin_document(5).is_err());
    }

    #[test]
    fn test_writer_rejects_out_of_order_positions() {
        let mut writer = BlockWriter::new();
        writer.begin_term();
        writer.begin_document(1).unwrap();
        writer.new_hit(4, b"").unwrap();
        assert!(writer.new_hit(4, b"").is_err());
    }

    #[test]
    fn test_writer_rejects_empty_document() {
        let mut writer = BlockWriter::new();
        writer.begin_term();
        writer.begin_document(1).unwrap();
        assert!(writer.end_document().is_err());
    }

    #[test]
    fn test_append_chunk_is_byte_identical() {
        let mut writer = BlockWriter::new();
        let tctx = write_term(
            &mut writer,
            &[(3, &[(1, b"p" as &[u8])]), (9, &[(0, b"")])],
        );
        let src = writer.finish();

        let mut out = BlockWriter::new();
        let out_tctx = out.append_chunk(&src, &tctx).unwrap();
        assert_eq!(out_tctx.documents, tctx.documents);

        let out_postings = out.finish();
        assert_eq!(
            src.chunk_bytes(&tctx.chunk).unwrap(),
            out_postings.chunk_bytes(&out_tctx.chunk).unwrap()
        );
    }

    #[test]
    fn test_native_merge_prefers_first_participant() {
        // Same doc in both participants; the first one's payload must win.
        let mut w1 = BlockWriter::new();
        let t1 = write_term(&mut w1, &[(7, &[(1, b"new" as &[u8])])]);
        let p1 = w1.finish();

        let mut w2 = BlockWriter::new();
        let t2 = write_term(&mut w2, &[(5, &[(0, b"" as &[u8])]), (7, &[(1, b"old")])]);
        let p2 = w2.finish();

        let mut out = BlockWriter::new();
        out.begin_term();
        out.merge(&[
            MergeParticipant {
                access: &p1,
                tctx: t1,
                registry: crate::MaskedDocsRegistry::empty(),
            },
            MergeParticipant {
                access: &p2,
                tctx: t2,
                registry: crate::MaskedDocsRegistry::empty(),
            },
        ])
        .unwrap();
        let tctx = out.end_term().unwrap();
        assert_eq!(tctx.documents, 2);

        let postings = out.finish();
        let mut dec = postings.new_decoder(&tctx).unwrap();
        let mut hits = TermHits::new();

        assert_eq!(dec.doc(), 5);
        assert!(dec.next().unwrap());
        assert_eq!(dec.doc(), 7);
        dec.materialize_hits(1, None, &mut hits).unwrap();
        assert_eq!(hits.all()[0].payload(), b"new");
        assert!(!dec.next().unwrap());
    }

    #[test]
    fn test_native_merge_honors_masks() {
        let mut w1 = BlockWriter::new();
        let t1 = write_term(&mut w1, &[(2, &[(0, b"" as &[u8])]), (4, &[(0, b"")])]);
        let p1 = w1.finish();

        let masked = std::sync::Arc::new(crate::TombstoneSet::new(vec![4]));
        let mut out = BlockWriter::new();
        out.begin_term();
        out.merge(&[MergeParticipant {
            access: &p1,
            tctx: t1,
            registry: crate::MaskedDocsRegistry::new(vec![masked]),
        }])
        .unwrap();
        let tctx = out.end_term().unwrap();
        assert_eq!(tctx.documents, 1);

        let postings = out.finish();
        let dec = postings.new_decoder(&tctx).unwrap();
        assert_eq!(dec.doc(), 2);
    }
}
