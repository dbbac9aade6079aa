//! In-memory segment backed by the block codec, and its builder.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::codec::{BlockPostings, BlockWriter, CodecAccess, PostingWriter, TermIndexCtx};
use crate::error::Result;
use crate::structures::TombstoneSet;
use crate::{DocId, Gen, TokenPos};

use super::{IndexSource, SegmentMeta, TermCursor};

/// Immutable in-memory segment: sorted term dictionary plus block-codec
/// posting storage.
pub struct RamSegment {
    meta: SegmentMeta,
    terms: BTreeMap<Box<[u8]>, TermIndexCtx>,
    postings: BlockPostings,
    masked: Option<Arc<TombstoneSet>>,
}

impl RamSegment {
    /// Assemble a segment from already-encoded parts, e.g. a merge output.
    pub fn from_parts(
        generation: Gen,
        num_docs: u32,
        terms: Vec<(Box<[u8]>, TermIndexCtx)>,
        postings: BlockPostings,
        masked: Option<TombstoneSet>,
    ) -> Self {
        Self {
            meta: SegmentMeta {
                generation,
                num_docs,
            },
            terms: terms.into_iter().collect(),
            postings,
            masked: masked.filter(|m| !m.is_empty()).map(Arc::new),
        }
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }
}

impl IndexSource for RamSegment {
    fn meta(&self) -> SegmentMeta {
        self.meta
    }

    fn index_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn masked_documents(&self) -> Option<Arc<TombstoneSet>> {
        self.masked.clone()
    }

    fn codec_access(&self) -> &dyn CodecAccess {
        &self.postings
    }

    fn term_cursor(&self) -> Box<dyn TermCursor + '_> {
        let mut iter = self.terms.iter();
        let cur = iter.next();
        Box::new(RamTermCursor { iter, cur })
    }

    fn resolve_term(&self, token: &[u8]) -> Option<TermIndexCtx> {
        self.terms.get(token).copied()
    }
}

struct RamTermCursor<'a> {
    iter: btree_map::Iter<'a, Box<[u8]>, TermIndexCtx>,
    cur: Option<(&'a Box<[u8]>, &'a TermIndexCtx)>,
}

impl TermCursor for RamTermCursor<'_> {
    fn cur(&self) -> Option<(&[u8], TermIndexCtx)> {
        self.cur.map(|(token, tctx)| (token.as_ref(), *tctx))
    }

    fn advance(&mut self) {
        self.cur = self.iter.next();
    }
}

/// Builds a [`RamSegment`] term by term. Terms and documents may be fed in
/// any order; encoding sorts them.
pub struct SegmentBuilder {
    generation: Gen,
    terms: BTreeMap<Vec<u8>, BTreeMap<DocId, Vec<(TokenPos, Vec<u8>)>>>,
    tombstones: Vec<DocId>,
}

impl SegmentBuilder {
    pub fn new(generation: Gen) -> Self {
        Self {
            generation,
            terms: BTreeMap::new(),
            tombstones: Vec::new(),
        }
    }

    /// Record occurrences of `term` in `doc` at the given positions.
    pub fn add(&mut self, term: &[u8], doc: DocId, positions: &[TokenPos]) {
        let hits = self.doc_entry(term, doc);
        hits.extend(positions.iter().map(|&pos| (pos, Vec::new())));
    }

    /// Like [`add`](Self::add), with a payload attached to each hit.
    pub fn add_with_payloads(&mut self, term: &[u8], doc: DocId, hits: &[(TokenPos, &[u8])]) {
        let entry = self.doc_entry(term, doc);
        entry.extend(hits.iter().map(|&(pos, payload)| (pos, payload.to_vec())));
    }

    /// Register `term` with no postings at all. Such degenerate entries can
    /// appear when index structures are driven directly; merge drops them.
    pub fn add_empty_term(&mut self, term: &[u8]) {
        self.terms.entry(term.to_vec()).or_default();
    }

    /// Mask `doc` in all older generations.
    pub fn delete_document(&mut self, doc: DocId) {
        self.tombstones.push(doc);
    }

    fn doc_entry(&mut self, term: &[u8], doc: DocId) -> &mut Vec<(TokenPos, Vec<u8>)> {
        self.terms
            .entry(term.to_vec())
            .or_default()
            .entry(doc)
            .or_default()
    }

    pub fn build(self) -> Result<RamSegment> {
        let mut writer = BlockWriter::new();
        let mut terms = BTreeMap::new();
        let mut docs_seen: FxHashSet<DocId> = FxHashSet::default();

        for (token, docs) in self.terms {
            if docs.is_empty() {
                terms.insert(token.into_boxed_slice(), TermIndexCtx::default());
                continue;
            }
            writer.begin_term();
            for (doc, mut hits) in docs {
                hits.sort_by(|a, b| a.0.cmp(&b.0));
                writer.begin_document(doc)?;
                for (pos, payload) in &hits {
                    writer.new_hit(*pos, payload)?;
                }
                writer.end_document()?;
                docs_seen.insert(doc);
            }
            let tctx = writer.end_term()?;
            terms.insert(token.into_boxed_slice(), tctx);
        }

        let masked = if self.tombstones.is_empty() {
            None
        } else {
            Some(Arc::new(TombstoneSet::new(self.tombstones)))
        };

        Ok(RamSegment {
            meta: SegmentMeta {
                generation: self.generation,
                num_docs: docs_seen.len() as u32,
            },
            terms,
            postings: writer.finish(),
            masked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::TermHits;

    #[test]
    fn test_build_and_resolve() {
        let mut builder = SegmentBuilder::new(1);
        builder.add(b"cat", 3, &[1, 4]);
        builder.add(b"cat", 1, &[0]);
        builder.add(b"dog", 1, &[2]);
        let segment = builder.build().unwrap();

        assert_eq!(segment.meta().num_docs, 2);
        assert!(!segment.index_empty());

        let tctx = segment.resolve_term(b"cat").unwrap();
        assert_eq!(tctx.documents, 2);

        let mut dec = segment.codec_access().new_decoder(&tctx).unwrap();
        assert_eq!(dec.doc(), 1);
        assert!(dec.next().unwrap());
        assert_eq!(dec.doc(), 3);

        let mut hits = TermHits::new();
        dec.materialize_hits(1, None, &mut hits).unwrap();
        assert_eq!(hits.freq(), 2);
        assert_eq!(hits.all()[0].pos, 1);
        assert_eq!(hits.all()[1].pos, 4);

        assert!(segment.resolve_term(b"fish").is_none());
    }

    #[test]
    fn test_term_cursor_is_lexicographic() {
        let mut builder = SegmentBuilder::new(1);
        builder.add(b"zebra", 0, &[0]);
        builder.add(b"ant", 0, &[1]);
        builder.add(b"mole", 0, &[2]);
        let segment = builder.build().unwrap();

        let mut cursor = segment.term_cursor();
        let mut seen = Vec::new();
        while let Some((token, _)) = cursor.cur() {
            seen.push(token.to_vec());
            cursor.advance();
        }
        assert_eq!(seen, vec![b"ant".to_vec(), b"mole".to_vec(), b"zebra".to_vec()]);
    }

    #[test]
    fn test_empty_term_entry() {
        let mut builder = SegmentBuilder::new(1);
        builder.add_empty_term(b"ghost");
        let segment = builder.build().unwrap();

        let tctx = segment.resolve_term(b"ghost").unwrap();
        assert_eq!(tctx.documents, 0);
        assert_eq!(segment.meta().num_docs, 0);
    }

    #[test]
    fn test_tombstones() {
        let mut builder = SegmentBuilder::new(2);
        builder.add(b"cat", 0, &[0]);
        builder.delete_document(17);
        let segment = builder.build().unwrap();

        let masked = segment.masked_documents().unwrap();
        assert!(masked.contains(17));
        assert!(!masked.contains(0));
    }
}
