//! Multi-way segment merge across generations.
//!
//! Candidates are processed newest-generation-first; a document appearing
//! in several candidates survives through the newest one, and tombstone
//! sets contributed by newer candidates mask the older ones. The outer loop
//! is a merge-sort on term token, so the output term list comes out in
//! lexicographic order regardless of any per-segment term numbering.
//!
//! Per selected term, three paths exist: a raw chunk copy when a single
//! unmasked candidate shares the output codec, the codec-native merge when
//! all candidates on the term share it, and a generic decode/re-encode
//! multi-way merge otherwise.


use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::codec::{CodecAccess, MergeParticipant, PostingWriter, TermIndexCtx};
use crate::error::{Error, Result};
use crate::segment::{IndexSource, TermCursor};
use crate::structures::{MaskedDocsRegistry, TermHits, TombstoneSet};
use crate::{Gen, TERMINATED};

/// One segment taking part in a merge.
pub struct MergeCandidate<'a> {
    pub r#gen: Gen,
    /// `None` means the candidate only masks documents: it contributes its
    /// tombstones but no postings.
    pub access: Option<&'a dyn CodecAccess>,
    pub terms: Box<dyn TermCursor + 'a>,
    pub masked: Option<Arc<TombstoneSet>>,
}

impl<'a> MergeCandidate<'a> {
    pub fn from_source(source: &'a dyn IndexSource) -> Self {
        Self {
            r#gen: source.generation(),
            access: Some(source.codec_access()),
            terms: source.term_cursor(),
            masked: source.masked_documents(),
        }
    }
}

/// How a tracked generation should be handled after a merge; see
/// [`MergeCandidatesCollection::consider_tracked_sources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRetention {
    /// Not among the merge candidates; keep wholesale.
    RetainAll,
    /// Subsumed by the merge output; drop entirely.
    Delete,
    /// Postings are subsumed, but an older retained source still depends on
    /// this generation's tombstones; preserve those.
    RetainDocumentIdUpdates,
}

/// The set of segments being merged into one new segment.
///
/// [`commit`](Self::commit) must run before anything else: it establishes
/// the generation-descending candidate order every downstream tie-break
/// relies on, and indexes the tombstone stacks.
pub struct MergeCandidatesCollection<'a> {
    candidates: Vec<MergeCandidate<'a>>,
    /// Tombstone sets in candidate (gen-DESC) order.
    sets: Vec<Arc<TombstoneSet>>,
    /// Per candidate: how many entries of `sets` belong to strictly newer
    /// candidates.
    set_counts: Vec<usize>,
}

impl<'a> MergeCandidatesCollection<'a> {
    pub fn new(candidates: Vec<MergeCandidate<'a>>) -> Self {
        Self {
            candidates,
            sets: Vec::new(),
            set_counts: Vec::new(),
        }
    }

    pub fn push(&mut self, candidate: MergeCandidate<'a>) {
        self.candidates.push(candidate);
    }

    /// Sort candidates newest-first and index their tombstone stacks.
    pub fn commit(&mut self) {
        self.candidates.sort_by(|a, b| b.r#gen.cmp(&a.r#gen));
        self.sets.clear();
        self.set_counts.clear();
        for candidate in &self.candidates {
            self.set_counts.push(self.sets.len());
            if let Some(masked) = &candidate.masked {
                self.sets.push(masked.clone());
            }
        }
    }

    /// Registry of every tombstone set contributed by candidates strictly
    /// newer than the one at `idx` (post-commit indexing).
    pub fn scanner_registry_for(&self, idx: usize) -> MaskedDocsRegistry {
        MaskedDocsRegistry::new(self.sets[..self.set_counts[idx]].to_vec())
    }

    /// Merge all candidates into `writer`, appending the surviving terms to
    /// `out_terms` in lexicographic token order.
    ///
    /// `flush_every` is a threshold (in output bytes) for incrementally
    /// flushing finished terms to a backing store; see [`maybe_flush`].
    pub fn merge(
        &mut self,
        writer: &mut dyn PostingWriter,
        out_terms: &mut Vec<(Box<[u8]>, TermIndexCtx)>,
        flush_every: usize,
    ) -> Result<()> {
        let Self {
            candidates,
            sets,
            set_counts,
        } = self;

        for pair in candidates.windows(2) {
            if pair[1].r#gen >= pair[0].r#gen {
                return Err(Error::Corruption(
                    "merge candidates not strictly ordered by generation".into(),
                ));
            }
        }

        // Candidates that can contribute postings. Mask-only candidates
        // (no codec access) already did their part through `sets`.
        let mut live: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.access.is_some() && c.terms.cur().is_some())
            .map(|(idx, _)| idx)
            .collect();
        if live.is_empty() {
            return Ok(());
        }

        let registry_for =
            |idx: usize| MaskedDocsRegistry::new(sets[..set_counts[idx]].to_vec());

        let out_codec = writer.codec_identifier();
        let mut to_advance: Vec<usize> = Vec::with_capacity(live.len());
        let mut hits = TermHits::new();
        let mut terms_processed = 0usize;

        log::debug!("merging {} candidates", live.len());

        while !live.is_empty() {
            // Select the lexicographically smallest current term and every
            // candidate positioned on it. `live` preserves the gen-DESC
            // candidate order, so `to_advance[0]` is always the newest.
            to_advance.clear();
            to_advance.push(0);
            let mut selected = candidates[live[0]].terms.cur().unwrap().0;
            for i in 1..live.len() {
                let token = candidates[live[i]].terms.cur().unwrap().0;
                match token.cmp(selected) {
                    std::cmp::Ordering::Less => {
                        to_advance.clear();
                        to_advance.push(i);
                        selected = token;
                    }
                    std::cmp::Ordering::Equal => to_advance.push(i),
                    std::cmp::Ordering::Greater => {}
                }
            }
            let out_token: Box<[u8]> = selected.into();

            let first_codec =
                candidates[live[to_advance[0]]].access.unwrap().codec_identifier();
            let same_codec = to_advance
                .iter()
                .all(|&t| candidates[live[t]].access.unwrap().codec_identifier() == first_codec);
            let fast_path = same_codec && first_codec == out_codec;

            if to_advance.len() == 1 {
                let idx = live[to_advance[0]];
                let tctx = candidates[idx].terms.cur().unwrap().1;
                let access = candidates[idx].access.unwrap();
                let registry = registry_for(idx);

                if fast_path && registry.is_empty() {
                    if tctx.documents > 0 {
                        let out_tctx = writer.append_chunk(access, &tctx)?;
                        out_terms.push((out_token, out_tctx));
                    }
                } else if tctx.documents > 0 {
                    let mut dec = access.new_decoder(&tctx)?;
                    writer.begin_term();
                    loop {
                        let doc = dec.doc();
                        if doc == TERMINATED {
                            return Err(Error::Corruption(
                                "posting list shorter than its document count".into(),
                            ));
                        }
                        if !registry.test(doc) {
                            writer.begin_document(doc)?;
                            dec.materialize_hits(1, None, &mut hits)?;
                            for hit in hits.all() {
                                writer.new_hit(hit.pos, hit.payload())?;
                            }
                            writer.end_document()?;
                        }
                        if !dec.next()? {
                            break;
                        }
                    }
                    let out_tctx = writer.end_term()?;
                    if out_tctx.documents > 0 {
                        out_terms.push((out_token, out_tctx));
                    }
                }
                // documents == 0: degenerate term, emits nothing.
            } else if fast_path {
                let mut participants = Vec::with_capacity(to_advance.len());
                for &t in &to_advance {
                    let idx = live[t];
                    let tctx = candidates[idx].terms.cur().unwrap().1;
                    if tctx.documents == 0 {
                        continue;
                    }
                    participants.push(MergeParticipant {
                        access: candidates[idx].access.unwrap(),
                        tctx,
                        registry: registry_for(idx),
                    });
                }
                if !participants.is_empty() {
                    writer.begin_term();
                    writer.merge(&participants)?;
                    let out_tctx = writer.end_term()?;
                    if out_tctx.documents > 0 {
                        out_terms.push((out_token, out_tctx));
                    }
                }
            } else {
                // Generic path: merge-sort on doc id across decoders of
                // potentially different codecs, re-encoding into the output.
                let mut decoders = Vec::with_capacity(to_advance.len());
                for &t in &to_advance {
                    let idx = live[t];
                    let tctx = candidates[idx].terms.cur().unwrap().1;
                    if tctx.documents == 0 {
                        continue;
                    }
                    let dec = candidates[idx].access.unwrap().new_decoder(&tctx)?;
                    decoders.push((dec, registry_for(idx)));
                }
                if !decoders.is_empty() {
                    writer.begin_term();
                    let mut inner: Vec<usize> = Vec::with_capacity(decoders.len());
                    while !decoders.is_empty() {
                        inner.clear();
                        inner.push(0);
                        let mut lowest = decoders[0].0.doc();
                        for (i, (dec, _)) in decoders.iter().enumerate().skip(1) {
                            let doc = dec.doc();
                            if doc < lowest {
                                lowest = doc;
                                inner.clear();
                                inner.push(i);
                            } else if doc == lowest {
                                inner.push(i);
                            }
                        }

                        // Decoders keep the gen-DESC order, so the first one
                        // holding the lowest doc is the surviving version.
                        let (dec, registry) = &mut decoders[inner[0]];
                        if !registry.test(lowest) {
                            writer.begin_document(lowest)?;
                            dec.materialize_hits(1, None, &mut hits)?;
                            for hit in hits.all() {
                                writer.new_hit(hit.pos, hit.payload())?;
                            }
                            writer.end_document()?;
                        }

                        for &i in inner.iter().rev() {
                            if !decoders[i].0.next()? {
                                decoders.remove(i);
                            }
                        }
                    }
                    let out_tctx = writer.end_term()?;
                    if out_tctx.documents > 0 {
                        out_terms.push((out_token, out_tctx));
                    }
                }
            }

            terms_processed += 1;
            if terms_processed.is_multiple_of(100_000) {
                log::debug!("merge progress: {} terms processed", terms_processed);
            }
            maybe_flush(writer, flush_every)?;

            // Advance every cursor that sat on the selected term; retire the
            // exhausted ones, preserving order.
            for &t in to_advance.iter().rev() {
                let idx = live[t];
                let cursor = &mut candidates[idx].terms;
                cursor.advance();
                if cursor.cur().is_none() {
                    live.remove(t);
                }
            }
        }

        log::debug!("merge finished: {} terms", terms_processed);
        Ok(())
    }

    /// Classify the caller's tracked generations after this merge.
    ///
    /// A generation that was not merged is kept wholesale. A merged one is
    /// deletable unless some older tracked generation survives outside the
    /// merge, in which case its tombstones still matter and must outlive
    /// its postings.
    pub fn consider_tracked_sources(&self, mut tracked: Vec<Gen>) -> Vec<(Gen, SourceRetention)> {
        tracked.sort_unstable();
        let candidate_gens: FxHashSet<Gen> = self.candidates.iter().map(|c| c.r#gen).collect();

        let mut out = Vec::with_capacity(tracked.len());
        let mut seen_retained = false;
        for r#gen in tracked {
            if !candidate_gens.contains(&r#gen) {
                seen_retained = true;
                out.push((r#gen, SourceRetention::RetainAll));
            } else if seen_retained {
                out.push((r#gen, SourceRetention::RetainDocumentIdUpdates));
            } else {
                out.push((r#gen, SourceRetention::Delete));
            }
        }
        out
    }
}

/// Extension point for incrementally flushing finished terms out of the
/// writer once its buffer exceeds `flush_every` bytes. Kept as a no-op
/// until a backing store that can accept partial outputs exists; callers
/// pass the threshold so their call sites stay stable.
fn maybe_flush(_writer: &mut dyn PostingWriter, _flush_every: usize) -> Result<()> {
    Ok(())
}
