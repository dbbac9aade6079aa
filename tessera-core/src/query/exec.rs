//! Per-segment query execution.
//!
//! Execution runs in two layers. The doc-level layer walks the operator
//! tree as a forward-only cursor over the per-term decoders, yielding
//! candidate documents in ascending order. For each candidate that passes
//! the masked-documents registry and the optional pre-filter, the
//! confirmation layer settles position-dependent operators (phrase
//! adjacency through [`DocWordsSpace`] probes), materializes hits for the
//! terms that took part in the match and hands the transient
//! [`MatchedDocument`] to the scorer.

use crate::codec::PostingDecoder;
use crate::error::{Error, Result};
use crate::segment::IndexSource;
use crate::structures::{DocWordsSpace, MaskedDocsRegistry, TermHits};
use crate::{DocId, ExecTermId, Limits, TERMINATED, TokenPos};

use super::{
    DocumentFilter, DocumentScorer, ExecFlags, MatchedDocument, MatchedQueryTerm, Query,
    QueryIndexTerm, QueryIndexTerms, QueryNode, Verdict,
};

/// One resolved query term: its decoder over the segment's posting list
/// plus the segment-local ID used for DocWordsSpace stamping.
struct TermState<'a> {
    /// Index into `Query::terms`.
    qterm: usize,
    exec_id: ExecTermId,
    dec: Box<dyn PostingDecoder + 'a>,
}

/// Compiled operator tree. Leaves index into the state table so that
/// repeated tokens share one decoder.
enum ExecNode {
    /// A term absent from the segment, or an operator that can never match.
    Empty,
    Term {
        state: usize,
    },
    Phrase {
        members: Vec<usize>,
        current: DocId,
    },
    Bool {
        must: Vec<ExecNode>,
        should: Vec<ExecNode>,
        must_not: Vec<ExecNode>,
        current: DocId,
    },
}

/// Mutable per-execution scratch shared by confirmation and scoring.
struct EvalCx {
    dws: DocWordsSpace,
    /// Per-state hit buffers, reused across documents.
    hits: Vec<TermHits>,
    /// Per-state: last document the term matched in.
    matched: Vec<DocId>,
    documents_only: bool,
}

impl EvalCx {
    fn ensure_materialized(
        &mut self,
        state: usize,
        doc: DocId,
        states: &mut [TermState<'_>],
    ) -> Result<()> {
        if self.hits[state].doc() != doc {
            let st = &mut states[state];
            st.dec
                .materialize_hits(st.exec_id, Some(&mut self.dws), &mut self.hits[state])?;
        }
        Ok(())
    }

    fn record_term_match(
        &mut self,
        state: usize,
        doc: DocId,
        states: &mut [TermState<'_>],
    ) -> Result<()> {
        if !self.documents_only {
            self.ensure_materialized(state, doc, states)?;
            self.matched[state] = doc;
        }
        Ok(())
    }
}

impl ExecNode {
    fn doc(&self, states: &[TermState<'_>]) -> DocId {
        match self {
            ExecNode::Empty => TERMINATED,
            ExecNode::Term { state } => states[*state].dec.doc(),
            ExecNode::Phrase { current, .. } | ExecNode::Bool { current, .. } => *current,
        }
    }

    /// Move to the first doc-level candidate >= `target`.
    fn seek(&mut self, target: DocId, states: &mut [TermState<'_>]) -> Result<DocId> {
        match self {
            ExecNode::Empty => Ok(TERMINATED),
            ExecNode::Term { state } => {
                if target == TERMINATED {
                    return Ok(TERMINATED);
                }
                states[*state].dec.seek(target)
            }
            ExecNode::Phrase { members, current } => {
                if target == TERMINATED {
                    *current = TERMINATED;
                    return Ok(TERMINATED);
                }
                *current = seek_members(members, target, states)?;
                Ok(*current)
            }
            ExecNode::Bool {
                must,
                should,
                must_not,
                current,
            } => {
                if target == TERMINATED {
                    *current = TERMINATED;
                    return Ok(TERMINATED);
                }
                let mut target = target;
                loop {
                    let doc = if must.is_empty() {
                        union_seek(should, target, states)?
                    } else {
                        intersect_seek(must, target, states)?
                    };
                    if doc == TERMINATED {
                        *current = TERMINATED;
                        return Ok(TERMINATED);
                    }
                    if excludes(must_not, doc, states)? {
                        target = doc + 1;
                        continue;
                    }
                    *current = doc;
                    return Ok(doc);
                }
            }
        }
    }

    /// Settle position-dependent operators for `doc` and record which terms
    /// took part in the match. Only called with `doc` equal to the node's
    /// current doc-level candidate.
    fn confirm(&mut self, doc: DocId, cx: &mut EvalCx, states: &mut [TermState<'_>]) -> Result<bool> {
        match self {
            ExecNode::Empty => Ok(false),
            ExecNode::Term { state } => {
                if states[*state].dec.doc() != doc {
                    return Ok(false);
                }
                cx.record_term_match(*state, doc, states)?;
                Ok(true)
            }
            ExecNode::Phrase { members, current } => {
                if *current != doc {
                    return Ok(false);
                }
                // Adjacency is checked through DocWordsSpace probes, so the
                // member hits are materialized even in documents-only mode.
                for &m in members.iter() {
                    cx.ensure_materialized(m, doc, states)?;
                }
                let ok = phrase_at(members, cx, states);
                if ok && !cx.documents_only {
                    for &m in members.iter() {
                        cx.matched[m] = doc;
                    }
                }
                Ok(ok)
            }
            ExecNode::Bool {
                must,
                should,
                current,
                ..
            } => {
                if *current != doc {
                    return Ok(false);
                }
                for child in must.iter_mut() {
                    if !child.confirm(doc, cx, states)? {
                        return Ok(false);
                    }
                }
                // Optional clauses are all evaluated, not short-circuited,
                // so the scorer sees every term that matched the document.
                let mut any_should = false;
                for child in should.iter_mut() {
                    if child.seek(doc, states)? == doc && child.confirm(doc, cx, states)? {
                        any_should = true;
                    }
                }
                Ok(!must.is_empty() || any_should)
            }
        }
    }
}

/// Leapfrog intersection across sibling nodes: smallest doc present in all.
/// Seeks are unconditional; they are idempotent once a child is already at
/// or past the target.
fn intersect_seek(
    children: &mut [ExecNode],
    mut target: DocId,
    states: &mut [TermState<'_>],
) -> Result<DocId> {
    loop {
        let mut candidate = target;
        let mut aligned = true;
        for child in children.iter_mut() {
            let doc = child.seek(candidate, states)?;
            if doc == TERMINATED {
                return Ok(TERMINATED);
            }
            if doc > candidate {
                candidate = doc;
                aligned = false;
            }
        }
        if aligned {
            return Ok(candidate);
        }
        target = candidate;
    }
}

/// Union across sibling nodes: smallest doc present in any.
fn union_seek(
    children: &mut [ExecNode],
    target: DocId,
    states: &mut [TermState<'_>],
) -> Result<DocId> {
    let mut lowest = TERMINATED;
    for child in children.iter_mut() {
        lowest = lowest.min(child.seek(target, states)?);
    }
    Ok(lowest)
}

/// Doc-level exclusion check for must_not clauses.
fn excludes(
    children: &mut [ExecNode],
    doc: DocId,
    states: &mut [TermState<'_>],
) -> Result<bool> {
    for child in children.iter_mut() {
        if child.seek(doc, states)? == doc {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Leapfrog intersection directly over member decoders.
fn seek_members(
    members: &[usize],
    mut target: DocId,
    states: &mut [TermState<'_>],
) -> Result<DocId> {
    loop {
        let mut candidate = target;
        let mut aligned = true;
        for &m in members {
            let dec = &mut states[m].dec;
            let doc = if dec.doc() < candidate {
                dec.seek(candidate)?
            } else {
                dec.doc()
            };
            if doc == TERMINATED {
                return Ok(TERMINATED);
            }
            if doc > candidate {
                candidate = doc;
                aligned = false;
            }
        }
        if aligned {
            return Ok(candidate);
        }
        target = candidate;
    }
}

/// Do the members line up at consecutive positions anywhere in the current
/// document? O(freq of the head term) probes, O(1) each.
fn phrase_at(members: &[usize], cx: &EvalCx, states: &[TermState<'_>]) -> bool {
    let head = &cx.hits[members[0]];
    'starts: for hit in head.all() {
        for (i, &m) in members.iter().enumerate().skip(1) {
            let Some(pos) = hit.pos.checked_add(i as TokenPos) else {
                continue 'starts;
            };
            if !cx.dws.test(states[m].exec_id, pos) {
                continue 'starts;
            }
        }
        return true;
    }
    false
}

/// Resolve query tokens against the segment and compile the operator tree.
fn compile<'a>(
    query: &Query,
    source: &'a dyn IndexSource,
) -> Result<(ExecNode, Vec<TermState<'a>>, Vec<Option<usize>>)> {
    let mut states: Vec<TermState<'a>> = Vec::new();
    let mut state_of: Vec<Option<usize>> = Vec::with_capacity(query.terms.len());

    for (qterm, ctx) in query.terms.iter().enumerate() {
        let resolved = match source.resolve_term(&ctx.token) {
            Some(tctx) if tctx.documents > 0 => {
                if states.len() + 1 > usize::from(ExecTermId::MAX) {
                    return Err(Error::Query("too many query terms".into()));
                }
                let dec = source.codec_access().new_decoder(&tctx)?;
                let exec_id = (states.len() + 1) as ExecTermId;
                states.push(TermState {
                    qterm,
                    exec_id,
                    dec,
                });
                Some(states.len() - 1)
            }
            _ => None,
        };
        state_of.push(resolved);
    }

    let root = compile_node(&query.root, &state_of);
    Ok((root, states, state_of))
}

fn compile_node(node: &QueryNode, state_of: &[Option<usize>]) -> ExecNode {
    match node {
        QueryNode::Term(id) => match state_of[*id as usize] {
            Some(state) => ExecNode::Term { state },
            None => ExecNode::Empty,
        },
        QueryNode::Phrase(ids) => {
            let mut members = Vec::with_capacity(ids.len());
            for id in ids {
                match state_of[*id as usize] {
                    Some(state) => members.push(state),
                    // A phrase with a missing member can never match.
                    None => return ExecNode::Empty,
                }
            }
            if members.is_empty() {
                return ExecNode::Empty;
            }
            ExecNode::Phrase {
                members,
                current: 0,
            }
        }
        QueryNode::Bool {
            must,
            should,
            must_not,
        } => ExecNode::Bool {
            must: must.iter().map(|n| compile_node(n, state_of)).collect(),
            should: should.iter().map(|n| compile_node(n, state_of)).collect(),
            must_not: must_not.iter().map(|n| compile_node(n, state_of)).collect(),
            current: 0,
        },
    }
}

/// Build the per-query-index evidence table over the resolved terms.
fn build_query_indices_terms(
    query: &Query,
    state_of: &[Option<usize>],
    states: &[TermState<'_>],
    flags: ExecFlags,
) -> Vec<QueryIndexTerms> {
    let disregard_flags = flags.contains(ExecFlags::DISREGARD_TOKEN_FLAGS);
    let slots = query
        .terms
        .iter()
        .flat_map(|t| t.instances.iter())
        .map(|inst| inst.index as usize + 1)
        .max()
        .unwrap_or(0);
    let mut table = vec![QueryIndexTerms::default(); slots];

    for (qterm, ctx) in query.terms.iter().enumerate() {
        let Some(state) = state_of[qterm] else {
            continue;
        };
        let term_id = states[state].exec_id;
        for inst in &ctx.instances {
            table[inst.index as usize].uniques.push(QueryIndexTerm {
                term_id,
                to_next_span: inst.to_next_span,
                flags: if disregard_flags { 0 } else { inst.flags },
            });
        }
    }

    for entry in &mut table {
        entry
            .uniques
            .sort_by_key(|u| (u.term_id, u.to_next_span, u.flags));
        entry.uniques.dedup();
    }
    table
}

/// Execute `query` over one segment, delivering accepted documents to
/// `scorer` in ascending doc-id order.
///
/// A candidate is accepted only if it is not masked by `registry`, not
/// rejected by `prefilter` (both checked before any hit materialization),
/// and the query tree evaluates true for it. A scorer returning
/// [`Verdict::Abort`] stops the execution immediately.
pub fn exec_query(
    query: &Query,
    source: &dyn IndexSource,
    registry: &MaskedDocsRegistry,
    scorer: &mut dyn DocumentScorer,
    prefilter: Option<&dyn DocumentFilter>,
    flags: ExecFlags,
) -> Result<()> {
    let (mut root, mut states, state_of) = compile(query, source)?;
    let table = build_query_indices_terms(query, &state_of, &states, flags);
    scorer.prepare(&table);

    log::debug!(
        "exec: segment gen={} resolved {}/{} query terms",
        source.generation(),
        states.len(),
        query.terms.len()
    );

    let mut cx = EvalCx {
        dws: DocWordsSpace::new(Limits::MAX_POSITION),
        hits: (0..states.len()).map(|_| TermHits::new()).collect(),
        matched: vec![TERMINATED; states.len()],
        documents_only: flags.contains(ExecFlags::DOCUMENTS_ONLY),
    };

    let mut doc = root.seek(0, &mut states)?;
    while doc != TERMINATED {
        let ignored = registry.test(doc) || prefilter.is_some_and(|f| f.filter(doc));
        if !ignored {
            cx.dws.reset();
            if root.confirm(doc, &mut cx, &mut states)? {
                let matched: Vec<MatchedQueryTerm<'_>> = if cx.documents_only {
                    Vec::new()
                } else {
                    states
                        .iter()
                        .enumerate()
                        .filter(|&(i, _)| cx.matched[i] == doc)
                        .map(|(i, st)| MatchedQueryTerm {
                            query_ctx: &query.terms[st.qterm],
                            hits: &cx.hits[i],
                        })
                        .collect()
                };
                let matched_doc = MatchedDocument {
                    id: doc,
                    matched_terms: &matched,
                };
                if scorer.consider(&matched_doc, &cx.dws) == Verdict::Abort {
                    return Ok(());
                }
            }
        }
        doc = root.seek(doc + 1, &mut states)?;
    }
    Ok(())
}
