//! Query model and the interfaces the executor talks to.
//!
//! Queries arrive here already processed: tokenized, rewritten, and with
//! query indices assigned by the upstream pre-processor. The executor walks
//! the [`QueryNode`] tree over one segment and delivers matches to a
//! caller-supplied [`DocumentScorer`]; the scorer sees the per-index
//! [`QueryIndexTerms`] evidence table and can probe term adjacency through
//! the [`DocWordsSpace`] passed to each `consider` call.

mod driver;
mod exec;

pub use driver::{exec_query_collection, exec_query_collection_par};
pub use exec::exec_query;

use std::ops::BitOr;

use crate::structures::{DocWordsSpace, TermHits};
use crate::{DocId, ExecTermId, TokenFlags};

/// Identifies one distinct token of the query; index into [`Query::terms`].
pub type QueryTermId = u16;

/// Execution options, a 32-bit mask. Unknown bits are reserved and ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecFlags(u32);

impl ExecFlags {
    /// The scorer only needs document identity: `matched_terms` stays empty
    /// and per-term hits are not materialized. Roughly doubles throughput
    /// for callers that count or collect IDs.
    pub const DOCUMENTS_ONLY: ExecFlags = ExecFlags(1);

    /// Unique the query-index evidence table by `(term, to_next_span)`
    /// instead of `(term, to_next_span, flags)`; emitted entries carry
    /// zeroed flags.
    pub const DISREGARD_TOKEN_FLAGS: ExecFlags = ExecFlags(2);

    pub fn contains(self, other: ExecFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for ExecFlags {
    type Output = ExecFlags;

    fn bitor(self, rhs: ExecFlags) -> ExecFlags {
        ExecFlags(self.0 | rhs.0)
    }
}

/// Provenance of a term instance produced by a query rewrite (term
/// aliasing, expansion). Opaque to the executor; scorers may weigh
/// rewritten instances differently.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewriteCtx {
    pub range_start: u16,
    pub range_len: u8,
    pub translation_coefficient: f32,
    pub src_seq_size: u8,
}

/// One occurrence of a token in the processed query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryTermInstance {
    /// Slot the token occupies in the processed query.
    pub index: u16,
    pub flags: TokenFlags,
    /// Collapsed repetitions of the token at this slot.
    pub rep: u8,
    /// Query indices ahead to the next term; 0 when nothing follows.
    pub to_next_span: u8,
    pub rewrite: RewriteCtx,
}

/// A distinct token of the query together with every slot it occupies.
/// Produced by the query pre-processor, consumed read-only by the executor
/// and by scorers.
#[derive(Debug, Clone)]
pub struct QueryTermCtx {
    pub token: Vec<u8>,
    pub instances: Vec<QueryTermInstance>,
}

/// Operator tree over query terms.
#[derive(Debug, Clone)]
pub enum QueryNode {
    Term(QueryTermId),
    /// Members must appear at consecutive positions, in order.
    Phrase(Vec<QueryTermId>),
    Bool {
        must: Vec<QueryNode>,
        should: Vec<QueryNode>,
        must_not: Vec<QueryNode>,
    },
}

impl QueryNode {
    pub fn and(nodes: Vec<QueryNode>) -> Self {
        QueryNode::Bool {
            must: nodes,
            should: Vec::new(),
            must_not: Vec::new(),
        }
    }

    pub fn or(nodes: Vec<QueryNode>) -> Self {
        QueryNode::Bool {
            must: Vec::new(),
            should: nodes,
            must_not: Vec::new(),
        }
    }

    pub fn and_not(must: Vec<QueryNode>, must_not: Vec<QueryNode>) -> Self {
        QueryNode::Bool {
            must,
            should: Vec::new(),
            must_not,
        }
    }
}

/// A processed query: the operator tree plus the per-token contexts it
/// references. Read-only during execution and shareable across segments.
#[derive(Debug, Clone)]
pub struct Query {
    pub root: QueryNode,
    pub terms: Vec<QueryTermCtx>,
}

/// One distinct `(term, to_next_span, flags)` triple occupying a query
/// index, in segment-local term numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryIndexTerm {
    pub term_id: ExecTermId,
    pub to_next_span: u8,
    pub flags: TokenFlags,
}

/// Evidence surface for one query index: all distinct triples that occupy
/// it, sorted by `(term_id, to_next_span, flags)` ascending.
#[derive(Debug, Clone, Default)]
pub struct QueryIndexTerms {
    pub uniques: Vec<QueryIndexTerm>,
}

/// A term that matched the current document, with its materialized hits.
pub struct MatchedQueryTerm<'a> {
    pub query_ctx: &'a QueryTermCtx,
    pub hits: &'a TermHits,
}

/// A document accepted by the executor. Ephemeral: valid only inside the
/// scorer invocation it is passed to.
pub struct MatchedDocument<'a> {
    pub id: DocId,
    pub matched_terms: &'a [MatchedQueryTerm<'a>],
}

/// Scorer verdict returned from [`DocumentScorer::consider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Stop the execution immediately; no further documents are visited.
    Abort,
}

/// Caller-supplied consumer of matched documents.
///
/// `prepare` runs once per execution with the query-index evidence table;
/// scorers that need it across `consider` calls keep their own copy. Each
/// `consider` call also receives the [`DocWordsSpace`] holding the current
/// document's stamped positions for O(1) proximity probes.
pub trait DocumentScorer {
    fn prepare(&mut self, query_indices_terms: &[QueryIndexTerms]) {
        let _ = query_indices_terms;
    }

    fn consider(&mut self, doc: &MatchedDocument<'_>, dws: &DocWordsSpace) -> Verdict;
}

/// Pre-evaluation document filter: `true` means "disregard". Consulted
/// before query evaluation and before any hit materialization, in addition
/// to the masked-documents registry.
pub trait DocumentFilter: Sync {
    fn filter(&self, doc: DocId) -> bool;
}

/// Assembles a [`Query`] with query indices assigned monotonically in tree
/// order, standing in for the external pre-processor in tests and simple
/// embeddings.
#[derive(Default)]
pub struct QueryBuilder {
    terms: Vec<QueryTermCtx>,
    next_index: u16,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(&mut self, token: &str) -> QueryNode {
        self.term_with_flags(token, 0)
    }

    pub fn term_with_flags(&mut self, token: &str, flags: TokenFlags) -> QueryNode {
        let id = self.intern(token.as_bytes());
        let index = self.alloc_index();
        self.terms[id as usize].instances.push(QueryTermInstance {
            index,
            flags,
            rep: 1,
            to_next_span: 1,
            rewrite: RewriteCtx::default(),
        });
        QueryNode::Term(id)
    }

    pub fn phrase(&mut self, tokens: &[&str]) -> QueryNode {
        let members = tokens
            .iter()
            .map(|token| {
                let id = self.intern(token.as_bytes());
                let index = self.alloc_index();
                self.terms[id as usize].instances.push(QueryTermInstance {
                    index,
                    flags: 0,
                    rep: 1,
                    to_next_span: 1,
                    rewrite: RewriteCtx::default(),
                });
                id
            })
            .collect();
        QueryNode::Phrase(members)
    }

    pub fn build(mut self, root: QueryNode) -> Query {
        // The rightmost query index has nothing to advance to.
        if self.next_index > 0 {
            let last = self.next_index - 1;
            for ctx in &mut self.terms {
                for inst in &mut ctx.instances {
                    if inst.index == last {
                        inst.to_next_span = 0;
                    }
                }
            }
        }
        Query {
            root,
            terms: self.terms,
        }
    }

    fn intern(&mut self, token: &[u8]) -> QueryTermId {
        if let Some(id) = self.terms.iter().position(|t| t.token == token) {
            return id as QueryTermId;
        }
        self.terms.push(QueryTermCtx {
            token: token.to_vec(),
            instances: Vec::new(),
        });
        (self.terms.len() - 1) as QueryTermId
    }

    fn alloc_index(&mut self) -> u16 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;

    #[test]
    fn test_exec_flags() {
        let flags = ExecFlags::DOCUMENTS_ONLY | ExecFlags::DISREGARD_TOKEN_FLAGS;
        assert!(flags.contains(ExecFlags::DOCUMENTS_ONLY));
        assert!(flags.contains(ExecFlags::DISREGARD_TOKEN_FLAGS));
        assert!(!ExecFlags::default().contains(ExecFlags::DOCUMENTS_ONLY));
    }

    #[test]
    fn test_builder_assigns_monotonic_indices() {
        let mut builder = QueryBuilder::new();
        let red = builder.term("red");
        let blue = builder.term("blue");
        let query = builder.build(QueryNode::and(vec![red, blue]));

        assert_eq!(query.terms.len(), 2);
        assert_eq!(query.terms[0].instances[0].index, 0);
        assert_eq!(query.terms[0].instances[0].to_next_span, 1);
        assert_eq!(query.terms[1].instances[0].index, 1);
        assert_eq!(query.terms[1].instances[0].to_next_span, 0);
    }

    #[test]
    fn test_builder_reuses_repeated_tokens() {
        let mut builder = QueryBuilder::new();
        let a = builder.term("of");
        let b = builder.term("of");
        let query = builder.build(QueryNode::or(vec![a, b]));

        assert_eq!(query.terms.len(), 1);
        assert_eq!(query.terms[0].instances.len(), 2);
    }
}
