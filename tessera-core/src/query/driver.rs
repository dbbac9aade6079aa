//! Fan-out drivers: one isolated execution per index source.
//!
//! Sources share no mutable state, so per-source executions need no
//! coordination: the parallel driver hands each non-empty source to a rayon
//! worker with its own scorer instance and collects the scorers in the
//! collection's source order. Cross-source blending of the per-scorer
//! results stays with the caller.

use rayon::prelude::*;

use crate::error::Result;
use crate::segment::SourceCollection;

use super::{DocumentFilter, DocumentScorer, ExecFlags, Query, exec_query};

/// Execute `query` against every non-empty source of the collection in
/// sequence. Returns one scorer per executed source, in collection order.
pub fn exec_query_collection<S, F>(
    query: &Query,
    collection: &SourceCollection,
    prefilter: Option<&dyn DocumentFilter>,
    flags: ExecFlags,
    mut make_scorer: F,
) -> Result<Vec<S>>
where
    S: DocumentScorer,
    F: FnMut() -> S,
{
    let mut out = Vec::new();
    for (idx, source) in collection.sources().iter().enumerate() {
        if source.index_empty() {
            continue;
        }
        let registry = collection.scanner_registry_for(idx);
        let mut scorer = make_scorer();
        exec_query(query, source.as_ref(), &registry, &mut scorer, prefilter, flags)?;
        out.push(scorer);
    }
    Ok(out)
}

/// Parallel variant of [`exec_query_collection`]: one rayon task per
/// non-empty source. Result order still matches the collection's source
/// order, not completion order.
pub fn exec_query_collection_par<S, F>(
    query: &Query,
    collection: &SourceCollection,
    prefilter: Option<&dyn DocumentFilter>,
    flags: ExecFlags,
    make_scorer: F,
) -> Result<Vec<S>>
where
    S: DocumentScorer + Send,
    F: Fn() -> S + Sync,
{
    let work: Vec<usize> = collection
        .sources()
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.index_empty())
        .map(|(idx, _)| idx)
        .collect();

    // Scheduling a single execution onto the pool buys nothing.
    if work.len() <= 1 {
        return exec_query_collection(query, collection, prefilter, flags, make_scorer);
    }

    work.into_par_iter()
        .map(|idx| {
            let source = &collection.sources()[idx];
            let registry = collection.scanner_registry_for(idx);
            let mut scorer = make_scorer();
            exec_query(query, source.as_ref(), &registry, &mut scorer, prefilter, flags)?;
            Ok(scorer)
        })
        .collect()
}
