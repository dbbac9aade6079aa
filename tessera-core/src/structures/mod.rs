//! Execution-time data structures shared by the executor and the merger.

mod doc_words_space;
mod masked;
mod term_hits;

pub use doc_words_space::DocWordsSpace;
pub use masked::{MaskedDocsRegistry, TombstoneSet};
pub use term_hits::{TermHit, TermHits};
