//! Reusable storage for one term's hits in the current document.

use crate::{DocId, Limits, TERMINATED, TokenPos};

/// One occurrence of a term in a document: a position plus a short opaque
/// payload the indexer attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermHit {
    pub pos: TokenPos,
    payload_len: u8,
    payload: [u8; Limits::MAX_PAYLOAD],
}

impl TermHit {
    /// `payload` must be at most [`Limits::MAX_PAYLOAD`] bytes; codecs
    /// enforce that bound before constructing hits.
    pub fn new(pos: TokenPos, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= Limits::MAX_PAYLOAD);
        let mut buf = [0u8; Limits::MAX_PAYLOAD];
        buf[..payload.len()].copy_from_slice(payload);
        Self {
            pos,
            payload_len: payload.len() as u8,
            payload: buf,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }
}

/// Materialized hits for one (term, document) pair.
///
/// The buffer is owned by the executor or merger and reused across documents;
/// growth is free-and-reallocate with a small headroom, so steady-state
/// processing does not allocate.
#[derive(Debug, Default)]
pub struct TermHits {
    hits: Vec<TermHit>,
    doc: DocId,
}

impl TermHits {
    pub fn new() -> Self {
        Self {
            hits: Vec::new(),
            doc: TERMINATED,
        }
    }

    /// Prepare the buffer for `freq` hits of `doc`, discarding the previous
    /// document's hits.
    pub fn reset_for(&mut self, doc: DocId, freq: u32) {
        let freq = freq as usize;
        if freq > self.hits.capacity() {
            // Growth is rare; trading the old allocation for a fresh one with
            // headroom beats repeated doubling for the long tail of freqs.
            self.hits = Vec::with_capacity(freq + 32);
        } else {
            self.hits.clear();
        }
        self.doc = doc;
    }

    pub fn push(&mut self, hit: TermHit) {
        self.hits.push(hit);
    }

    /// Document the hits currently belong to; [`TERMINATED`] when the buffer
    /// holds nothing meaningful.
    pub fn doc(&self) -> DocId {
        self.doc
    }

    pub fn freq(&self) -> u32 {
        self.hits.len() as u32
    }

    pub fn all(&self) -> &[TermHit] {
        &self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let hit = TermHit::new(3, b"ab");
        assert_eq!(hit.pos, 3);
        assert_eq!(hit.payload(), b"ab");

        let empty = TermHit::new(9, b"");
        assert_eq!(empty.payload(), b"");
    }

    #[test]
    fn test_reset_reuses_capacity() {
        let mut hits = TermHits::new();
        hits.reset_for(1, 4);
        for pos in 0..4 {
            hits.push(TermHit::new(pos, b""));
        }
        assert_eq!(hits.freq(), 4);
        assert_eq!(hits.doc(), 1);

        let cap = hits.hits.capacity();
        hits.reset_for(2, 2);
        assert_eq!(hits.freq(), 0);
        assert_eq!(hits.doc(), 2);
        assert_eq!(hits.hits.capacity(), cap);
    }
}
