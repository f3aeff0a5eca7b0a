//! Sentence-boundary text chunker for embeddings.
//!
//! Splits extracted section text into [`Chunk`]s. Text is first split on
//! line boundaries (each extracted fragment is one line), then on sentence
//! boundaries. Consecutive sentences are merged while they fit within
//! `max_tokens`; empty pieces are dropped, so empty text yields no chunks.
//!
//! Each chunk carries a SHA-256 hash of its text.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split a line into sentences, keeping the terminator on each sentence.
fn sentences(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let ends_sentence = matches!(b, b'.' | b'?' | b'!')
            && bytes.get(i + 1).map_or(true, |next| next.is_ascii_whitespace());
        if ends_sentence {
            out.push(&line[start..=i]);
            start = i + 1;
        }
    }
    if start < line.len() {
        out.push(&line[start..]);
    }
    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split text into chunks with contiguous indices starting at 0.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut current_buf = String::new();

    for line in text.lines() {
        for sentence in sentences(line) {
            let would_be = if current_buf.is_empty() {
                sentence.len()
            } else {
                current_buf.len() + 1 + sentence.len()
            };

            if would_be > max_chars && !current_buf.is_empty() {
                chunks.push(make_chunk(chunks.len() as i64, &current_buf));
                current_buf.clear();
            }

            if !current_buf.is_empty() {
                current_buf.push(' ');
            }
            current_buf.push_str(sentence);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(make_chunk(chunks.len() as i64, &current_buf));
    }

    chunks
}

fn make_chunk(index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
