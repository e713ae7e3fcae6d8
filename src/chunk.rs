//! Sentence-packing text chunker.
//!
//! Text is split into sentences and packed into windows of at most
//! `max_tokens` approximate tokens. When a window is flushed, its trailing
//! sentences (up to `overlap_tokens`) are carried into the next one so that
//! a fact straddling a boundary is retrievable from either side. A sentence
//! longer than a whole window is split on word boundaries instead.
//!
//! Token counts are approximated at four characters per token. The final
//! window is kept only if it reaches `min_tokens`.

use regex::Regex;

use crate::config::ChunkingConfig;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

pub fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub struct Chunker {
    boundary: Regex,
    max_tokens: usize,
    overlap_tokens: usize,
    min_tokens: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> anyhow::Result<Self> {
        Ok(Self {
            boundary: Regex::new(r"[.!?]\s+")?,
            max_tokens: config.max_tokens,
            overlap_tokens: config.overlap_tokens,
            min_tokens: config.min_tokens,
        })
    }

    /// Split `text` into chunk texts, in order. Blank input yields nothing.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut window: Vec<String> = Vec::new();
        let mut window_tokens = 0;

        for sentence in self.sentences(text) {
            let sentence_tokens = approx_tokens(&sentence);

            if sentence_tokens > self.max_tokens {
                if !window.is_empty() {
                    chunks.push(window.join(" "));
                }
                let (tail, tail_tokens) = self.split_words(&sentence, &mut chunks);
                window = tail;
                window_tokens = tail_tokens;
                continue;
            }

            if window_tokens + sentence_tokens > self.max_tokens && !window.is_empty() {
                chunks.push(window.join(" "));
                window = self.overlap_tail(&window, approx_tokens);
                window.push(sentence);
                window_tokens = approx_tokens(&window.join(" "));
            } else {
                window.push(sentence);
                window_tokens += sentence_tokens;
            }
        }

        if !window.is_empty() {
            let last = window.join(" ");
            if approx_tokens(&last) >= self.min_tokens {
                chunks.push(last);
            }
        }

        chunks
    }

    fn sentences(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut start = 0;
        for m in self.boundary.find_iter(text) {
            out.push(&text[start..m.start() + 1]);
            start = m.end();
        }
        out.push(&text[start..]);
        out.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Word-level packing for an oversized sentence. Full windows are pushed
    /// to `chunks`; the unfinished tail is returned to continue packing.
    fn split_words(&self, sentence: &str, chunks: &mut Vec<String>) -> (Vec<String>, usize) {
        let word_tokens = |w: &str| approx_tokens(w) + 1;

        let mut window: Vec<String> = Vec::new();
        let mut tokens = 0;
        for word in sentence.split_whitespace() {
            let t = word_tokens(word);
            if tokens + t > self.max_tokens && !window.is_empty() {
                chunks.push(window.join(" "));
                window = self.overlap_tail(&window, |w| word_tokens(w));
                tokens = approx_tokens(&window.join(" "));
            }
            window.push(word.to_string());
            tokens += t;
        }
        (window, tokens)
    }

    /// Longest suffix of `items` whose token total stays within the overlap.
    fn overlap_tail(&self, items: &[String], cost: impl Fn(&str) -> usize) -> Vec<String> {
        let mut total = 0;
        let mut start = items.len();
        for (i, item) in items.iter().enumerate().rev() {
            let t = cost(item);
            if total + t > self.overlap_tokens {
                break;
            }
            total += t;
            start = i;
        }
        items[start..].to_vec()
    }
}
