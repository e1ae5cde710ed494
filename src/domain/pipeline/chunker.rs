use regex::Regex;
use std::sync::LazyLock;

/// A sentence is a run of text closed by one or more terminal punctuation marks
static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^.!?]*[.!?]+").expect("sentence pattern is valid")
});

/// Split `text` into chunks of at most `max_bytes` bytes for TTS requests.
///
/// Sentences are packed greedily. When the next sentence does not fit, a chunk
/// that is already 75% full is flushed as-is; an emptier one is topped up with
/// whole words from that sentence and the rest carries into the next chunk.
/// A single word longer than `max_bytes` is truncated at a char boundary.
///
/// The output depends only on `text` and `max_bytes`; resumption relies on
/// chunk indices being stable across runs.
pub fn split(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    let mut chunker = ChunkBuilder::new(max_bytes);

    for sentence in sentences(text) {
        chunker.push_sentence(sentence);
    }

    chunker.finish()
}

/// Trimmed, non-empty sentences; trailing text without punctuation counts as one
fn sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut last_end = 0;

    for mat in SENTENCE.find_iter(text) {
        sentences.push(mat.as_str().trim());
        last_end = mat.end();
    }
    if last_end < text.len() {
        sentences.push(text[last_end..].trim());
    }

    sentences.retain(|s| !s.is_empty());
    sentences
}

struct ChunkBuilder {
    max_bytes: usize,
    chunks: Vec<String>,
    current: String,
}

impl ChunkBuilder {
    fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            chunks: Vec::new(),
            current: String::new(),
        }
    }

    /// Bytes `piece` would add to the current chunk, separator included
    fn cost(&self, piece: &str) -> usize {
        if self.current.is_empty() {
            piece.len()
        } else {
            piece.len() + 1
        }
    }

    fn append(&mut self, piece: &str) {
        if !self.current.is_empty() {
            self.current.push(' ');
        }
        self.current.push_str(piece);
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(std::mem::take(&mut self.current));
        }
    }

    fn mostly_full(&self) -> bool {
        self.current.len() * 4 >= self.max_bytes * 3
    }

    fn push_sentence(&mut self, sentence: &str) {
        let mut pending = sentence;

        loop {
            pending = pending.trim_start();
            if pending.is_empty() {
                return;
            }

            if self.current.len() + self.cost(pending) <= self.max_bytes {
                self.append(pending);
                return;
            }

            if !self.current.is_empty() && self.mostly_full() {
                self.flush();
                continue;
            }

            pending = self.fill_words(pending);

            if self.current.is_empty() {
                // Not even the first word fits an empty chunk
                pending = self.push_truncated_word(pending);
            } else {
                self.flush();
            }
        }
    }

    /// Append whole words while they fit; returns what is left of `text`
    fn fill_words<'a>(&mut self, mut text: &'a str) -> &'a str {
        loop {
            let (word, rest) = next_word(text);
            if word.is_empty() || self.current.len() + self.cost(word) > self.max_bytes {
                return text;
            }
            self.append(word);
            text = rest;
        }
    }

    fn push_truncated_word<'a>(&mut self, text: &'a str) -> &'a str {
        let (word, rest) = next_word(text);
        let mut cut = self.max_bytes.min(word.len());
        while !word.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // A single char wider than the budget still has to go somewhere
            cut = word.chars().next().map(char::len_utf8).unwrap_or(0);
        }

        tracing::warn!(
            word_length = word.len(),
            max_bytes = self.max_bytes,
            "Word exceeds chunk size, truncating"
        );
        self.chunks.push(word[..cut].to_string());
        rest
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// First whitespace-delimited word of `text` and the text after it
fn next_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    (&text[..end], &text[end..])
}
