//! Sentence-packing text chunker.
//!
//! Splits knowledge-base text into [`Chunk`]s bounded by an estimated
//! token budget, with consecutive chunks sharing a few trailing sentences
//! so that context is not lost at chunk boundaries.
//!
//! # Algorithm
//!
//! 1. Strip HTML markup, decode entities, collapse whitespace.
//! 2. Split into sentence units after `.`, `!`, `?` or `…`.
//! 3. Greedily pack sentences until the next one would exceed `max_tokens`.
//! 4. When a chunk closes, seed the next one with trailing sentences
//!    totalling at most `overlap_tokens`.
//! 5. A sentence longer than `max_tokens` is split on word boundaries into
//!    standalone pieces (no overlap).
//! 6. A final chunk below `min_chunk_size` borrows more trailing sentences
//!    from its predecessor while it still fits the budget.
//!
//! Token counts are an estimate: 1.3 tokens per word plus one per
//! punctuation or symbol character.
//!
//! # Example
//!
//! ```rust
//! use helpdesk_agent_core::chunk::{chunk_text, ChunkOptions};
//!
//! let chunks = chunk_text("Hello world. Second sentence.", &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Chunking parameters, all measured in estimated tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_tokens: 50,
            min_chunk_size: 20,
        }
    }
}

/// Split `text` into chunks.
///
/// Pure and deterministic. Empty or whitespace-only input (after markup
/// stripping) yields an empty vector.
pub fn chunk_text(text: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let max = opts.max_tokens.max(1);
    let mut drafts: Vec<Draft> = Vec::new();
    let mut current: Vec<Unit> = Vec::new();
    let mut seed = 0usize;

    for sentence in split_sentences(&normalized) {
        let unit = Unit::new(sentence);

        if unit.tally.tokens() > max {
            if current.len() > seed {
                drafts.push(Draft::packed(std::mem::take(&mut current), seed));
            }
            current.clear();
            seed = 0;
            for piece in split_words(sentence, max) {
                drafts.push(Draft::forced(piece));
            }
            continue;
        }

        if current.len() > seed && Tally::sum(&current).add(unit.tally).tokens() > max {
            let closed = std::mem::take(&mut current);
            current = overlap_seed(&closed, opts.overlap_tokens);
            drafts.push(Draft::packed(closed, seed));
            seed = current.len();
        }

        // An overlap seed alone never blocks the next sentence.
        while seed > 0 && Tally::sum(&current).add(unit.tally).tokens() > max {
            current.remove(0);
            seed -= 1;
        }

        current.push(unit);
    }

    if current.len() > seed {
        drafts.push(Draft::packed(current, seed));
    }

    pad_small_tail(&mut drafts, opts.min_chunk_size, max);

    drafts
        .iter()
        .enumerate()
        .map(|(index, draft)| make_chunk(index, &draft.text()))
        .collect()
}

/// Estimated token count of a text fragment.
pub fn estimate_tokens(text: &str) -> usize {
    Tally::of(text).tokens()
}

/// Strip markup and collapse whitespace to single spaces.
pub fn normalize_text(text: &str) -> String {
    strip_markup(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    words: usize,
    symbols: usize,
}

impl Tally {
    fn of(text: &str) -> Self {
        Self {
            words: text.split_whitespace().count(),
            symbols: text
                .chars()
                .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
                .count(),
        }
    }

    fn add(self, other: Tally) -> Self {
        Self {
            words: self.words + other.words,
            symbols: self.symbols + other.symbols,
        }
    }

    fn sum(units: &[Unit]) -> Self {
        units.iter().fold(Tally::default(), |acc, u| acc.add(u.tally))
    }

    /// `ceil(words × 1.3) + symbols`
    fn tokens(self) -> usize {
        (self.words * 13).div_ceil(10) + self.symbols
    }
}

/// A sentence (or a word-split piece of one) with its token tally.
///
/// Units are slices of the normalized text and are always joined with a
/// single space, so word and symbol counts add up exactly.
#[derive(Debug, Clone, Copy)]
struct Unit<'a> {
    text: &'a str,
    tally: Tally,
}

impl<'a> Unit<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            tally: Tally::of(text),
        }
    }
}

struct Draft<'a> {
    units: Vec<Unit<'a>>,
    /// Number of leading units copied from the previous chunk.
    seed: usize,
    forced: bool,
}

impl<'a> Draft<'a> {
    fn packed(units: Vec<Unit<'a>>, seed: usize) -> Self {
        Self {
            units,
            seed,
            forced: false,
        }
    }

    fn forced(unit: Unit<'a>) -> Self {
        Self {
            units: vec![unit],
            seed: 0,
            forced: true,
        }
    }

    fn text(&self) -> String {
        self.units
            .iter()
            .map(|u| u.text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Trailing units of a closed chunk totalling at most `overlap_tokens`.
///
/// Never returns every unit of the chunk, so each chunk contributes at
/// least one sentence of its own.
fn overlap_seed<'a>(closed: &[Unit<'a>], overlap_tokens: usize) -> Vec<Unit<'a>> {
    if overlap_tokens == 0 || closed.len() < 2 {
        return Vec::new();
    }
    let mut taken = 0usize;
    let mut tally = Tally::default();
    for unit in closed.iter().rev().take(closed.len() - 1) {
        let next = tally.add(unit.tally);
        if next.tokens() > overlap_tokens {
            break;
        }
        tally = next;
        taken += 1;
    }
    closed[closed.len() - taken..].to_vec()
}

/// Widen the overlap of an undersized final chunk with more trailing
/// sentences of its predecessor until it reaches `min_chunk_size`.
fn pad_small_tail(drafts: &mut [Draft], min_chunk_size: usize, max: usize) {
    let [.., prev, last] = drafts else {
        return;
    };
    if last.forced || prev.forced {
        return;
    }

    let mut tally = Tally::sum(&last.units);
    while tally.tokens() < min_chunk_size {
        // The first sentence of `prev` always stays its own.
        if last.seed + 1 >= prev.units.len() {
            break;
        }
        let candidate = prev.units[prev.units.len() - 1 - last.seed];
        let widened = tally.add(candidate.tally);
        if widened.tokens() > max {
            break;
        }
        last.units.insert(0, candidate);
        last.seed += 1;
        tally = widened;
    }
}

/// Split on word boundaries into pieces that each fit `max`.
///
/// A single word that alone exceeds `max` becomes its own piece.
fn split_words(sentence: &str, max: usize) -> Vec<Unit<'_>> {
    let mut pieces = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0usize;
    let mut tally = Tally::default();
    let mut offset = 0usize;

    for word in sentence.split(' ') {
        let word_start = offset;
        let word_end = offset + word.len();
        offset = word_end + 1;
        if word.is_empty() {
            continue;
        }

        let word_tally = Tally::of(word);
        if let Some(s) = start {
            if tally.add(word_tally).tokens() > max {
                pieces.push(Unit {
                    text: &sentence[s..end],
                    tally,
                });
                start = None;
                tally = Tally::default();
            }
        }
        if start.is_none() {
            start = Some(word_start);
        }
        end = word_end;
        tally = tally.add(word_tally);
    }

    if let Some(s) = start {
        pieces.push(Unit {
            text: &sentence[s..end],
            tally,
        });
    }
    pieces
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '»')
}

/// Split normalized text into sentence slices.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if !is_terminal(chars[i].1) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && (is_terminal(chars[j].1) || is_closing(chars[j].1)) {
            j += 1;
        }
        if j == chars.len() || chars[j].1.is_whitespace() {
            let end = if j == chars.len() { text.len() } else { chars[j].0 };
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
        i = j;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

// Known element names only, so prose such as `amount<limit and limit>0`
// is never mistaken for a tag.
static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</?(?:a|abbr|address|article|aside|audio|b|blockquote|body|br|button|caption|center|code|col|colgroup|dd|del|details|div|dl|dt|em|figcaption|figure|font|footer|form|h[1-6]|head|header|hr|html|i|iframe|img|input|ins|kbd|label|li|link|main|mark|meta|nav|noscript|ol|option|p|picture|pre|q|s|section|select|small|source|span|strike|strong|sub|summary|sup|svg|table|tbody|td|textarea|tfoot|th|thead|title|tr|tt|u|ul|video)(?:\s[^<>]*)?/?>",
    )
    .expect("tag pattern is valid")
});

static RAW_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<!--.*?-->|<!doctype[^>]*>")
        .expect("raw text pattern is valid")
});

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,6});").expect("entity pattern is valid")
});

/// Remove HTML tags and decode entities. Tags become a single space.
fn strip_markup(text: &str) -> String {
    let text = RAW_TEXT.replace_all(text, " ");
    let text = TAG.replace_all(&text, " ");
    ENTITY
        .replace_all(&text, |caps: &Captures| match decode_entity(&caps[1]) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn make_chunk(index: usize, content: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());

    Chunk {
        index,
        content: content.to_string(),
        token_count: estimate_tokens(content),
        content_hash: format!("{:x}", hasher.finalize()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(max_tokens: usize, overlap_tokens: usize, min_chunk_size: usize) -> ChunkOptions {
        ChunkOptions {
            max_tokens,
            overlap_tokens,
            min_chunk_size,
        }
    }

    fn article(sentences: usize) -> String {
        (0..sentences)
            .map(|i| {
                format!(
                    "Sentence number {} explains how the billing portal handles refund request {}.",
                    i, i
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", &ChunkOptions::default()).is_empty());
        assert!(chunk_text("   \n\t  ", &ChunkOptions::default()).is_empty());
        assert!(chunk_text("<p>  </p>", &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].token_count, estimate_tokens("Hello, world!"));
    }

    #[test]
    fn test_token_estimate() {
        // 2 words → ceil(2.6) = 3, plus ',' and '!'
        assert_eq!(estimate_tokens("Hello, world!"), 5);
        assert_eq!(estimate_tokens(""), 0);
        // 10 words → 13 exactly
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
    }

    #[test]
    fn test_markup_is_stripped() {
        let html = "<h1>Reset&nbsp;password</h1><p>Open <b>Settings</b> &amp; click reset.</p>\
                    <script>var x = 1 < 2;</script><style>p { color: red }</style>";
        assert_eq!(normalize_text(html), "Reset password Open Settings & click reset.");
    }

    #[test]
    fn test_lone_angle_bracket_kept() {
        assert_eq!(normalize_text("1 < 2 and 3 > 2"), "1 < 2 and 3 > 2");
        assert_eq!(normalize_text("Tom &amp Jerry"), "Tom &amp Jerry");
        assert_eq!(normalize_text("caf&#233; &#x41;"), "café A");
        assert_eq!(normalize_text("&bogus; stays"), "&bogus; stays");
    }

    #[test]
    fn test_comparisons_in_prose_survive() {
        assert_eq!(
            normalize_text("Refunds apply if amount<limit and limit>0 days. Contact us."),
            "Refunds apply if amount<limit and limit>0 days. Contact us."
        );
        assert_eq!(
            normalize_text("<p>Plans with seats<10 cost less; seats>=10 get a discount.</p>"),
            "Plans with seats<10 cost less; seats>=10 get a discount."
        );
        assert_eq!(
            normalize_text("<!DOCTYPE html><!-- hidden --><DIV class=\"x\">Shown</DIV>"),
            "Shown"
        );
    }

    #[test]
    fn test_sentence_split() {
        let s = split_sentences("First one. Second one, really?! \"Third.\" Tail without stop");
        assert_eq!(
            s,
            vec![
                "First one.",
                "Second one, really?!",
                "\"Third.\"",
                "Tail without stop"
            ]
        );
    }

    #[test]
    fn test_decimal_not_a_boundary() {
        let s = split_sentences("Version 2.5 is out. Upgrade now.");
        assert_eq!(s, vec!["Version 2.5 is out.", "Upgrade now."]);
    }

    #[test]
    fn test_deterministic() {
        let text = article(80);
        let a = chunk_text(&text, &opts(120, 30, 10));
        let b = chunk_text(&text, &opts(120, 30, 10));
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let chunks = chunk_text(&article(120), &opts(60, 20, 5));
        assert!(chunks.len() > 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_budget_respected() {
        let chunks = chunk_text(&article(120), &opts(60, 20, 5));
        for c in &chunks {
            assert!(c.token_count <= 60, "chunk {} has {} tokens", c.index, c.token_count);
        }
    }

    #[test]
    fn test_coverage_without_overlap() {
        let text = article(60);
        let chunks = chunk_text(&text, &opts(50, 0, 0));
        let joined = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(joined, normalize_text(&text));
    }

    #[test]
    fn test_coverage_with_overlap() {
        let text = article(60);
        let normalized = normalize_text(&text);
        let chunks = chunk_text(&text, &opts(80, 30, 0));
        assert!(chunks.len() > 2);

        let mut covered = 0usize;
        for c in &chunks {
            let pos = normalized
                .find(&c.content)
                .expect("chunk content must be a slice of the normalized text");
            assert!(pos <= covered + 1, "gap before chunk {}", c.index);
            covered = covered.max(pos + c.content.len());
        }
        assert_eq!(covered, normalized.len());
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = chunk_text(&article(60), &opts(80, 30, 0));
        for pair in chunks.windows(2) {
            let first_sentence = split_sentences(&pair[1].content)[0];
            assert!(
                pair[0].content.ends_with(first_sentence),
                "chunk {} does not start with the tail of chunk {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn test_long_sentence_is_word_split() {
        let long = (0..200).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let text = format!("Intro sentence here. {}. Outro sentence here.", long);
        let chunks = chunk_text(&text, &opts(50, 10, 0));
        assert!(chunks.len() >= 5);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.token_count <= 50);
        }
        assert_eq!(chunks[0].content, "Intro sentence here.");
        assert_eq!(chunks.last().unwrap().content, "Outro sentence here.");
        // forced pieces never repeat words
        let forced: Vec<&str> = chunks[1..chunks.len() - 1]
            .iter()
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(forced.join(" "), format!("{}.", long));
    }

    #[test]
    fn test_oversized_single_word_stands_alone() {
        let word = "x".repeat(10) + &"/".repeat(40);
        let chunks = chunk_text(&format!("Short one. {} tail.", word), &opts(20, 0, 0));
        assert!(chunks.iter().any(|c| c.content == word));
    }

    #[test]
    fn test_small_tail_borrows_context() {
        // 9 + 9 tokens fill the first chunk; "Ok." (3 tokens) is left over.
        let text = "Alpha beta gamma delta epsilon zeta. Eta theta iota kappa lambda mu. Ok.";

        let bare = chunk_text(text, &opts(18, 0, 0));
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[1].content, "Ok.");

        let padded = chunk_text(text, &opts(18, 0, 5));
        assert_eq!(padded.len(), 2);
        assert_eq!(padded[0].content, bare[0].content);
        assert_eq!(padded[1].content, "Eta theta iota kappa lambda mu. Ok.");
    }

    #[test]
    fn test_single_small_chunk_still_emitted() {
        let chunks = chunk_text("Hi.", &opts(500, 50, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hi.");
    }

    #[test]
    fn test_content_hash() {
        let chunks = chunk_text("Same text.", &ChunkOptions::default());
        let again = chunk_text("  Same   text. ", &ChunkOptions::default());
        assert_eq!(chunks[0].content_hash, again[0].content_hash);
        assert_eq!(chunks[0].content_hash.len(), 64);
    }

    #[test]
    fn test_three_thousand_char_article() {
        let mut text = article(40);
        text.truncate(3000);
        assert!(text.len() >= 2900);
        let chunks = chunk_text(&text, &opts(500, 50, 20));
        assert!(chunks.len() >= 2, "got {} chunks", chunks.len());
        for c in &chunks {
            assert!(c.token_count <= 500);
        }
        for pair in chunks.windows(2) {
            let head = split_sentences(&pair[1].content)[0];
            assert!(pair[0].content.contains(head));
        }
    }
}
