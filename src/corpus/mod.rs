//! Corpus loading and tokenization
//!
//! Turns a text blob into the ordered, lowercase token sequence every
//! strategy is initialized from.

use crate::config::CorpusConfig;
use crate::{BenchError, Result};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Characters that always separate tokens
pub const DELIMITERS: &[char] = &[
    ' ', ',', '.', ':', '\t', '\n', '\u{2014}', '?', '"', ';', '!', '\u{2019}', '\r', '\'', '(',
    ')',
];

/// Right double quotation mark, a delimiter only when enabled
pub const RIGHT_DOUBLE_QUOTE: char = '\u{201D}';

/// Splits text into lowercase tokens
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    split_on_right_double_quote: bool,
}

impl Tokenizer {
    pub fn new(config: &CorpusConfig) -> Self {
        Self {
            split_on_right_double_quote: config.split_on_right_double_quote,
        }
    }

    fn is_delimiter(&self, c: char) -> bool {
        DELIMITERS.contains(&c) || (self.split_on_right_double_quote && c == RIGHT_DOUBLE_QUOTE)
    }

    /// Split `text` on the delimiter set, dropping blank fragments
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| self.is_delimiter(c))
            .filter(|fragment| !fragment.trim().is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

/// Read-only token sequence shared by every strategy in a run
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    tokens: Arc<Vec<String>>,
}

impl Corpus {
    /// Wrap an already tokenized sequence
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: Arc::new(tokens.into_iter().map(Into::into).collect()),
        }
    }

    /// Tokenize a text blob
    pub fn from_text(text: &str, tokenizer: &Tokenizer) -> Self {
        Self {
            tokens: Arc::new(tokenizer.tokenize(text)),
        }
    }

    /// Read and tokenize a text file
    pub async fn load(path: &Path, tokenizer: &Tokenizer) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            BenchError::Corpus(format!("Failed to read {}: {}", path.display(), e))
        })?;

        // Stray bytes in a text file become U+FFFD instead of failing the run.
        let text = String::from_utf8_lossy(&bytes);
        let corpus = Self::from_text(&text, tokenizer);
        if corpus.is_empty() {
            return Err(BenchError::Corpus(format!(
                "{} contains no tokens",
                path.display()
            )));
        }

        tracing::info!(
            path = %path.display(),
            tokens = corpus.len(),
            "corpus loaded"
        );

        Ok(corpus)
    }

    /// Shared handle to the token storage, for tasks that outlive a borrow
    pub fn shared(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.tokens)
    }

    /// Number of distinct tokens
    pub fn distinct_count(&self) -> usize {
        self.tokens.iter().collect::<HashSet<_>>().len()
    }

    /// Occurrence count of every distinct token
    pub fn frequencies(&self) -> HashMap<&str, u64> {
        let mut counts = HashMap::new();
        for token in self.tokens.iter() {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl Deref for Corpus {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(split_on_right_double_quote: bool) -> Tokenizer {
        Tokenizer::new(&CorpusConfig {
            path: None,
            split_on_right_double_quote,
        })
    }

    #[test]
    fn test_tokenize_splits_and_lowercases() {
        let tokens = tokenizer(false).tokenize("Call me Ishmael. Some years ago\u{2014}never mind how long");
        assert_eq!(
            tokens,
            vec!["call", "me", "ishmael", "some", "years", "ago", "never", "mind", "how", "long"]
        );
    }

    #[test]
    fn test_tokenize_handles_every_delimiter() {
        let text = "a b,c.d:e\tf\ng\u{2014}h?i\"j;k!l\u{2019}m\rn'o(p)q";
        let tokens = tokenizer(false).tokenize(text);
        assert_eq!(tokens.len(), 17);
        assert_eq!(tokens.first().map(String::as_str), Some("a"));
        assert_eq!(tokens.last().map(String::as_str), Some("q"));
    }

    #[test]
    fn test_tokenize_discards_blank_fragments() {
        let tokens = tokenizer(false).tokenize("  ,,the.\u{00A0}.\n\nWHALE  ");
        assert_eq!(tokens, vec!["the", "whale"]);
    }

    #[test]
    fn test_right_double_quote_is_optional() {
        let text = "\u{201C}Hello\u{201D}";
        assert_eq!(tokenizer(false).tokenize(text), vec!["\u{201C}hello\u{201D}"]);
        assert_eq!(tokenizer(true).tokenize(text), vec!["\u{201C}hello"]);
    }

    #[test]
    fn test_corpus_statistics() {
        let corpus = Corpus::from_tokens(["the", "whale", "the", "sea", "the"]);
        assert_eq!(corpus.len(), 5);
        assert_eq!(corpus.distinct_count(), 3);
        assert_eq!(corpus.frequencies().get("the"), Some(&3));
        assert_eq!(corpus[1], "whale");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        std::fs::write(&path, "The whale; the sea! THE end.").unwrap();

        let corpus = Corpus::load(&path, &tokenizer(false)).await.unwrap();
        assert_eq!(&corpus[..], &["the", "whale", "the", "sea", "the", "end"]);
    }

    #[tokio::test]
    async fn test_load_rejects_empty_or_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, " .,;\n").unwrap();

        assert!(matches!(
            Corpus::load(&path, &tokenizer(false)).await,
            Err(BenchError::Corpus(_))
        ));
        assert!(matches!(
            Corpus::load(&dir.path().join("missing.txt"), &tokenizer(false)).await,
            Err(BenchError::Corpus(_))
        ));
    }
}
