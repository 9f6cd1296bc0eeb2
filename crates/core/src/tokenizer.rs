use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tracing::info;

use crate::error::{PrepError, Result};

pub const DEFAULT_VOCAB_FILE: &str = "vocab.txt";

/// Words longer than this many characters become a single `[UNK]`.
const MAX_WORD_CHARS: usize = 100;

/// `[CLS]` and `[SEP]` ids of a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialIds {
    pub cls: i32,
    pub sep: i32,
}

/// Turns query text into token ids. Special tokens are added by the
/// assembler, not here.
pub trait QueryTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<i32>>;

    /// The vocabulary's own `[CLS]`/`[SEP]` ids, if it defines them.
    fn special_ids(&self) -> Option<SpecialIds> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum TokenizerKind {
    /// BERT WordPiece over a `vocab.txt` (one token per line, id = line).
    #[serde(rename = "wordpiece")]
    WordPiece(PathBuf),
    Cl100k,
    P50k,
    O200k,
}

impl Default for TokenizerKind {
    fn default() -> Self {
        TokenizerKind::WordPiece(PathBuf::from(DEFAULT_VOCAB_FILE))
    }
}

impl TokenizerKind {
    pub fn build(&self) -> Result<Arc<dyn QueryTokenizer>> {
        let bpe = match self {
            TokenizerKind::WordPiece(path) => {
                return Ok(Arc::new(WordPieceTokenizer::from_path(path)?))
            }
            TokenizerKind::Cl100k => tiktoken_rs::cl100k_base(),
            TokenizerKind::P50k => tiktoken_rs::p50k_base(),
            TokenizerKind::O200k => tiktoken_rs::o200k_base(),
        }
        .map_err(|e| PrepError::Tokenizer(e.to_string()))?;
        Ok(Arc::new(BpeTokenizer { bpe }))
    }
}

/// Uncased BERT WordPiece: lowercase, split on whitespace and punctuation,
/// then greedy longest-match subwords with `##` continuations.
pub struct WordPieceTokenizer {
    vocab: FxHashMap<String, i32>,
    unk_id: i32,
    special: Option<SpecialIds>,
}

impl WordPieceTokenizer {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            PrepError::Tokenizer(format!("failed to read vocabulary {}: {e}", path.display()))
        })?;
        let tokenizer = Self::from_vocab(&text)?;
        info!(
            path = %path.display(),
            tokens = tokenizer.vocab.len(),
            "loaded wordpiece vocabulary"
        );
        Ok(tokenizer)
    }

    pub fn from_vocab(vocab_text: &str) -> Result<Self> {
        let mut vocab = FxHashMap::default();
        for (idx, token) in vocab_text.lines().enumerate() {
            let id = i32::try_from(idx)
                .map_err(|_| PrepError::Tokenizer("vocabulary exceeds i32 ids".into()))?;
            vocab.entry(token.trim_end().to_string()).or_insert(id);
        }
        let unk_id = *vocab
            .get("[UNK]")
            .ok_or_else(|| PrepError::Tokenizer("vocabulary has no [UNK] token".into()))?;
        let special = match (vocab.get("[CLS]"), vocab.get("[SEP]")) {
            (Some(&cls), Some(&sep)) => Some(SpecialIds { cls, sep }),
            _ => None,
        };
        Ok(Self {
            vocab,
            unk_id,
            special,
        })
    }

    fn push_pieces(&self, word: &str, out: &mut Vec<i32>) {
        let bounds: Vec<usize> = word
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(word.len()))
            .collect();
        let chars = bounds.len() - 1;
        if chars > MAX_WORD_CHARS {
            out.push(self.unk_id);
            return;
        }
        let mut pieces = Vec::new();
        let mut piece = String::new();
        let mut start = 0;
        while start < chars {
            let mut end = chars;
            let mut found = None;
            while end > start {
                piece.clear();
                if start > 0 {
                    piece.push_str("##");
                }
                piece.push_str(&word[bounds[start]..bounds[end]]);
                if let Some(&id) = self.vocab.get(piece.as_str()) {
                    found = Some(id);
                    break;
                }
                end -= 1;
            }
            match found {
                Some(id) => {
                    pieces.push(id);
                    start = end;
                }
                // one unmatchable piece turns the whole word into [UNK]
                None => {
                    out.push(self.unk_id);
                    return;
                }
            }
        }
        out.extend(pieces);
    }
}

impl QueryTokenizer for WordPieceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i32>> {
        let mut ids = Vec::new();
        for word in basic_split(&text.to_lowercase()) {
            self.push_pieces(&word, &mut ids);
        }
        Ok(ids)
    }

    fn special_ids(&self) -> Option<SpecialIds> {
        self.special
    }
}

fn basic_split(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_control() || ch == '\u{FFFD}' {
            continue;
        } else if is_punctuation(ch) {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            words.push(ch.to_string());
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn is_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation()
        || matches!(ch, '\u{2000}'..='\u{206F}' | '\u{3000}'..='\u{303F}' | '\u{00A1}' | '\u{00BF}')
}

/// Byte-pair tokenizer backed by `tiktoken-rs`. Its vocabularies carry no
/// `[CLS]`/`[SEP]`, so the assembler needs both ids configured explicitly.
pub struct BpeTokenizer {
    bpe: CoreBPE,
}

impl QueryTokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i32>> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|rank| {
                i32::try_from(rank)
                    .map_err(|_| PrepError::Tokenizer(format!("token id {rank} overflows i32")))
            })
            .collect()
    }
}
