//! Query perturbation: character-level typos applied to one word.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Produces one noisy variant of a query. Implementations must be pure
/// functions of `text` and the draws taken from `rng`.
pub trait QueryPerturber: Send + Sync {
    fn perturb(&self, text: &str, rng: &mut dyn RngCore) -> String;
}

const KEYBOARD_ROWS: [&str; 3] = ["qwertyuiop", "asdfghjkl", "zxcvbnm"];
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

static QWERTY_NEIGHBOURS: Lazy<FxHashMap<char, Vec<char>>> = Lazy::new(|| {
    let grid: Vec<Vec<char>> = KEYBOARD_ROWS.iter().map(|row| row.chars().collect()).collect();
    let mut neighbours = FxHashMap::default();
    for (r, row) in grid.iter().enumerate() {
        for (c, key) in row.iter().enumerate() {
            let mut adjacent = Vec::new();
            let c = c as isize;
            let mut take = |row: usize, cols: &[isize]| {
                for col in cols {
                    if *col >= 0 {
                        if let Some(found) = grid[row].get(*col as usize) {
                            adjacent.push(*found);
                        }
                    }
                }
            };
            take(r, &[c - 1, c + 1]);
            if r > 0 {
                take(r - 1, &[c, c + 1]);
            }
            if r + 1 < grid.len() {
                take(r + 1, &[c - 1, c]);
            }
            neighbours.insert(*key, adjacent);
        }
    }
    neighbours
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypoKind {
    Deletion,
    NeighbourSwap,
    Insertion,
    Substitution,
    Qwerty,
}

impl TypoKind {
    pub const ALL: [TypoKind; 5] = [
        TypoKind::Deletion,
        TypoKind::NeighbourSwap,
        TypoKind::Insertion,
        TypoKind::Substitution,
        TypoKind::Qwerty,
    ];

    /// Applies the typo at a random position of `word`. Returns `None` when
    /// the word is too short for this kind.
    pub fn apply(self, word: &[char], rng: &mut dyn RngCore) -> Option<Vec<char>> {
        if word.is_empty() {
            return None;
        }
        let mut out = word.to_vec();
        match self {
            TypoKind::Deletion => {
                if word.len() < 2 {
                    return None;
                }
                out.remove(rng.gen_range(0..word.len()));
            }
            TypoKind::NeighbourSwap => {
                if word.len() < 2 {
                    return None;
                }
                let i = rng.gen_range(0..word.len() - 1);
                out.swap(i, i + 1);
            }
            TypoKind::Insertion => {
                let i = rng.gen_range(0..word.len());
                out.insert(i, random_letter(rng));
            }
            TypoKind::Substitution => {
                let i = rng.gen_range(0..word.len());
                out[i] = random_letter(rng);
            }
            TypoKind::Qwerty => {
                if word.len() < 2 {
                    return None;
                }
                let i = rng.gen_range(0..word.len());
                let original = word[i];
                let lower = original.to_ascii_lowercase();
                let replacement = match QWERTY_NEIGHBOURS.get(&lower) {
                    Some(adjacent) if !adjacent.is_empty() => *adjacent.choose(rng)?,
                    _ => random_letter(rng),
                };
                out[i] = if original.is_ascii_uppercase() {
                    replacement.to_ascii_uppercase()
                } else {
                    replacement
                };
            }
        }
        Some(out)
    }
}

fn random_letter(rng: &mut dyn RngCore) -> char {
    ALPHABET[rng.gen_range(0..ALPHABET.len())] as char
}

/// Rewrites a single randomly chosen word of at least `min_word_length`
/// characters with one randomly chosen [`TypoKind`].
#[derive(Debug, Clone)]
pub struct TypoPerturber {
    min_word_length: usize,
    kinds: Vec<TypoKind>,
}

impl Default for TypoPerturber {
    fn default() -> Self {
        Self {
            min_word_length: 3,
            kinds: TypoKind::ALL.to_vec(),
        }
    }
}

impl TypoPerturber {
    pub fn new(min_word_length: usize, kinds: Vec<TypoKind>) -> Self {
        Self {
            min_word_length,
            kinds,
        }
    }
}

impl QueryPerturber for TypoPerturber {
    fn perturb(&self, text: &str, rng: &mut dyn RngCore) -> String {
        let spans = word_spans(text);
        let eligible: Vec<(usize, usize)> = spans
            .into_iter()
            .filter(|(start, end)| text[*start..*end].chars().count() >= self.min_word_length)
            .collect();
        let (Some(&(start, end)), Some(&kind)) = (eligible.choose(rng), self.kinds.choose(rng))
        else {
            return text.to_string();
        };
        let word: Vec<char> = text[start..end].chars().collect();
        match kind.apply(&word, rng) {
            Some(noisy) => {
                let mut out = String::with_capacity(text.len() + 4);
                out.push_str(&text[..start]);
                out.extend(noisy);
                out.push_str(&text[end..]);
                out
            }
            None => text.to_string(),
        }
    }
}

/// Byte ranges of words: runs of alphanumerics and apostrophes. Punctuation
/// never belongs to a word, so it is never edited.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        let in_word = ch.is_alphanumeric() || ch == '\'';
        match (in_word, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                spans.push((s, idx));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}
