//! Byte-level BPE tokenizer matching the pretraining convention of the text
//! encoder.
//!
//! Loaded from the tokenizer spec file shipped alongside the encoder weights
//! (a HuggingFace `tokenizer.json`; only `model.vocab` and `model.merges` are
//! read). Produces fixed-length id/mask pairs of [`CONTEXT_LEN`] for the text
//! session.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Fixed sequence length of the text encoder.
pub const CONTEXT_LEN: usize = 77;

const BOS_TOKEN: &str = "<|startoftext|>";
const EOS_TOKEN: &str = "<|endoftext|>";
const PAD_ID: i64 = 0;

/// End-of-word marker appended to the last character of every pre-token.
const WORD_END: &str = "</w>";

/// Immutable after load: vocabulary, merge ranks, and the byte→unicode table.
pub struct ClipTokenizer {
    vocab: HashMap<String, i64>,
    /// "`left right`" → rank; lower rank merges first.
    ranks: HashMap<String, usize>,
    byte_table: [char; 256],
    pattern: Regex,
    bos: i64,
    eos: i64,
}

/// The 256→unicode mapping used by byte-level BPE vocabularies: printable
/// ASCII and the Latin-1 printable range pass through; the remaining 68 byte
/// values map to U+0100..U+0143 in order.
fn bytes_to_unicode() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for b in 0u32..256 {
        let passthrough = (0x21..=0x7e).contains(&b) || (0xa1..=0xac).contains(&b) || (0xae..=0xff).contains(&b);
        table[b as usize] = if passthrough {
            char::from_u32(b).expect("printable byte")
        } else {
            let c = char::from_u32(0x100 + shifted).expect("shifted byte");
            shifted += 1;
            c
        };
    }
    table
}

/// Pre-tokenizer: contractions, alphabetic runs, digit runs, single
/// non-alphanumeric characters. Input is lowercased before matching.
fn pre_token_pattern() -> Regex {
    Regex::new(r"'s|'t|'re|'ve|'m|'ll|'d|\p{L}+|\p{N}+|[^\s\p{L}\p{N}]").expect("static pattern")
}

impl ClipTokenizer {
    /// Load from the tokenizer spec file. Missing vocab or merges is an
    /// [`Error::InvalidInput`]; the caller treats a failed load as not-loaded.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(
            std::fs::File::open(path)?,
        ))
        .map_err(|e| Error::InvalidInput(format!("malformed tokenizer file: {e}")))?;

        let model = raw
            .get("model")
            .ok_or_else(|| Error::InvalidInput("tokenizer file has no model section".into()))?;

        let vocab_obj = model
            .get("vocab")
            .and_then(|v| v.as_object())
            .ok_or_else(|| Error::InvalidInput("tokenizer file has no vocabulary".into()))?;
        let mut vocab = HashMap::with_capacity(vocab_obj.len());
        for (token, id) in vocab_obj {
            let id = id
                .as_i64()
                .ok_or_else(|| Error::InvalidInput(format!("non-integer id for token {token:?}")))?;
            vocab.insert(token.clone(), id);
        }

        let merge_list = model
            .get("merges")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::InvalidInput("tokenizer file has no merges".into()))?;
        let mut merges = Vec::with_capacity(merge_list.len());
        for entry in merge_list {
            // Both serializations exist in the wild: "a b" and ["a", "b"].
            let pair = match entry {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Array(parts) if parts.len() == 2 => {
                    match (parts[0].as_str(), parts[1].as_str()) {
                        (Some(a), Some(b)) => format!("{a} {b}"),
                        _ => return Err(Error::InvalidInput("malformed merge entry".into())),
                    }
                }
                _ => return Err(Error::InvalidInput("malformed merge entry".into())),
            };
            merges.push(pair);
        }

        Self::from_parts(vocab, merges)
    }

    fn from_parts(vocab: HashMap<String, i64>, merges: Vec<String>) -> Result<Self> {
        let bos = *vocab
            .get(BOS_TOKEN)
            .ok_or_else(|| Error::InvalidInput(format!("vocabulary lacks {BOS_TOKEN}")))?;
        let eos = *vocab
            .get(EOS_TOKEN)
            .ok_or_else(|| Error::InvalidInput(format!("vocabulary lacks {EOS_TOKEN}")))?;
        let ranks = merges.into_iter().enumerate().map(|(rank, pair)| (pair, rank)).collect();
        Ok(Self { vocab, ranks, byte_table: bytes_to_unicode(), pattern: pre_token_pattern(), bos, eos })
    }

    pub fn vocab_len(&self) -> usize {
        self.vocab.len()
    }

    /// Apply merge rules to one pre-token until none applies. The final
    /// character carries the end-of-word marker before merging starts.
    fn bpe(&self, pre_token: &str) -> Vec<String> {
        let mut parts: Vec<String> = pre_token
            .bytes()
            .map(|b| self.byte_table[b as usize].to_string())
            .collect();
        let Some(last) = parts.last_mut() else {
            return Vec::new();
        };
        last.push_str(WORD_END);

        while parts.len() > 1 {
            let mut best: Option<(usize, usize)> = None;
            for i in 0..parts.len() - 1 {
                let key = format!("{} {}", parts[i], parts[i + 1]);
                if let Some(&rank) = self.ranks.get(&key) {
                    if best.map_or(true, |(best_rank, _)| rank < best_rank) {
                        best = Some((rank, i));
                    }
                }
            }
            let Some((_, at)) = best else { break };
            let (left, right) = (parts[at].clone(), parts[at + 1].clone());

            // Merge every adjacent occurrence of the winning pair, left to right.
            let mut merged = Vec::with_capacity(parts.len());
            let mut i = 0;
            while i < parts.len() {
                if i + 1 < parts.len() && parts[i] == left && parts[i + 1] == right {
                    merged.push(format!("{left}{right}"));
                    i += 2;
                } else {
                    merged.push(parts[i].clone());
                    i += 1;
                }
            }
            parts = merged;
        }
        parts
    }

    /// Tokenize to a fixed-length `(ids, mask)` pair of [`CONTEXT_LEN`]:
    /// `[BOS, tokens truncated to L-2, EOS, PAD...]`, mask 1 for real tokens
    /// and 0 for padding. Tokens absent from the vocabulary are dropped.
    pub fn tokenize(&self, text: &str) -> (Vec<i64>, Vec<i64>) {
        let lowered = text.to_lowercase();
        let mut body: Vec<i64> = Vec::new();
        'outer: for m in self.pattern.find_iter(&lowered) {
            for token in self.bpe(m.as_str()) {
                if let Some(&id) = self.vocab.get(&token) {
                    body.push(id);
                    if body.len() == CONTEXT_LEN - 2 {
                        break 'outer;
                    }
                }
            }
        }

        let mut ids = Vec::with_capacity(CONTEXT_LEN);
        ids.push(self.bos);
        ids.extend_from_slice(&body);
        ids.push(self.eos);
        let real = ids.len();
        ids.resize(CONTEXT_LEN, PAD_ID);

        let mut mask = vec![1i64; real];
        mask.resize(CONTEXT_LEN, 0);
        (ids, mask)
    }
}
