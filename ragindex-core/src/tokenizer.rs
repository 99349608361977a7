//! Pluggable tokenization.
//!
//! The chunker only needs text -> token ids and back. `TiktokenTokenizer`
//! uses the GPT-2 byte-pair encoding (`r50k_base`); `WhitespaceTokenizer` is a
//! dependency-free tokenizer with an interned vocabulary, useful for tests and
//! for corpora where word windows are preferable to BPE windows.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::TokenizerError;

/// Text <-> token id conversion.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;
    fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError>;
}

/// Ordinary ranks 0..=50255 plus `<|endoftext|>` at 50256.
const R50K_VOCAB_SIZE: u32 = 50257;

/// GPT-2 BPE tokenizer backed by `tiktoken-rs`.
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenTokenizer {
    /// Load the `r50k_base` encoding.
    pub fn gpt2() -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::r50k_base().map_err(|e| TokenizerError::Init {
            message: e.to_string(),
        })?;
        Ok(Self { bpe })
    }
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("encoding", &"r50k_base")
            .finish()
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        Ok(self.bpe.encode_ordinary(text))
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        if let Some(&bad) = tokens.iter().find(|&&t| t >= R50K_VOCAB_SIZE) {
            return Err(TokenizerError::Decode {
                message: format!("unknown token id {}", bad),
            });
        }
        // A window edge may split a multi-byte character; the broken bytes
        // become U+FFFD.
        let bytes: Vec<u8> = self
            .bpe
            ._decode_native_and_split(tokens.to_vec())
            .flatten()
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Default)]
struct Vocabulary {
    ids: HashMap<String, u32>,
    words: Vec<String>,
}

/// Splits on Unicode whitespace and assigns ids in first-seen order.
///
/// Decoding joins words with a single space, so runs of whitespace in the
/// input are normalized.
#[derive(Debug, Default)]
pub struct WhitespaceTokenizer {
    vocab: Mutex<Vocabulary>,
}

impl WhitespaceTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vocabulary>, TokenizerError> {
        self.vocab.lock().map_err(|e| TokenizerError::Init {
            message: format!("vocabulary lock poisoned: {}", e),
        })
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut vocab = self.lock()?;
        let mut tokens = Vec::new();
        for word in text.split_whitespace() {
            let id = match vocab.ids.get(word) {
                Some(id) => *id,
                None => {
                    let id = u32::try_from(vocab.words.len()).map_err(|_| {
                        TokenizerError::Encode {
                            message: "vocabulary exceeds u32 ids".into(),
                        }
                    })?;
                    vocab.words.push(word.to_string());
                    vocab.ids.insert(word.to_string(), id);
                    id
                }
            };
            tokens.push(id);
        }
        Ok(tokens)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let vocab = self.lock()?;
        let mut words = Vec::with_capacity(tokens.len());
        for &token in tokens {
            let word = vocab
                .words
                .get(token as usize)
                .ok_or_else(|| TokenizerError::Decode {
                    message: format!("unknown token id {}", token),
                })?;
            words.push(word.as_str());
        }
        Ok(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_roundtrip_normalizes_spacing() {
        let tok = WhitespaceTokenizer::new();
        let ids = tok.encode("a  b\tc a").unwrap();
        assert_eq!(ids, vec![0, 1, 2, 0]);
        assert_eq!(tok.decode(&ids).unwrap(), "a b c a");
    }

    #[test]
    fn test_whitespace_unknown_id_fails() {
        let tok = WhitespaceTokenizer::new();
        tok.encode("only two").unwrap();
        let err = tok.decode(&[0, 7]).unwrap_err();
        assert!(matches!(err, TokenizerError::Decode { .. }));
    }

    #[test]
    fn test_whitespace_empty_text() {
        let tok = WhitespaceTokenizer::new();
        assert!(tok.encode("   \n ").unwrap().is_empty());
        assert_eq!(tok.decode(&[]).unwrap(), "");
    }

    #[test]
    fn test_tiktoken_roundtrip() {
        let tok = TiktokenTokenizer::gpt2().unwrap();
        let text = "Incremental indexing keeps the store fresh.";
        let ids = tok.encode(text).unwrap();
        assert!(!ids.is_empty());
        assert!(ids.len() < text.len());
        assert_eq!(tok.decode(&ids).unwrap(), text);
    }

    #[test]
    fn test_tiktoken_split_character_is_replaced() {
        let tok = TiktokenTokenizer::gpt2().unwrap();
        let text = "機械学習と人工知能についての文書です。検索拡張生成は便利な技術です。";
        let ids = tok.encode(text).unwrap();
        // Byte-level BPE splits most CJK characters across tokens, so some
        // prefix ends mid-character.
        let partial: Vec<String> = (1..ids.len())
            .map(|n| tok.decode(&ids[..n]).unwrap())
            .collect();
        assert!(partial.iter().any(|p| p.contains('\u{FFFD}')));
        assert_eq!(tok.decode(&ids).unwrap(), text);
    }

    #[test]
    fn test_tiktoken_unknown_id_is_error() {
        let tok = TiktokenTokenizer::gpt2().unwrap();
        assert!(tok.decode(&[50256]).is_ok());
        let err = tok.decode(&[464, 50257]).unwrap_err();
        assert!(matches!(err, TokenizerError::Decode { .. }));
    }
}
