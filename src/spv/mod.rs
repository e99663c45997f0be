//! SPIR-V operand grammar, and the instruction codec it drives ([`read`]/[`write`]).

// NOTE(eddyb) all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
pub mod layout;
pub mod mask;
pub mod operand;
pub mod print;
pub mod read;
pub mod spec;
pub mod write;

pub use operand::OperandType;

use smallvec::SmallVec;
use std::iter;

/// One decoded operand, i.e. its (always concrete) type and all of its words.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecodedOperand {
    pub ty: OperandType,

    // FIXME only strings (and pairs) need more than one word, maybe
    // it's worth interning (or at least boxing) those separately.
    pub words: SmallVec<[u32; 1]>,
}

impl DecodedOperand {
    pub fn new(ty: OperandType, words: impl IntoIterator<Item = u32>) -> Self {
        Self { ty, words: words.into_iter().collect() }
    }

    /// Single-word operand (IDs, most literals, enums and masks).
    pub fn word(ty: OperandType, word: u32) -> Self {
        Self::new(ty, [word])
    }

    /// Encode `s` as a `LiteralString` operand, i.e. its UTF-8 bytes packed
    /// into little-endian words, followed by at least one `0` byte.
    ///
    /// Returns `None` if `s` contains a `\0` (which would end the string early).
    pub fn literal_string(s: &str) -> Option<Self> {
        if s.contains('\0') {
            return None;
        }

        let bytes = s.as_bytes();

        // FIXME(eddyb) replace with `array_chunks` once that is stabilized.
        let full_words =
            bytes.chunks_exact(4).map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]));

        let leftover_bytes = &bytes[full_words.len() * 4..];
        let mut last_word = [0; 4];
        last_word[..leftover_bytes.len()].copy_from_slice(leftover_bytes);

        Some(Self::new(
            OperandType::LiteralString,
            full_words.chain(iter::once(u32::from_le_bytes(last_word))),
        ))
    }

    /// Decode a `LiteralString` operand back into its bytes (up to the first `0`),
    /// returning `None` for other types, or if the bytes aren't valid UTF-8.
    pub fn as_literal_string(&self) -> Option<String> {
        if self.ty != OperandType::LiteralString {
            return None;
        }
        let bytes: Vec<u8> = self
            .words
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .take_while(|&byte| byte != 0)
            .collect();
        String::from_utf8(bytes).ok()
    }
}

/// A decoded instruction, i.e. its opcode and all of its operands (including
/// those implied by masks), in the order their words appear in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecodedInst {
    pub opcode: u16,
    pub operands: Vec<DecodedOperand>,
}

impl DecodedInst {
    /// Total word count of the instruction (including the header word).
    pub fn word_count(&self) -> usize {
        1 + self.operands.iter().map(|operand| operand.words.len()).sum::<usize>()
    }
}

/// Whether any of the (little-endian) bytes of `word` are `0`, which is how
/// the end of a `LiteralString` is found.
pub(crate) fn word_has_nul(word: u32) -> bool {
    word.to_le_bytes().contains(&0)
}
