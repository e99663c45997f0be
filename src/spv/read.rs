//! Low-level parsing of SPIR-V binary form.

use crate::spv::layout::{InstructionLayout, LayoutError, OpcodeTable};
use crate::spv::operand::{OperandMode, OperandType, WordShape};
use crate::spv::{self, mask, spec, DecodedInst, DecodedOperand};
use std::path::Path;
use std::{fs, io};
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Ran out of words while an operand was still required.
    #[error("ran out of words while decoding {expected:?} operand")]
    InsufficientWords { expected: OperandType },

    /// Extra words were left over, after decoding every operand in the layout.
    #[error("{leftover} word(s) left over after the last operand")]
    ExcessWords { leftover: usize },

    #[error("missing \\0 terminator in LiteralString")]
    UnterminatedString,

    /// An instruction header with a word count of `0` (which can never be valid,
    /// as the count includes the header word itself).
    #[error("instruction with a word count of 0")]
    ZeroWordCount,

    #[error("truncated instruction (declares {declared} words, only {available} available)")]
    TruncatedInstruction { declared: usize, available: usize },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Error for a whole module, i.e. its framing or any of its instructions.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("malformed SPIR-V (not a multiple of 4 bytes)")]
    NotWordAligned,

    #[error("malformed SPIR-V (truncated header)")]
    TruncatedHeader,

    #[error("malformed SPIR-V (incorrect magic number 0x{0:08x})")]
    BadMagic(u32),

    #[error("malformed SPIR-V (at word {offset}: {source})")]
    Inst { offset: usize, source: DecodeError },

    #[error(transparent)]
    Io(#[from] io::Error),
}

struct OperandDecoder<'a> {
    /// Input words of an instruction (excluding its header word).
    words: &'a [u32],

    /// Output operands, being decoded.
    operands: Vec<DecodedOperand>,
}

impl OperandDecoder<'_> {
    fn is_exhausted(&self) -> bool {
        self.words.is_empty()
    }

    /// Decode one operand of concrete type `ty`, followed by any operands
    /// implied by it (if it's a mask).
    fn operand(&mut self, ty: OperandType) -> Result<(), DecodeError> {
        if self.is_exhausted() {
            return Err(DecodeError::InsufficientWords { expected: ty });
        }

        let len = match ty.word_shape() {
            Some(WordShape::Fixed(n)) => usize::from(n),
            Some(WordShape::NulTerminated) => self
                .words
                .iter()
                .position(|&word| spv::word_has_nul(word))
                .ok_or(DecodeError::UnterminatedString)?
                + 1,
            None => unreachable!("{ty:?} is not a concrete operand type"),
        };
        if len > self.words.len() {
            return Err(DecodeError::InsufficientWords { expected: ty });
        }

        let (words, rest) = self.words.split_at(len);
        self.words = rest;
        self.operands.push(DecodedOperand::new(ty, words.iter().copied()));

        if ty.is_concrete_mask() {
            for implied in mask::implied_operands(ty, words[0]) {
                self.operand(implied)?;
            }
        }

        Ok(())
    }

    fn operands(
        mut self,
        layout: &InstructionLayout<'_>,
    ) -> Result<Vec<DecodedOperand>, DecodeError> {
        for (mode, ty) in layout.all_operands() {
            match mode {
                OperandMode::Required => self.operand(ty)?,
                OperandMode::Optional => {
                    if !self.is_exhausted() {
                        self.operand(ty)?;
                    }
                }
                OperandMode::Variable => {
                    while !self.is_exhausted() {
                        let remaining = self.words.len();
                        self.operand(ty)?;
                        debug_assert!(self.words.len() < remaining);
                    }
                }
            }
        }

        // The instruction must consume its entire word count.
        if !self.is_exhausted() {
            return Err(DecodeError::ExcessWords { leftover: self.words.len() });
        }

        Ok(self.operands)
    }
}

/// Decode all the operand `words` of one instruction (i.e. excluding its
/// header word), according to `layout`.
pub fn decode_operands(
    layout: &InstructionLayout<'_>,
    words: &[u32],
) -> Result<Vec<DecodedOperand>, DecodeError> {
    OperandDecoder { words, operands: Vec::new() }.operands(layout).map_err(|e| {
        log::debug!("failed to decode opcode {} from {words:08x?}: {e}", layout.opcode());
        e
    })
}

/// Decode the first instruction from `words` (header word included), returning
/// it alongside its total word count.
fn decode_inst<T: OpcodeTable + ?Sized>(
    table: &T,
    words: &[u32],
) -> Result<(DecodedInst, usize), DecodeError> {
    let &header = words.first().ok_or(DecodeError::ZeroWordCount)?;
    let (inst_len, opcode) = ((header >> 16) as usize, header as u16);

    if inst_len == 0 {
        return Err(DecodeError::ZeroWordCount);
    }
    if words.len() < inst_len {
        return Err(DecodeError::TruncatedInstruction {
            declared: inst_len,
            available: words.len(),
        });
    }

    let layout = InstructionLayout::resolve(table, opcode)?;
    let operands = decode_operands(&layout, &words[1..inst_len])?;

    let inst = DecodedInst { opcode, operands };
    log::trace!("decoded {inst:?}");
    Ok((inst, inst_len))
}

/// Iterator over back-to-back instructions (header words included), with
/// their layouts taken from `table`.
///
/// After the first error, no more instructions are produced.
pub struct InstReader<'a, T: ?Sized> {
    table: &'a T,
    words: &'a [u32],

    /// Position of `words` in the original input.
    offset: usize,
}

impl<'a, T: OpcodeTable + ?Sized> InstReader<'a, T> {
    pub fn new(table: &'a T, words: &'a [u32]) -> Self {
        Self { table, words, offset: 0 }
    }

    /// Word position (in the original input) of the next instruction.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<T: OpcodeTable + ?Sized> Iterator for InstReader<'_, T> {
    type Item = Result<DecodedInst, DecodeError>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.words.is_empty() {
            return None;
        }
        match decode_inst(self.table, self.words) {
            Ok((inst, inst_len)) => {
                self.words = &self.words[inst_len..];
                self.offset += inst_len;
                Some(Ok(inst))
            }
            Err(e) => {
                self.words = &[];
                Some(Err(e))
            }
        }
    }
}

pub struct ModuleParser {
    /// Copy of the header words (for convenience).
    // FIXME(eddyb) add a `spec::Header` struct with named fields.
    pub header: [u32; spec::HEADER_LEN],

    /// The entire module's words, already normalized to native endianness.
    words: Vec<u32>,

    /// Next (instructions') word position in the module.
    next_word: usize,
}

impl ModuleParser {
    pub fn read_from_spv_file(path: impl AsRef<Path>) -> Result<Self, ModuleError> {
        Self::read_from_spv_bytes(fs::read(path)?)
    }

    pub fn read_from_spv_bytes(spv_bytes: Vec<u8>) -> Result<Self, ModuleError> {
        let spv_spec = spec::Spec::get();

        if spv_bytes.len() % 4 != 0 {
            return Err(ModuleError::NotWordAligned);
        }
        // NOTE `Vec<u8>` isn't guaranteed to be aligned for `u32`,
        // so the words are copied out instead of cast in place.
        let mut words: Vec<u32> =
            spv_bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();

        if words.len() < spec::HEADER_LEN {
            return Err(ModuleError::TruncatedHeader);
        }

        // Check the magic, and swap endianness of all words if we have to.
        {
            let magic = words[0];
            if magic == spv_spec.magic {
                // Nothing to do, all words already match native endianness.
            } else if magic.swap_bytes() == spv_spec.magic {
                log::debug!("byte-swapping opposite-endian SPIR-V module");
                for word in &mut words {
                    *word = word.swap_bytes();
                }
            } else {
                return Err(ModuleError::BadMagic(magic));
            }
        }

        let mut header = [0; spec::HEADER_LEN];
        header.copy_from_slice(&words[..spec::HEADER_LEN]);

        Ok(Self { header, words, next_word: spec::HEADER_LEN })
    }
}

impl Iterator for ModuleParser {
    type Item = Result<DecodedInst, ModuleError>;
    fn next(&mut self) -> Option<Self::Item> {
        let words = self.words.get(self.next_word..).filter(|words| !words.is_empty())?;

        match decode_inst(spec::Spec::get(), words) {
            Ok((inst, inst_len)) => {
                self.next_word += inst_len;
                Some(Ok(inst))
            }
            Err(source) => {
                let offset = self.next_word;
                log::debug!("failed to parse instruction at word {offset}: {source}");
                self.next_word = self.words.len();
                Some(Err(ModuleError::Inst { offset, source }))
            }
        }
    }
}
