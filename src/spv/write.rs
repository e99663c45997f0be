//! Low-level emission of SPIR-V binary form.

use crate::spv::layout::{InstructionLayout, LayoutError};
use crate::spv::operand::{OperandMode, OperandType, WordShape};
use crate::spv::{self, mask, spec, DecodedInst, DecodedOperand};
use std::iter::Peekable;
use std::path::Path;
use std::{fs, io, slice};
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The operands following a mask don't match those implied by its set bits
    /// (`found` being `None` if the operands ran out).
    #[error("{mask:?} 0x{word:08x} implies a {expected:?} operand, found {found:?}")]
    MaskOperandMismatch {
        mask: OperandType,
        word: u32,
        expected: OperandType,
        found: Option<OperandType>,
    },

    /// An optional operand was left out, but something after it is still
    /// required (or was supplied), so the omission can't be encoded.
    #[error("omitting optional {omitted:?} is illegal when followed by {next:?}")]
    IllegalOptionalOmission { omitted: OperandType, next: OperandType },

    #[error("ran out of operands, expected {expected:?}")]
    MissingOperand { expected: OperandType },

    #[error("expected {expected:?} operand, found {found:?}")]
    UnexpectedOperand { expected: OperandType, found: OperandType },

    /// Extra operands were left over, after encoding every operand in the layout.
    #[error("{count} operand(s) left over, starting with {first:?}")]
    ExcessOperands { first: OperandType, count: usize },

    #[error("{ty:?} operand cannot have {found} word(s)")]
    WordCountMismatch { ty: OperandType, found: usize },

    #[error("missing \\0 terminator in LiteralString")]
    UnterminatedString,

    #[error("word count of SPIR-V instruction ({0}) doesn't fit in 16 bits")]
    WordCountOverflow(usize),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

struct OperandEncoder<'a> {
    /// Input operands of an instruction.
    operands: Peekable<slice::Iter<'a, DecodedOperand>>,

    /// Output SPIR-V words.
    out: &'a mut Vec<u32>,
}

impl OperandEncoder<'_> {
    fn peek_ty(&mut self) -> Option<OperandType> {
        self.operands.peek().map(|operand| operand.ty)
    }

    /// Emit the words of `operand`, after checking them against its type's shape.
    fn words(&mut self, operand: &DecodedOperand) -> Result<(), EncodeError> {
        let ty = operand.ty;
        let words = &operand.words[..];
        match ty.word_shape() {
            Some(WordShape::Fixed(n)) => {
                if words.len() != usize::from(n) {
                    return Err(EncodeError::WordCountMismatch { ty, found: words.len() });
                }
            }
            Some(WordShape::NulTerminated) => {
                match words.iter().position(|&word| spv::word_has_nul(word)) {
                    Some(i) if i + 1 == words.len() => {}
                    Some(_) => {
                        return Err(EncodeError::WordCountMismatch { ty, found: words.len() });
                    }
                    None => return Err(EncodeError::UnterminatedString),
                }
            }
            None => unreachable!("{ty:?} is not a concrete operand type"),
        }
        self.out.extend_from_slice(words);
        Ok(())
    }

    /// Emit the next operand (which must have the concrete type `ty`), followed
    /// by the operands implied by it (if it's a mask).
    fn operand(&mut self, ty: OperandType) -> Result<(), EncodeError> {
        let operand = self.operands.next().ok_or(EncodeError::MissingOperand { expected: ty })?;
        if operand.ty != ty {
            return Err(EncodeError::UnexpectedOperand { expected: ty, found: operand.ty });
        }
        self.words(operand)?;

        if ty.is_concrete_mask() {
            let word = operand.words[0];
            for implied in mask::implied_operands(ty, word) {
                match self.peek_ty() {
                    Some(found) if found == implied => self.operand(implied)?,
                    found => {
                        return Err(EncodeError::MaskOperandMismatch {
                            mask: ty,
                            word,
                            expected: implied,
                            found,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn inst_operands(mut self, layout: &InstructionLayout<'_>) -> Result<(), EncodeError> {
        let all_operands: Vec<_> = layout.all_operands().collect();
        for (i, &(mode, ty)) in all_operands.iter().enumerate() {
            match mode {
                OperandMode::Required => self.operand(ty)?,
                OperandMode::Optional => match self.peek_ty() {
                    Some(found) if found == ty => self.operand(ty)?,

                    // Omitted, which is only encodable if nothing else follows.
                    None => {
                        let later_required = all_operands[i + 1..]
                            .iter()
                            .find(|&&(mode, _)| mode == OperandMode::Required);
                        if let Some(&(_, next)) = later_required {
                            return Err(EncodeError::IllegalOptionalOmission {
                                omitted: ty,
                                next,
                            });
                        }
                    }
                    Some(found) => {
                        let expected_later =
                            all_operands[i + 1..].iter().any(|&(_, later)| later == found);
                        return Err(if expected_later {
                            EncodeError::IllegalOptionalOmission { omitted: ty, next: found }
                        } else {
                            EncodeError::UnexpectedOperand { expected: ty, found }
                        });
                    }
                },
                OperandMode::Variable => {
                    while self.peek_ty() == Some(ty) {
                        self.operand(ty)?;
                    }
                }
            }
        }

        // The instruction must consume all of its operands.
        if let Some(first) = self.peek_ty() {
            return Err(EncodeError::ExcessOperands { first, count: self.operands.len() });
        }

        Ok(())
    }
}

/// Encode one instruction (header word included) from its `operands`,
/// which must follow `layout` (and any masks' implied operands).
pub fn encode_inst(
    layout: &InstructionLayout<'_>,
    operands: &[DecodedOperand],
) -> Result<Vec<u32>, EncodeError> {
    let mut out = vec![0];
    OperandEncoder { operands: operands.iter().peekable(), out: &mut out }
        .inst_operands(layout)
        .map_err(|e| {
            log::debug!("failed to encode opcode {}: {e}", layout.opcode());
            e
        })?;

    let total_word_count = out.len();
    let word_count = u16::try_from(total_word_count)
        .map_err(|_| EncodeError::WordCountOverflow(total_word_count))?;
    out[0] = (u32::from(word_count) << 16) | u32::from(layout.opcode());

    Ok(out)
}

pub struct ModuleEmitter {
    /// Output SPIR-V words.
    // FIXME(eddyb) try to write bytes to an `impl io::Write` directly.
    pub words: Vec<u32>,
}

impl ModuleEmitter {
    pub fn with_header(header: [u32; spec::HEADER_LEN]) -> Self {
        // FIXME(eddyb) sanity-check the provided header words.
        Self { words: header.into() }
    }

    /// Encode and append one instruction, leaving `self` unchanged on error.
    pub fn push_inst(
        &mut self,
        layout: &InstructionLayout<'_>,
        operands: &[DecodedOperand],
    ) -> Result<(), EncodeError> {
        let inst_words = encode_inst(layout, operands)?;
        self.words.extend(inst_words);
        Ok(())
    }

    /// Like [`ModuleEmitter::push_inst`], with the layout of `inst.opcode`
    /// taken from the lazily-loaded [`spec::Spec`].
    pub fn push_decoded(&mut self, inst: &DecodedInst) -> Result<(), EncodeError> {
        let layout = InstructionLayout::resolve(spec::Spec::get(), inst.opcode)?;
        self.push_inst(&layout, &inst.operands)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice::<u32, u8>(&self.words).to_vec()
    }

    pub fn write_to_spv_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, bytemuck::cast_slice::<u32, u8>(&self.words))
    }
}

// HACK only used by tests, to avoid spelling out the header.
#[cfg(test)]
pub(crate) fn default_header() -> [u32; spec::HEADER_LEN] {
    let spv_spec = spec::Spec::get();
    let (major, minor, _) = spv_spec.version;
    let version = (u32::from(major) << 16) | (u32::from(minor) << 8);
    [spv_spec.magic, version, 0, 1, 0]
}
