//! Per-opcode operand layouts, decoupled from the schema of the opcode table.

use crate::spv::operand::{OperandMode, OperandType, WordShape};
use thiserror::Error;

/// A source of per-opcode operand type sequences (e.g. [`Spec`](crate::spv::spec::Spec)).
pub trait OpcodeTable {
    /// The operand types expected by `opcode` (following the header word),
    /// or `None` if `opcode` isn't known.
    fn operand_types(&self, opcode: u16) -> Option<&[OperandType]>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("unsupported opcode {0}")]
    UnknownOpcode(u16),

    #[error("{0:?} cannot be used as an operand type")]
    NotAnOperand(OperandType),

    #[error("variable operand at position {position} must be the last operand")]
    VariableNotLast { position: usize },
}

/// The ordered operand types of one opcode, ending in at most one variable type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InstructionLayout<'t> {
    opcode: u16,
    operand_types: &'t [OperandType],
}

impl<'t> InstructionLayout<'t> {
    pub fn new(opcode: u16, operand_types: &'t [OperandType]) -> Result<Self, LayoutError> {
        for (i, &ty) in operand_types.iter().enumerate() {
            match ty.mode_and_base() {
                None => return Err(LayoutError::NotAnOperand(ty)),
                Some((OperandMode::Variable, _)) if i + 1 != operand_types.len() => {
                    return Err(LayoutError::VariableNotLast { position: i });
                }
                Some(_) => {}
            }
        }
        Ok(Self { opcode, operand_types })
    }

    /// Lookup `opcode` in `table`, and validate the operand types found.
    pub fn resolve<T: OpcodeTable + ?Sized>(
        table: &'t T,
        opcode: u16,
    ) -> Result<Self, LayoutError> {
        let operand_types =
            table.operand_types(opcode).ok_or(LayoutError::UnknownOpcode(opcode))?;
        Self::new(opcode, operand_types)
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn operand_types(&self) -> &'t [OperandType] {
        self.operand_types
    }

    /// Return an iterator of every operand's [`OperandMode`] and concrete type.
    pub fn all_operands(&self) -> impl Iterator<Item = (OperandMode, OperandType)> + 't {
        // NOTE `filter_map` never filters anything out, thanks to `new`.
        self.operand_types.iter().filter_map(|ty| ty.mode_and_base())
    }

    /// The fewest operand words an instruction with this layout can have
    /// (excluding its header word).
    pub fn min_word_count(&self) -> usize {
        self.all_operands()
            .filter(|&(mode, _)| mode == OperandMode::Required)
            .map(|(_, ty)| match ty.word_shape() {
                Some(WordShape::Fixed(n)) => usize::from(n),
                Some(WordShape::NulTerminated) | None => 1,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spv::spec::{Opcode, Spec};
    use rustc_hash::FxHashMap;

    struct MapTable(FxHashMap<u16, Vec<OperandType>>);

    impl OpcodeTable for MapTable {
        fn operand_types(&self, opcode: u16) -> Option<&[OperandType]> {
            self.0.get(&opcode).map(|types| &types[..])
        }
    }

    #[test]
    fn variable_must_be_last() {
        let var_id = OperandType::IdRef.variable().unwrap();
        assert!(InstructionLayout::new(0, &[OperandType::IdRef, var_id]).is_ok());
        assert_eq!(
            InstructionLayout::new(0, &[var_id, OperandType::IdRef]),
            Err(LayoutError::VariableNotLast { position: 0 })
        );
        assert_eq!(
            InstructionLayout::new(0, &[var_id, var_id]),
            Err(LayoutError::VariableNotLast { position: 0 })
        );
    }

    #[test]
    fn sentinels_are_rejected() {
        for ty in [OperandType::NONE, OperandType::NUM_OPERAND_TYPES, OperandType::FORCE_32BIT] {
            assert_eq!(InstructionLayout::new(0, &[ty]), Err(LayoutError::NotAnOperand(ty)));
        }
    }

    #[test]
    fn resolve_from_custom_table() {
        let opt_lit = OperandType::LiteralInteger.optional().unwrap();
        let table = MapTable([(7, vec![OperandType::IdRef, opt_lit])].into_iter().collect());

        let layout = InstructionLayout::resolve(&table, 7).unwrap();
        assert_eq!(layout.opcode(), 7);
        assert_eq!(
            layout.all_operands().collect::<Vec<_>>(),
            [
                (OperandMode::Required, OperandType::IdRef),
                (OperandMode::Optional, OperandType::LiteralInteger),
            ]
        );
        assert_eq!(InstructionLayout::resolve(&table, 8), Err(LayoutError::UnknownOpcode(8)));
    }

    #[test]
    fn resolve_from_spec() {
        let op_load = Opcode::lookup("OpLoad").unwrap();
        let layout = InstructionLayout::resolve(Spec::get(), op_load.as_u16()).unwrap();
        assert_eq!(
            layout.operand_types(),
            [
                OperandType::IdResultType,
                OperandType::IdResult,
                OperandType::IdRef,
                OperandType::MemoryAccess.optional().unwrap(),
            ]
        );
        assert_eq!(layout.min_word_count(), 3);
    }

    #[test]
    fn min_word_count_counts_pairs_and_skips_tails() {
        let types = [
            OperandType::PairIdRefIdRef,
            OperandType::LiteralString,
            OperandType::IdRef.variable().unwrap(),
        ];
        let layout = InstructionLayout::new(0, &types).unwrap();
        assert_eq!(layout.min_word_count(), 3);
    }
}
