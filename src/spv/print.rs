//! Pretty-printing decoded SPIR-V instructions (in a disassembly-like syntax).

use crate::spv::mask::BitIdx;
use crate::spv::operand::{OperandClass, OperandType};
use crate::spv::spec::{Opcode, Spec};
use crate::spv::{DecodedInst, DecodedOperand};
use itertools::Itertools;
use std::fmt;

/// Print one word, interpreted as a single-word operand of type `ty`.
fn word(f: &mut fmt::Formatter<'_>, ty: OperandType, word: u32) -> fmt::Result {
    match ty.class() {
        Some(OperandClass::Id) => write!(f, "%{word}"),
        Some(OperandClass::Literal) if ty == OperandType::LiteralFloat => {
            write!(f, "{:?}", f32::from_bits(word))
        }
        Some(OperandClass::ValueEnum) => {
            match Spec::get().value_enum_def(ty).and_then(|def| def.name(word)) {
                Some(name) => f.write_str(name),
                None => write!(f, "{word}"),
            }
        }
        Some(OperandClass::Mask) => mask(f, ty, word),
        _ => write!(f, "{word}"),
    }
}

fn mask(f: &mut fmt::Formatter<'_>, ty: OperandType, word: u32) -> fmt::Result {
    let Some(mask_def) = Spec::get().mask_def(ty) else {
        return write!(f, "0x{word:x}");
    };
    if word == 0 {
        return f.write_str(mask_def.empty_name);
    }

    let named_bits = BitIdx::of_all_set_bits(word)
        .filter_map(|bit_idx| mask_def.bit(bit_idx))
        .map(|bit_def| bit_def.name.to_string());
    let unnamed_bits = mask_def.unnamed_bits(word);
    let unnamed_bits = (unnamed_bits != 0).then(|| format!("0x{unnamed_bits:x}"));

    write!(f, "{}", named_bits.chain(unnamed_bits).join("|"))
}

impl fmt::Display for DecodedOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ty.class(), &self.words[..]) {
            (Some(OperandClass::LiteralString), words) => match self.as_literal_string() {
                Some(s) => write!(f, "{s:?}"),
                None => write!(f, "{words:08x?}"),
            },
            (Some(OperandClass::Pair), &[a, b]) => match self.ty.pair_parts() {
                Some([a_ty, b_ty]) => {
                    word(f, a_ty, a)?;
                    f.write_str(" ")?;
                    word(f, b_ty, b)
                }
                None => write!(f, "{a} {b}"),
            },
            (_, &[w]) => word(f, self.ty, w),

            // NOTE only reachable for operands built by hand.
            (_, words) => write!(f, "{words:08x?}"),
        }
    }
}

impl fmt::Display for DecodedInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (result_ids, operands): (Vec<_>, Vec<_>) =
            self.operands.iter().partition(|operand| operand.ty == OperandType::IdResult);

        for result_id in result_ids {
            write!(f, "{result_id} = ")?;
        }
        match Opcode::try_from_u16_with_name_and_def(self.opcode) {
            Some((_, name, _)) => f.write_str(name)?,
            None => write!(f, "<unknown opcode {}>", self.opcode)?,
        }
        for operand in operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

pub fn operand_to_string(operand: &DecodedOperand) -> String {
    operand.to_string()
}

/// Print `inst` as e.g. `%2 = OpLoad %1 %3 Volatile|Aligned 16` (with the
/// result ID, if any, moved to the front).
pub fn inst_to_string(inst: &DecodedInst) -> String {
    inst.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spv::read;

    fn decode_and_print(name: &str, words: &[u32]) -> String {
        let opcode = Opcode::lookup(name).unwrap();
        let operands = read::decode_operands(&opcode.layout(), words).unwrap();
        inst_to_string(&DecodedInst { opcode: opcode.as_u16(), operands })
    }

    #[test]
    fn result_id_first() {
        assert_eq!(
            decode_and_print("OpLoad", &[1, 2, 3, 0x3, 16]),
            "%2 = OpLoad %1 %3 Volatile|Aligned 16"
        );
        assert_eq!(decode_and_print("OpLoad", &[1, 2, 3]), "%2 = OpLoad %1 %3");
        assert_eq!(decode_and_print("OpReturn", &[]), "OpReturn");
    }

    #[test]
    fn masks() {
        assert_eq!(decode_and_print("OpStore", &[1, 2, 0]), "OpStore %1 %2 None");
        assert_eq!(
            decode_and_print("OpStore", &[1, 2, 0x4000_0001]),
            "OpStore %1 %2 Volatile|0x40000000"
        );
        assert_eq!(decode_and_print("OpSelectionMerge", &[1, 0]), "OpSelectionMerge %1 None");
    }

    #[test]
    fn enums_strings_and_pairs() {
        assert_eq!(decode_and_print("OpMemoryModel", &[0, 1]), "OpMemoryModel Logical GLSL450");
        assert_eq!(decode_and_print("OpMemoryModel", &[0, 77]), "OpMemoryModel Logical 77");

        let main = u32::from_le_bytes(*b"main");
        assert_eq!(decode_and_print("OpName", &[4, main, 0]), "OpName %4 \"main\"");

        assert_eq!(
            decode_and_print("OpSwitch", &[1, 2, 10, 3, 20, 4]),
            "OpSwitch %1 %2 10 %3 20 %4"
        );
    }

    #[test]
    fn unknown_opcode() {
        let inst = DecodedInst {
            opcode: 0xfff0,
            operands: vec![DecodedOperand::word(OperandType::LiteralFloat, 1.5f32.to_bits())],
        };
        assert_eq!(inst_to_string(&inst), "<unknown opcode 65520> 1.5");
    }

    #[test]
    fn malformed_operands() {
        let operand = DecodedOperand::new(OperandType::IdRef, [1, 2]);
        assert_eq!(operand_to_string(&operand), "[00000001, 00000002]");
    }
}
