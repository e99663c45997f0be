//! SPIR-V grammar tables (instruction layouts, mask and value enumerants).

use crate::spv::layout::{InstructionLayout, OpcodeTable};
use crate::spv::mask::{BitIdx, MaskBitDef, MaskDef};
use crate::spv::operand::{OperandClass, OperandType};
use arrayvec::ArrayVec;
use lazy_static::lazy_static;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

pub const HEADER_LEN: usize = 5;

const SPIRV_CORE_GRAMMAR: &str = include_str!("../../grammar/spirv.core.grammar.json");

pub struct Spec {
    pub magic: u32,

    /// Grammar version, as `(major, minor, revision)`.
    pub version: (u8, u8, u8),

    instructions: FxHashMap<u16, (&'static str, InstructionDef)>,
    opcode_by_name: FxHashMap<&'static str, Opcode>,

    masks: FxHashMap<OperandType, MaskDef>,
    value_enums: FxHashMap<OperandType, ValueEnumDef>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Opcode(u16);

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({} => {:?})", self.0, self.name())
    }
}

impl Opcode {
    /// Lookup the name & definition for `opcode` in the lazily-loaded [`Spec`],
    /// returning `None` if it's not a known opcode.
    pub fn try_from_u16_with_name_and_def(
        opcode: u16,
    ) -> Option<(Self, &'static str, &'static InstructionDef)> {
        let (name, def) = Spec::get().instructions.get(&opcode)?;
        Some((Self(opcode), name, def))
    }

    /// Lookup an opcode by its name (e.g. `"OpLoad"`).
    pub fn lookup(name: &str) -> Option<Self> {
        Spec::get().opcode_by_name.get(name).copied()
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Lookup the name & definition for this opcode in the lazily-loaded [`Spec`].
    #[inline]
    pub fn name_and_def(self) -> (&'static str, &'static InstructionDef) {
        let (name, def) = &Spec::get().instructions[&self.0];
        (name, def)
    }

    /// Lookup the name for this opcode in the lazily-loaded [`Spec`].
    #[inline]
    pub fn name(self) -> &'static str {
        self.name_and_def().0
    }

    /// Lookup the definition for this opcode in the lazily-loaded [`Spec`].
    #[inline]
    pub fn def(self) -> &'static InstructionDef {
        self.name_and_def().1
    }

    pub fn layout(self) -> InstructionLayout<'static> {
        // NOTE validated while loading the grammar, can't fail here.
        InstructionLayout::new(self.0, &self.def().operand_types)
            .unwrap_or_else(|e| unreachable!("{}: {e}", self.name()))
    }
}

#[derive(PartialEq, Eq)]
pub struct InstructionDef {
    // FIXME(eddyb) change the inline size of this to fit most instructions.
    pub operand_types: SmallVec<[OperandType; 6]>,
}

/// Names of the known values of one `ValueEnum` operand type.
pub struct ValueEnumDef {
    pub variants: BTreeMap<u32, &'static str>,
}

impl ValueEnumDef {
    pub fn name(&self, value: u32) -> Option<&'static str> {
        self.variants.get(&value).copied()
    }
}

impl OpcodeTable for Spec {
    fn operand_types(&self, opcode: u16) -> Option<&[OperandType]> {
        let (_, def) = self.instructions.get(&opcode)?;
        Some(&def.operand_types)
    }
}

impl Spec {
    /// Return a lazily-loaded [`Spec`] (only does significant work for the first call).
    #[inline(always)]
    #[must_use]
    pub fn get() -> &'static Spec {
        lazy_static! {
            static ref SPEC: Spec = {
                let raw_core_grammar: raw::CoreGrammar<'static> =
                    serde_json::from_str(SPIRV_CORE_GRAMMAR).unwrap();
                Spec::from_raw(raw_core_grammar)
            };
        }
        &SPEC
    }

    /// Definition of the named bits of `mask` (only for concrete mask types).
    pub fn mask_def(&self, mask: OperandType) -> Option<&MaskDef> {
        self.masks.get(&mask)
    }

    /// Definition of the named values of `ty` (only for concrete `ValueEnum` types).
    pub fn value_enum_def(&self, ty: OperandType) -> Option<&ValueEnumDef> {
        self.value_enums.get(&ty)
    }

    /// Return an iterator of every known opcode, in ascending order.
    pub fn opcodes(&self) -> impl Iterator<Item = Opcode> {
        let mut opcodes: Vec<_> = self.instructions.keys().copied().map(Opcode).collect();
        opcodes.sort();
        opcodes.into_iter()
    }

    /// Implementation detail of [`Spec::get`], indexes the raw data to produce a [`Spec`].
    fn from_raw(raw_core_grammar: raw::CoreGrammar<'static>) -> Self {
        /// Helper for picking a name when the same value has multiple names.
        fn preferred_name_between_dups<'a>(a: &'a str, b: &'a str) -> &'a str {
            // Prefer standard names over vendor/extension ones.
            let is_std_and_vnd = |std: &str, vnd: &str| {
                vnd.starts_with(std)
                    && vnd.len() > std.len()
                    && vnd[std.len()..].chars().all(|c| c.is_ascii_uppercase())
            };
            if is_std_and_vnd(a, b) {
                a
            } else if is_std_and_vnd(b, a) {
                b
            } else {
                // Worst case, use the first in alphabetical order.
                a.min(b)
            }
        }

        let operand_type_by_name = |kind: &str| {
            OperandType::from_grammar_name(kind)
                .unwrap_or_else(|| panic!("unknown operand kind `{kind}`"))
        };

        let mut masks = FxHashMap::default();
        let mut value_enums = FxHashMap::default();
        for o in &raw_core_grammar.operand_kinds {
            let ty = operand_type_by_name(o.kind);
            let expected_class = match o.category {
                raw::OperandKindCategory::BitEnum => OperandClass::Mask,
                raw::OperandKindCategory::ValueEnum => OperandClass::ValueEnum,
                raw::OperandKindCategory::Id => OperandClass::Id,
                raw::OperandKindCategory::Literal if ty == OperandType::LiteralString => {
                    OperandClass::LiteralString
                }
                raw::OperandKindCategory::Literal => OperandClass::Literal,
                raw::OperandKindCategory::Composite => OperandClass::Pair,
            };
            assert_eq!(ty.class(), Some(expected_class), "operand kind `{}`", o.kind);

            match o.category {
                raw::OperandKindCategory::BitEnum => {
                    let mut empty_name = None;
                    let mut mask_def = MaskDef::new("None");
                    for e in o.enumerants.as_deref().unwrap_or_default() {
                        // `BitEnum` enumerants with `"value" : "0x0000"` are
                        // only really provided to give a canonical name to
                        // the state with no bits set (usually `"None"`).
                        if e.value == 0 {
                            assert!(e.parameters.is_empty());
                            empty_name = Some(match empty_name {
                                None => e.enumerant,
                                Some(prev) => preferred_name_between_dups(prev, e.enumerant),
                            });
                            continue;
                        }

                        let bit_idx = BitIdx::of_single_set_bit(e.value).unwrap_or_else(|| {
                            panic!("{}.{} is not a single bit", o.kind, e.enumerant)
                        });
                        let mut params = ArrayVec::new();
                        for p in &e.parameters {
                            assert!(p.quantifier.is_none(), "{}.{}", o.kind, e.enumerant);
                            if params.try_push(operand_type_by_name(p.kind)).is_err() {
                                panic!("{}.{} implies too many operands", o.kind, e.enumerant);
                            }
                        }
                        let new_def = MaskBitDef { name: e.enumerant, params };

                        if let Some(prev_def) = mask_def.insert(bit_idx, new_def.clone()) {
                            // Only allow aliases that do not meaningfully differ.
                            assert!(
                                prev_def.params == new_def.params,
                                "{} bits {} and {} share a bit index but differ in definition",
                                o.kind,
                                prev_def.name,
                                new_def.name,
                            );
                            let name = preferred_name_between_dups(prev_def.name, new_def.name);
                            mask_def.insert(bit_idx, MaskBitDef { name, ..new_def });
                        }
                    }
                    if let Some(empty_name) = empty_name {
                        mask_def.empty_name = empty_name;
                    }
                    masks.insert(ty, mask_def);
                }
                raw::OperandKindCategory::ValueEnum => {
                    let mut variants = BTreeMap::new();
                    for e in o.enumerants.as_deref().unwrap_or_default() {
                        // FIXME support operands implied by enumerants (e.g.
                        // `Decoration.Location`), instead of only accepting
                        // grammars that spell them out as instruction operands.
                        assert!(
                            e.parameters.is_empty(),
                            "{}.{} implies operands, which is unsupported for value enums",
                            o.kind,
                            e.enumerant,
                        );
                        variants
                            .entry(e.value)
                            .and_modify(|prev| {
                                *prev = preferred_name_between_dups(*prev, e.enumerant);
                            })
                            .or_insert(e.enumerant);
                    }
                    value_enums.insert(ty, ValueEnumDef { variants });
                }
                raw::OperandKindCategory::Composite => {
                    let bases: Option<Vec<_>> = o
                        .bases
                        .as_ref()
                        .map(|bases| bases.iter().map(|&b| operand_type_by_name(b)).collect());
                    let expected = ty.pair_parts().map(|parts| parts.to_vec());
                    assert_eq!(bases, expected, "{}", o.kind);
                }
                raw::OperandKindCategory::Id | raw::OperandKindCategory::Literal => {
                    assert!(o.enumerants.is_none() && o.bases.is_none());
                }
            }
        }

        // Every mask type must have a table, even if it doesn't imply anything.
        for ty in OperandType::all().filter(|ty| ty.is_concrete_mask()) {
            masks.entry(ty).or_insert_with(|| MaskDef::new("None"));
        }

        let mut instructions = FxHashMap::default();
        let mut opcode_by_name = FxHashMap::default();
        for inst in &raw_core_grammar.instructions {
            let operand_types = inst
                .operands
                .iter()
                .map(|o| {
                    let base = operand_type_by_name(o.kind);
                    match o.quantifier {
                        None => Some(base),
                        Some(raw::Quantifier::Optional) => base.optional(),
                        Some(raw::Quantifier::Rest) => base.variable(),
                    }
                    .unwrap()
                })
                .collect::<SmallVec<_>>();

            if let Err(e) = InstructionLayout::new(inst.opcode, &operand_types) {
                panic!("{}: {e}", inst.opname);
            }

            let def = InstructionDef { operand_types };
            let old = instructions.insert(inst.opcode, (inst.opname, def));
            assert!(old.is_none(), "multiple instructions with opcode {}", inst.opcode);
            opcode_by_name.insert(inst.opname, Opcode(inst.opcode));
        }

        log::debug!(
            "loaded SPIR-V {}.{} grammar: {} instructions, {} masks, {} value enums",
            raw_core_grammar.major_version,
            raw_core_grammar.minor_version,
            instructions.len(),
            masks.len(),
            value_enums.len(),
        );

        Self {
            magic: raw_core_grammar.magic_number,
            version: (
                raw_core_grammar.major_version,
                raw_core_grammar.minor_version,
                raw_core_grammar.revision,
            ),

            instructions,
            opcode_by_name,

            masks,
            value_enums,
        }
    }
}

/// Deserialization for the `.grammar.json` file, without any post-processing.
pub mod raw {
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct CoreGrammar<'a> {
        #[serde(deserialize_with = "dew_u32_maybe_hex")]
        pub magic_number: u32,

        pub major_version: u8,
        pub minor_version: u8,
        pub revision: u8,

        #[serde(borrow)]
        pub instructions: Vec<Instruction<'a>>,
        pub operand_kinds: Vec<OperandKind<'a>>,
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Instruction<'a> {
        pub opname: &'a str,
        pub opcode: u16,
        #[serde(default, borrow)]
        pub operands: Vec<Operand<'a>>,
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Operand<'a> {
        pub kind: &'a str,
        pub quantifier: Option<Quantifier>,

        // HACK some names contain `\n` escapes, so they can't be `&'a str`.
        pub name: Option<String>,
    }

    #[derive(Deserialize)]
    pub enum Quantifier {
        #[serde(rename = "?")]
        Optional,

        #[serde(rename = "*")]
        Rest,
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct OperandKind<'a> {
        pub category: OperandKindCategory,
        pub kind: &'a str,

        #[serde(borrow)]
        pub enumerants: Option<Vec<OperandKindEnumerant<'a>>>,

        #[serde(borrow)]
        pub bases: Option<Vec<&'a str>>,
    }

    #[derive(Deserialize)]
    pub enum OperandKindCategory {
        BitEnum,
        ValueEnum,

        Id,
        Literal,
        Composite,
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct OperandKindEnumerant<'a> {
        pub enumerant: &'a str,

        #[serde(deserialize_with = "dew_u32_maybe_hex")]
        pub value: u32,

        #[serde(default, borrow)]
        pub parameters: Vec<Operand<'a>>,
    }

    /// Helper to generate functions usable with `deserialize_with` (hence "dew"),
    /// that deserialize to an intermediary type, which is then passed through the
    /// supplied closure, which is allowed to error. This is similar to the serde
    /// attribute `#[serde(try_from = "...")]`, but that only works for whole types.
    macro_rules! dew_and_then {
        ($($name:ident: |$x:ident: $in_ty:ty| -> $out_ty:ty $body:block),* $(,)?) => {
            $(fn $name<'de, D>(deserializer: D) -> Result<$out_ty, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let x = Deserialize::deserialize(deserializer)?;

                // HACK(eddyb) this is a `try {...}`-like use of a closure.
                #[allow(clippy::redundant_closure_call)]
                (|$x: $in_ty| -> Result<$out_ty, _> { $body })(x)
                    .map_err(serde::de::Error::custom)
            })*
        };
    }

    dew_and_then! {
        dew_u32_maybe_hex: |x: DecOrHex<'_>| -> u32 { x.try_into() },
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub enum DecOrHex<'a> {
        Dec(u32),
        MaybeHex(&'a str),
    }

    impl TryInto<u32> for DecOrHex<'_> {
        type Error = String;
        fn try_into(self) -> Result<u32, Self::Error> {
            match self {
                DecOrHex::Dec(x) => Ok(x),
                DecOrHex::MaybeHex(s) => {
                    if let Ok(x) = s.parse() {
                        return Ok(x);
                    }
                    let digits = s.strip_prefix("0x").ok_or_else(|| {
                        format!("DecOrHex string form doesn't start with 0x: {s:?}")
                    })?;
                    u32::from_str_radix(digits, 16).map_err(|e| format!("DecOrHex {s:?}: {e}"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spv::operand::OperandMode;

    // HACK(eddyb) make sure parsing JSON doesn't start failing randomly.
    #[test]
    fn get_spec() {
        let spec = Spec::get();
        assert_eq!(spec.magic, 0x0723_0203);
        assert!(spec.opcodes().count() > 50);
    }

    #[test]
    fn every_layout_is_valid() {
        for opcode in Spec::get().opcodes() {
            let layout = opcode.layout();
            let variables =
                layout.all_operands().filter(|&(mode, _)| mode == OperandMode::Variable).count();
            assert!(variables <= 1, "{}", opcode.name());
        }
    }

    #[test]
    fn opcode_names_roundtrip() {
        for opcode in Spec::get().opcodes() {
            assert_eq!(Opcode::lookup(opcode.name()), Some(opcode));
        }
        assert_eq!(Opcode::lookup("OpNotAnInstruction"), None);
        assert!(Opcode::try_from_u16_with_name_and_def(0xfff0).is_none());
    }

    #[test]
    fn every_mask_has_a_table() {
        let spec = Spec::get();
        for ty in OperandType::all() {
            assert_eq!(spec.mask_def(ty).is_some(), ty.is_concrete_mask(), "{ty:?}");
        }
    }

    #[test]
    fn aliases_prefer_standard_names() {
        let spec = Spec::get();
        let memory_access = spec.mask_def(OperandType::MemoryAccess).unwrap();
        let bit_3 = BitIdx::of_single_set_bit(0x8).unwrap();
        assert_eq!(memory_access.bit(bit_3).unwrap().name, "MakePointerAvailable");
        assert_eq!(memory_access.empty_name, "None");

        let addressing = spec.value_enum_def(OperandType::AddressingModel).unwrap();
        assert_eq!(addressing.name(5348), Some("PhysicalStorageBuffer64"));
        assert_eq!(addressing.name(0), Some("Logical"));
        assert_eq!(addressing.name(1234), None);
    }

    #[test]
    fn quantifiers_map_to_wrappers() {
        let switch = Opcode::lookup("OpSwitch").unwrap();
        assert_eq!(
            switch.def().operand_types[..],
            [
                OperandType::IdRef,
                OperandType::IdRef,
                OperandType::PairLiteralIntegerIdRef.variable().unwrap(),
            ]
        );
    }

    /// Load a grammar with one `OpDecorate` instruction, and `operand_kind`
    /// as its only operand kind (besides the implicit ones).
    fn load_with_kind(operand_kind: &str) -> Spec {
        let json = format!(
            r#"{{ "magic_number": "0x07230203",
                "major_version": 1, "minor_version": 6, "revision": 1,
                "instructions": [{{ "opname": "OpDecorate", "opcode": 71,
                    "operands": [{{ "kind": "IdRef" }}, {{ "kind": "Decoration" }}] }}],
                "operand_kinds": [{operand_kind}] }}"#
        );
        // `raw` borrows from the JSON, and `Spec` needs it for `'static`.
        let json: &'static str = Box::leak(json.into_boxed_str());
        Spec::from_raw(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn value_enum_without_parameters_loads() {
        let spec = load_with_kind(
            r#"{ "category": "ValueEnum", "kind": "Decoration",
                "enumerants": [{ "enumerant": "Flat", "value": 14 }] }"#,
        );
        assert_eq!(
            spec.operand_types(71),
            Some(&[OperandType::IdRef, OperandType::Decoration][..])
        );
        assert_eq!(spec.value_enum_def(OperandType::Decoration).unwrap().name(14), Some("Flat"));
    }

    #[test]
    #[should_panic(expected = "Decoration.Location implies operands")]
    fn value_enum_parameters_are_rejected() {
        load_with_kind(
            r#"{ "category": "ValueEnum", "kind": "Decoration",
                "enumerants": [{ "enumerant": "Location", "value": 30,
                    "parameters": [{ "kind": "LiteralInteger" }] }] }"#,
        );
    }

    #[test]
    fn dec_or_hex() {
        let parse = |json: &'static str| -> Result<u32, String> {
            serde_json::from_str::<raw::DecOrHex<'_>>(json).unwrap().try_into()
        };
        assert_eq!(parse("17"), Ok(17));
        assert_eq!(parse("\"0x0100\""), Ok(0x100));
        assert_eq!(parse("\"42\""), Ok(42));
        assert!(parse("\"0xzz\"").is_err());
        assert!(parse("\"nope\"").is_err());
    }
}
