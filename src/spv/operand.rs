//! Operand types, and their classification along the concrete/optional,
//! fixed/variable and scalar/mask axes.

use std::fmt;
use thiserror::Error;

/// SPIR-V operand type, i.e. the "shape" of one operand in an instruction.
///
/// The raw values are laid out in blocks, all derived from the "base" types
/// declared by `def_operand_types!` (`K` below being their count):
/// * `0` is [`OperandType::NONE`]
/// * `1..=K` are the concrete types (e.g. [`OperandType::IdRef`])
/// * `K+1..=2K` are the optional types, in the same order as their bases
/// * `2K+1..=3K` are the variable types, in the same order as their bases
/// * `3K+1` is [`OperandType::NUM_OPERAND_TYPES`], the end sentinel
///
/// [`OperandType::FORCE_32BIT`] is outside all of these, and exists only so
/// that every `u32` the enumeration can be stored in is accounted for.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperandType(u32);

/// Broad category of a concrete operand type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandClass {
    Id,
    Literal,
    LiteralString,
    ValueEnum,
    /// Two single-word operands always found together (e.g. in `OpPhi`).
    Pair,
    Mask,
}

/// How many words a concrete operand occupies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WordShape {
    /// Always exactly this many words.
    Fixed(u8),

    /// A word-encoded byte array, up to and including the first word with a `0` byte.
    NulTerminated,
}

/// How an operand type in an instruction layout is quantified.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandMode {
    /// Always present.
    Required,

    /// Present only if the instruction has any words left.
    Optional,

    /// Repeated until the instruction has no words left.
    Variable,
}

/// Error for raw values that aren't any [`OperandType`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("operand type {0} is outside the operand type enumeration")]
pub struct OutOfRangeType(pub u32);

struct BaseDef {
    grammar_name: &'static str,
    display_name: &'static str,
    class: OperandClass,
}

macro_rules! def_operand_types {
    ($($class:ident { $($name:ident => $display:literal),+ $(,)? })+) => {
        // HACK only used to number the base types without listing values.
        #[allow(dead_code, non_camel_case_types, clippy::upper_case_acronyms)]
        #[repr(u32)]
        enum BaseIdx {
            _None = 0,
            $($($name,)+)+
            _End,
        }

        #[allow(non_upper_case_globals)]
        impl OperandType {
            $($(pub const $name: Self = Self(BaseIdx::$name as u32);)+)+
        }

        const BASE_COUNT: u32 = BaseIdx::_End as u32 - 1;

        static BASE_DEFS: [BaseDef; BASE_COUNT as usize] = [
            $($(BaseDef {
                grammar_name: stringify!($name),
                display_name: $display,
                class: OperandClass::$class,
            },)+)+
        ];
    };
}

def_operand_types! {
    Id {
        IdRef => "ID",
        IdResultType => "type ID",
        IdResult => "result ID",
        IdMemorySemantics => "memory semantics ID",
        IdScope => "scope ID",
    }
    Literal {
        LiteralInteger => "literal number",
        LiteralFloat => "literal float",
        LiteralExtInstInteger => "extended instruction number",
        LiteralSpecConstantOpInteger => "spec constant op number",
    }
    LiteralString {
        LiteralString => "literal string",
    }
    ValueEnum {
        SourceLanguage => "source language",
        ExecutionModel => "execution model",
        AddressingModel => "addressing model",
        MemoryModel => "memory model",
        ExecutionMode => "execution mode",
        StorageClass => "storage class",
        Dim => "dimensionality",
        SamplerAddressingMode => "sampler addressing mode",
        SamplerFilterMode => "sampler filter mode",
        ImageFormat => "image format",
        ImageChannelOrder => "image channel order",
        ImageChannelDataType => "image channel data type",
        FPRoundingMode => "floating-point rounding mode",
        LinkageType => "linkage type",
        AccessQualifier => "access qualifier",
        FunctionParameterAttribute => "function parameter attribute",
        Decoration => "decoration",
        BuiltIn => "built-in",
        GroupOperation => "group operation",
        KernelEnqueueFlags => "kernel enqueue flags",
        KernelProfilingInfo => "kernel profiling info",
        Capability => "capability",
    }
    Pair {
        PairLiteralIntegerIdRef => "literal number and ID pair",
        PairIdRefLiteralInteger => "ID and literal number pair",
        PairIdRefIdRef => "ID pair",
    }
    Mask {
        ImageOperands => "image",
        FPFastMathMode => "floating-point fast math mode",
        SelectionControl => "selection control",
        LoopControl => "loop control",
        FunctionControl => "function control",
        MemoryAccess => "memory access",
    }
}

impl OperandType {
    /// Not an operand, only used to signal the lack of one.
    pub const NONE: Self = Self(0);

    /// End of the enumeration (i.e. one past the last variable type).
    pub const NUM_OPERAND_TYPES: Self = Self(3 * BASE_COUNT + 1);

    /// Upper bound of the enumeration's storage, never an operand.
    pub const FORCE_32BIT: Self = Self(0x7fff_ffff);

    /// Check that `raw` is in `0..=NUM_OPERAND_TYPES`, or is `FORCE_32BIT`.
    pub fn from_raw(raw: u32) -> Result<Self, OutOfRangeType> {
        if raw <= Self::NUM_OPERAND_TYPES.0 || raw == Self::FORCE_32BIT.0 {
            Ok(Self(raw))
        } else {
            Err(OutOfRangeType(raw))
        }
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Return an iterator of every real operand type (concrete, optional and
    /// variable), excluding [`OperandType::NONE`] and the sentinels.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..Self::NUM_OPERAND_TYPES.0).map(Self)
    }

    /// Lookup a concrete type by the name used for it in grammar tables
    /// (which is also the name of its associated constant, e.g. `"IdRef"`).
    pub fn from_grammar_name(name: &str) -> Option<Self> {
        let idx = BASE_DEFS.iter().position(|def| def.grammar_name == name)?;
        Some(Self(idx as u32 + 1))
    }

    #[inline]
    fn in_range(self) -> bool {
        self.0 > Self::NONE.0 && self.0 < Self::NUM_OPERAND_TYPES.0
    }

    #[inline]
    pub fn is_concrete(self) -> bool {
        (1..=BASE_COUNT).contains(&self.0)
    }

    /// Optional types include the variable ones, as zero repeats is allowed.
    #[inline]
    pub fn is_optional(self) -> bool {
        self.in_range() && !self.is_concrete()
    }

    #[inline]
    pub fn is_variable(self) -> bool {
        (2 * BASE_COUNT + 1..=3 * BASE_COUNT).contains(&self.0)
    }

    /// Whether this is a concrete bitmask type (but not a wrapper around one).
    #[inline]
    pub fn is_concrete_mask(self) -> bool {
        self.concrete_def().is_some_and(|def| def.class == OperandClass::Mask)
    }

    /// Wrap a concrete type as an optional one.
    pub fn optional(self) -> Option<Self> {
        self.is_concrete().then(|| Self(self.0 + BASE_COUNT))
    }

    /// Make a variable type from a concrete one, or its optional form.
    pub fn variable(self) -> Option<Self> {
        if self.is_variable() {
            return None;
        }
        Some(Self(self.base()?.0 + 2 * BASE_COUNT))
    }

    /// Return the concrete type underlying any real operand type (or itself,
    /// for concrete types).
    pub fn base(self) -> Option<Self> {
        self.in_range().then(|| Self((self.0 - 1) % BASE_COUNT + 1))
    }

    /// Split a real operand type into its quantifier and concrete base type.
    pub fn mode_and_base(self) -> Option<(OperandMode, Self)> {
        let mode = if self.is_concrete() {
            OperandMode::Required
        } else if self.is_variable() {
            OperandMode::Variable
        } else if self.is_optional() {
            OperandMode::Optional
        } else {
            return None;
        };
        Some((mode, self.base()?))
    }

    fn concrete_def(self) -> Option<&'static BaseDef> {
        if self.is_concrete() {
            BASE_DEFS.get((self.0 - 1) as usize)
        } else {
            None
        }
    }

    /// Human-readable name, shared by concrete types and their optional forms.
    ///
    /// Variable types, [`OperandType::NONE`] and the sentinels have no name
    /// of their own, and return `"unknown"` instead.
    pub fn display_name(self) -> &'static str {
        if self.is_variable() {
            return "unknown";
        }
        self.base().and_then(Self::concrete_def).map_or("unknown", |def| def.display_name)
    }

    /// Name used in grammar tables, only for concrete types.
    pub fn grammar_name(self) -> Option<&'static str> {
        Some(self.concrete_def()?.grammar_name)
    }

    pub fn class(self) -> Option<OperandClass> {
        Some(self.base().and_then(Self::concrete_def)?.class)
    }

    pub fn word_shape(self) -> Option<WordShape> {
        Some(match self.class()? {
            OperandClass::LiteralString => WordShape::NulTerminated,
            OperandClass::Pair => WordShape::Fixed(2),
            OperandClass::Id
            | OperandClass::Literal
            | OperandClass::ValueEnum
            | OperandClass::Mask => WordShape::Fixed(1),
        })
    }

    /// For pair types, the single-word types of their two halves.
    pub fn pair_parts(self) -> Option<[Self; 2]> {
        match self {
            Self::PairLiteralIntegerIdRef => Some([Self::LiteralInteger, Self::IdRef]),
            Self::PairIdRefLiteralInteger => Some([Self::IdRef, Self::LiteralInteger]),
            Self::PairIdRefIdRef => Some([Self::IdRef, Self::IdRef]),
            _ => None,
        }
    }
}

impl fmt::Debug for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base_name = self.base().and_then(Self::grammar_name);
        match (self.mode_and_base(), base_name) {
            (Some((OperandMode::Required, _)), Some(name)) => write!(f, "{name}"),
            (Some((OperandMode::Optional, _)), Some(name)) => write!(f, "Optional({name})"),
            (Some((OperandMode::Variable, _)), Some(name)) => write!(f, "Variable({name})"),
            _ => match *self {
                Self::NONE => f.write_str("None"),
                Self::NUM_OPERAND_TYPES => f.write_str("NumOperandTypes"),
                Self::FORCE_32BIT => f.write_str("Force32Bit"),
                _ => write!(f, "OperandType({})", self.0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASKS: [OperandType; 6] = [
        OperandType::ImageOperands,
        OperandType::FPFastMathMode,
        OperandType::SelectionControl,
        OperandType::LoopControl,
        OperandType::FunctionControl,
        OperandType::MemoryAccess,
    ];

    const SENTINELS: [OperandType; 3] =
        [OperandType::NONE, OperandType::NUM_OPERAND_TYPES, OperandType::FORCE_32BIT];

    #[test]
    fn none_is_zero() {
        assert_eq!(OperandType::NONE.as_raw(), 0);
        assert_eq!(OperandType::all().next(), OperandType::from_raw(1).ok());
    }

    #[test]
    fn all_are_named_except_variable() {
        for ty in OperandType::all() {
            if ty.is_variable() {
                assert_eq!(ty.display_name(), "unknown", "variable type {ty:?} has a name");
            } else {
                assert_ne!(ty.display_name(), "unknown", "operand type {ty:?} has no name");
            }
        }
    }

    #[test]
    fn sentinels_are_unnamed_and_unclassified() {
        for ty in SENTINELS {
            assert_eq!(ty.display_name(), "unknown");
            assert!(!ty.is_concrete(), "{ty:?}");
            assert!(!ty.is_optional(), "{ty:?}");
            assert!(!ty.is_variable(), "{ty:?}");
            assert!(!ty.is_concrete_mask(), "{ty:?}");
            assert_eq!(ty.base(), None);
            assert_eq!(ty.mode_and_base(), None);
        }
    }

    #[test]
    fn each_type_is_either_concrete_or_optional_not_both() {
        for ty in OperandType::all() {
            assert_ne!(
                ty.is_concrete(),
                ty.is_optional(),
                "operand type {} concrete? {} optional? {}",
                ty.as_raw(),
                ty.is_concrete(),
                ty.is_optional(),
            );
        }
    }

    #[test]
    fn each_variable_type_is_optional() {
        for ty in OperandType::all().filter(|ty| ty.is_variable()) {
            assert!(ty.is_optional(), "variable type {ty:?}");
        }
    }

    #[test]
    fn concrete_mask_sample() {
        for ty in [
            OperandType::NONE,
            OperandType::IdRef,
            OperandType::LiteralInteger,
            OperandType::Capability,
        ] {
            assert!(!ty.is_concrete_mask(), "{ty:?}");
        }
        for ty in MASKS {
            assert!(ty.is_concrete_mask(), "{ty:?}");
        }
        for ty in [
            OperandType::IdRef.optional().unwrap(),
            OperandType::ImageOperands.optional().unwrap(),
            OperandType::MemoryAccess.optional().unwrap(),
        ] {
            assert!(!ty.is_concrete_mask(), "{ty:?}");
        }
    }

    #[test]
    fn concrete_masks_are_exactly_the_mask_types() {
        let masks: Vec<_> = OperandType::all().filter(|ty| ty.is_concrete_mask()).collect();
        let mut expected = MASKS.to_vec();
        expected.sort();
        assert_eq!(masks, expected);

        for ty in MASKS {
            assert!(!ty.optional().unwrap().is_concrete_mask());
            assert!(!ty.variable().unwrap().is_concrete_mask());
        }
    }

    #[test]
    fn wrappers_roundtrip_through_base() {
        for ty in OperandType::all().filter(|ty| ty.is_concrete()) {
            let opt = ty.optional().unwrap();
            let var = ty.variable().unwrap();
            assert!(opt.is_optional() && !opt.is_variable());
            assert!(var.is_variable());
            assert_eq!(opt.base(), Some(ty));
            assert_eq!(var.base(), Some(ty));
            assert_eq!(opt.variable(), Some(var));
            assert_eq!(opt.display_name(), ty.display_name());
            assert_eq!(opt.optional(), None);
            assert_eq!(var.variable(), None);
        }
    }

    #[test]
    fn from_raw_rejects_out_of_range() {
        let num = OperandType::NUM_OPERAND_TYPES.as_raw();
        assert_eq!(OperandType::from_raw(num), Ok(OperandType::NUM_OPERAND_TYPES));
        assert_eq!(OperandType::from_raw(num + 1), Err(OutOfRangeType(num + 1)));
        assert_eq!(OperandType::from_raw(0x7fff_ffff), Ok(OperandType::FORCE_32BIT));
        assert_eq!(OperandType::from_raw(u32::MAX), Err(OutOfRangeType(u32::MAX)));
    }

    #[test]
    fn grammar_names() {
        assert_eq!(OperandType::from_grammar_name("MemoryAccess"), Some(OperandType::MemoryAccess));
        assert_eq!(OperandType::from_grammar_name("IdRef"), Some(OperandType::IdRef));
        assert_eq!(OperandType::from_grammar_name("NotAKind"), None);
        for ty in OperandType::all().filter(|ty| ty.is_concrete()) {
            assert_eq!(OperandType::from_grammar_name(ty.grammar_name().unwrap()), Some(ty));
        }
        assert_eq!(OperandType::MemoryAccess.optional().unwrap().grammar_name(), None);
    }

    #[test]
    fn word_shapes() {
        assert_eq!(OperandType::IdRef.word_shape(), Some(WordShape::Fixed(1)));
        assert_eq!(OperandType::MemoryAccess.word_shape(), Some(WordShape::Fixed(1)));
        assert_eq!(OperandType::PairIdRefIdRef.word_shape(), Some(WordShape::Fixed(2)));
        assert_eq!(OperandType::LiteralString.word_shape(), Some(WordShape::NulTerminated));
        assert_eq!(OperandType::NONE.word_shape(), None);
    }

    #[test]
    fn debug_names_wrappers() {
        let opt = OperandType::LiteralInteger.optional().unwrap();
        assert_eq!(format!("{opt:?}"), "Optional(LiteralInteger)");
        assert_eq!(format!("{:?}", opt.variable().unwrap()), "Variable(LiteralInteger)");
        assert_eq!(format!("{:?}", OperandType::FORCE_32BIT), "Force32Bit");
    }
}
