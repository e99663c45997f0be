//! Bitmask operands, and the extra operands implied by their set bits.

use crate::spv::operand::OperandType;
use crate::spv::spec::Spec;
use arrayvec::ArrayVec;
use std::iter;

/// Index of one bit of a 32-bit mask word, always in `0..32`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitIdx(u8);

impl BitIdx {
    pub fn index(self) -> u8 {
        self.0
    }

    /// Returns `Some(BitIdx(i))` if and only if `x == (1 << i)`.
    pub fn of_single_set_bit(x: u32) -> Option<Self> {
        if x.is_power_of_two() { Some(Self(x.trailing_zeros() as u8)) } else { None }
    }

    /// Returns an iterator of [`BitIdx`]s, from which `x` can be reconstructed
    /// by OR-ing together `1 << i` for every `BitIdx(i)`.
    ///
    /// The iterator is ordered: lower bit indices appear before higher ones.
    pub fn of_all_set_bits(mut x: u32) -> impl Iterator<Item = Self> {
        let mut consumed_bits = 0;
        iter::from_fn(move || {
            if x == 0 {
                None
            } else {
                let tz = x.trailing_zeros() as u8;
                let idx = Self(consumed_bits + tz);

                // Consume a sequence of bits `100...00`, where `tz` is just the
                // count of zeros, so `tz + 1` is the whole sequence's length.
                // (`checked_shr` because shifting a `u32` by `32` overflows)
                x = x.checked_shr(u32::from(tz) + 1).unwrap_or(0);
                consumed_bits += tz + 1;

                Some(idx)
            }
        })
    }

    pub fn to_mask(self) -> u32 {
        1 << self.0
    }
}

/// One named bit of a mask type, and the operands it implies when set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskBitDef {
    pub name: &'static str,

    /// Operands following the mask word (after those of any lower set bits).
    pub params: ArrayVec<OperandType, 3>,
}

/// All the named bits of one mask type.
#[derive(Clone, Debug)]
pub struct MaskDef {
    /// Canonical name for the mask word `0` (usually `"None"`).
    pub empty_name: &'static str,

    bits: [Option<MaskBitDef>; 32],
}

impl MaskDef {
    pub fn new(empty_name: &'static str) -> Self {
        Self { empty_name, bits: Default::default() }
    }

    /// Define `bit_idx`, returning its previous definition (if any).
    pub fn insert(&mut self, bit_idx: BitIdx, def: MaskBitDef) -> Option<MaskBitDef> {
        self.bits[usize::from(bit_idx.0)].replace(def)
    }

    pub fn bit(&self, bit_idx: BitIdx) -> Option<&MaskBitDef> {
        self.bits.get(usize::from(bit_idx.0))?.as_ref()
    }

    /// Return the operand types implied by `word`-as-this-mask, with all the
    /// operands of lower set bits appearing before those of higher ones.
    ///
    /// Set bits without a definition are allowed, and imply no operands.
    pub fn implied_operands(&self, word: u32) -> impl Iterator<Item = OperandType> + '_ {
        BitIdx::of_all_set_bits(word)
            .filter_map(|bit_idx| self.bit(bit_idx))
            .flat_map(|bit_def| bit_def.params.iter().copied())
    }

    /// The subset of the set bits of `word` that this mask has no name for.
    pub fn unnamed_bits(&self, word: u32) -> u32 {
        BitIdx::of_all_set_bits(word)
            .filter(|&bit_idx| self.bit(bit_idx).is_none())
            .fold(0, |x, bit_idx| x | bit_idx.to_mask())
    }
}

/// Like [`MaskDef::implied_operands`], but using the definition of `mask`
/// from the lazily-loaded [`Spec`] (and implying nothing for non-masks).
pub fn implied_operands(mask: OperandType, word: u32) -> impl Iterator<Item = OperandType> {
    let implied = Spec::get()
        .mask_def(mask)
        .into_iter()
        .flat_map(move |mask_def| mask_def.implied_operands(word));
    implied.inspect(move |&ty| log::trace!("{mask:?} 0x{word:08x} implies {ty:?}"))
}
