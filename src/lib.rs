//! SPIR-V operand grammar: classification of operand types, and the
//! layout-driven decoding/encoding of instruction words it enables.
//!
//! The main entry points are:
//! * [`spv::OperandType`] and its classification methods (e.g.
//!   [`is_optional`](spv::OperandType::is_optional))
//! * [`spv::read::decode_operands`] and [`spv::write::encode_inst`], for one
//!   instruction at a time, given its [`spv::layout::InstructionLayout`]
//! * [`spv::read::ModuleParser`] and [`spv::write::ModuleEmitter`], for whole
//!   SPIR-V modules (using the core grammar bundled as [`spv::spec::Spec`])

pub mod spv;
