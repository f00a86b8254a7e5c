//! Instruction encoding for the APX virtual machine.
//!
//! Every instruction is a single byte carrying three bit fields: a 3-bit opcode in
//! the low bits, a 4-bit variant above it and a single flag bit on top.  The raw
//! [`encode_instruction`]/[`decode_instruction`] pair works on plain integers and
//! truncates out-of-range fields by masking, which is what remote peers expect on
//! the wire.  [`Instruction`] layers typed opcodes and variants on top for the
//! compiler and the program decoder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INST_OPCODE_MASK: u8 = 0x07;
pub const INST_VARIANT_SHIFT: u8 = 3;
pub const INST_VARIANT_MASK: u8 = 0x0F;
pub const INST_FLAG_SHIFT: u8 = 7;
pub const INST_FLAG_MASK: u8 = 0x01;

pub const OPCODE_UNPACK: u8 = 0;
pub const OPCODE_PACK: u8 = 1;
pub const OPCODE_ARRAY: u8 = 2;

pub const VARIANT_U8: u8 = 0;
pub const VARIANT_U16: u8 = 1;
pub const VARIANT_U32: u8 = 2;
pub const VARIANT_U64: u8 = 3;
pub const VARIANT_S8: u8 = 4;
pub const VARIANT_S16: u8 = 5;
pub const VARIANT_S32: u8 = 6;
pub const VARIANT_S64: u8 = 7;
pub const VARIANT_RECORD: u8 = 8;
pub const VARIANT_BOOL: u8 = 10;
pub const VARIANT_BYTES: u8 = 11;
pub const VARIANT_STR: u8 = 12;

/// Set on PACK/UNPACK when the element is an array (an ARRAY instruction follows).
pub const ARRAY_FLAG: u8 = 1;
/// Set on ARRAY when the element count travels in the data stream.
pub const DYN_ARRAY_FLAG: u8 = 1;

/// Pack the three instruction fields into one byte.
///
/// Values wider than their field are truncated by masking rather than rejected.
pub fn encode_instruction(opcode: u8, variant: u8, flags: u8) -> u8 {
    let mut result =
        (opcode & INST_OPCODE_MASK) | ((variant & INST_VARIANT_MASK) << INST_VARIANT_SHIFT);
    if flags != 0 {
        result |= (flags & INST_FLAG_MASK) << INST_FLAG_SHIFT;
    }
    result
}

/// Split an instruction byte into `(opcode, variant, flags)`.
pub fn decode_instruction(instruction: u8) -> (u8, u8, u8) {
    let opcode = instruction & INST_OPCODE_MASK;
    let variant = (instruction >> INST_VARIANT_SHIFT) & INST_VARIANT_MASK;
    let flags = (instruction >> INST_FLAG_SHIFT) & INST_FLAG_MASK;
    (opcode, variant, flags)
}

/// Operation selected by the low three bits of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Read an element from port data.
    Unpack,
    /// Write an element into port data.
    Pack,
    /// Repeat the preceding element; the variant is the width of the length field.
    Array,
}

impl Opcode {
    pub fn bits(self) -> u8 {
        match self {
            Opcode::Unpack => OPCODE_UNPACK,
            Opcode::Pack => OPCODE_PACK,
            Opcode::Array => OPCODE_ARRAY,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            OPCODE_UNPACK => Some(Opcode::Unpack),
            OPCODE_PACK => Some(Opcode::Pack),
            OPCODE_ARRAY => Some(Opcode::Array),
            _ => None,
        }
    }
}

/// Primitive kind and width carried in the variant field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    Record,
    Bool,
    Bytes,
    Str,
}

impl Variant {
    pub fn bits(self) -> u8 {
        match self {
            Variant::U8 => VARIANT_U8,
            Variant::U16 => VARIANT_U16,
            Variant::U32 => VARIANT_U32,
            Variant::U64 => VARIANT_U64,
            Variant::S8 => VARIANT_S8,
            Variant::S16 => VARIANT_S16,
            Variant::S32 => VARIANT_S32,
            Variant::S64 => VARIANT_S64,
            Variant::Record => VARIANT_RECORD,
            Variant::Bool => VARIANT_BOOL,
            Variant::Bytes => VARIANT_BYTES,
            Variant::Str => VARIANT_STR,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            VARIANT_U8 => Variant::U8,
            VARIANT_U16 => Variant::U16,
            VARIANT_U32 => Variant::U32,
            VARIANT_U64 => Variant::U64,
            VARIANT_S8 => Variant::S8,
            VARIANT_S16 => Variant::S16,
            VARIANT_S32 => Variant::S32,
            VARIANT_S64 => Variant::S64,
            VARIANT_RECORD => Variant::Record,
            VARIANT_BOOL => Variant::Bool,
            VARIANT_BYTES => Variant::Bytes,
            VARIANT_STR => Variant::Str,
            _ => return None,
        })
    }

    /// Size in bytes of one packed element, `None` for records.
    pub fn element_size(self) -> Option<u32> {
        match self {
            Variant::U8 | Variant::S8 | Variant::Bool | Variant::Bytes | Variant::Str => Some(1),
            Variant::U16 | Variant::S16 => Some(2),
            Variant::U32 | Variant::S32 => Some(4),
            Variant::U64 | Variant::S64 => Some(8),
            Variant::Record => None,
        }
    }
}

/// Typed view of a single instruction byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub variant: Variant,
    pub flag: bool,
}

impl Instruction {
    pub fn new(opcode: Opcode, variant: Variant, flag: bool) -> Self {
        Self {
            opcode,
            variant,
            flag,
        }
    }

    pub fn encode(self) -> u8 {
        encode_instruction(self.opcode.bits(), self.variant.bits(), u8::from(self.flag))
    }

    /// Decode a byte, rejecting opcodes and variants that have no assignment.
    pub fn decode(byte: u8) -> Result<Self, DecodeError> {
        let (opcode, variant, flags) = decode_instruction(byte);
        let opcode = Opcode::from_bits(opcode).ok_or(DecodeError::UnknownOpcode(opcode))?;
        let variant = Variant::from_bits(variant).ok_or(DecodeError::UnknownVariant(variant))?;
        Ok(Self::new(opcode, variant, flags != 0))
    }
}

/// Errors raised while decoding instruction bytes or program images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("unknown variant {0}")]
    UnknownVariant(u8),
    #[error("program is {0} bytes, shorter than its header")]
    TruncatedHeader(usize),
    #[error("unsupported program version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown program type {0}")]
    UnknownProgramType(u8),
    #[error("instruction stream ended unexpectedly at offset {0}")]
    UnexpectedEnd(usize),
    #[error("unexpected {found:?} instruction at offset {offset}")]
    UnexpectedInstruction { offset: usize, found: Opcode },
    #[error("invalid array length width {0:?}")]
    InvalidLengthWidth(Variant),
}
