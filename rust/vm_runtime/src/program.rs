//! Program images: header layout, array length size classes and decoding.
//!
//! A program starts with a fixed 7-byte header (VM version, program type and the
//! minimum data size) followed by the instruction stream.  Arrayed elements carry an
//! ARRAY instruction whose variant selects the width of the length field; fixed-size
//! arrays append the length itself in exactly that many little-endian bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytecode::{DecodeError, Instruction, Opcode, Variant};

pub const VM_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 7;

const HEADER_TYPE_OFFSET: usize = 2;
const HEADER_DATA_SIZE_OFFSET: usize = 3;

pub const PROGRAM_TYPE_UNPACK: u8 = 0;
pub const PROGRAM_TYPE_PACK: u8 = 1;

/// Direction of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramType {
    Unpack,
    Pack,
}

impl ProgramType {
    pub fn bits(self) -> u8 {
        match self {
            ProgramType::Unpack => PROGRAM_TYPE_UNPACK,
            ProgramType::Pack => PROGRAM_TYPE_PACK,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            PROGRAM_TYPE_UNPACK => Some(ProgramType::Unpack),
            PROGRAM_TYPE_PACK => Some(ProgramType::Pack),
            _ => None,
        }
    }

    /// Element opcode used inside a program of this type.
    pub fn element_opcode(self) -> Opcode {
        match self {
            ProgramType::Unpack => Opcode::Unpack,
            ProgramType::Pack => Opcode::Pack,
        }
    }
}

/// Parsed program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramHeader {
    pub version: u16,
    pub program_type: ProgramType,
    pub data_size: u32,
}

impl ProgramHeader {
    pub fn new(program_type: ProgramType) -> Self {
        Self {
            version: VM_VERSION,
            program_type,
            data_size: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..HEADER_TYPE_OFFSET].copy_from_slice(&self.version.to_le_bytes());
        bytes[HEADER_TYPE_OFFSET] = self.program_type.bits();
        bytes[HEADER_DATA_SIZE_OFFSET..].copy_from_slice(&self.data_size.to_le_bytes());
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = bytes
            .get(..HEADER_SIZE)
            .ok_or(DecodeError::TruncatedHeader(bytes.len()))?;
        let version = u16::from_le_bytes([header[0], header[1]]);
        if version != VM_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let type_bits = header[HEADER_TYPE_OFFSET];
        let program_type =
            ProgramType::from_bits(type_bits).ok_or(DecodeError::UnknownProgramType(type_bits))?;
        let data_size = u32::from_le_bytes([header[3], header[4], header[5], header[6]]);
        Ok(Self {
            version,
            program_type,
            data_size,
        })
    }
}

/// Growable, append-only program buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    code: Vec<u8>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.code
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.code
    }

    pub fn push(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Append a header with a zero data size; see [`Program::patch_data_size`].
    pub fn append_placeholder_header(&mut self, program_type: ProgramType) {
        self.code
            .extend_from_slice(&ProgramHeader::new(program_type).to_bytes());
    }

    /// Overwrite the data size of the header starting at `header_offset`.
    pub fn patch_data_size(
        &mut self,
        header_offset: usize,
        data_size: u32,
    ) -> Result<(), DecodeError> {
        let available = self.code.len().saturating_sub(header_offset);
        let start = header_offset + HEADER_DATA_SIZE_OFFSET;
        let slot = self
            .code
            .get_mut(start..header_offset + HEADER_SIZE)
            .ok_or(DecodeError::TruncatedHeader(available))?;
        slot.copy_from_slice(&data_size.to_le_bytes());
        Ok(())
    }

    pub fn header(&self) -> Result<ProgramHeader, DecodeError> {
        ProgramHeader::parse(&self.code)
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.code.truncate(len);
    }
}

impl From<Vec<u8>> for Program {
    fn from(code: Vec<u8>) -> Self {
        Self { code }
    }
}

impl AsRef<[u8]> for Program {
    fn as_ref(&self) -> &[u8] {
        &self.code
    }
}

/// Width of an array length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LengthWidth {
    U8,
    U16,
    U32,
}

impl LengthWidth {
    /// Smallest width whose range holds `len`; each class excludes its maximum value.
    pub fn for_len(len: u32) -> Option<Self> {
        if len < u32::from(u8::MAX) {
            Some(LengthWidth::U8)
        } else if len < u32::from(u16::MAX) {
            Some(LengthWidth::U16)
        } else if len < u32::MAX {
            Some(LengthWidth::U32)
        } else {
            None
        }
    }

    pub fn from_variant(variant: Variant) -> Option<Self> {
        match variant {
            Variant::U8 => Some(LengthWidth::U8),
            Variant::U16 => Some(LengthWidth::U16),
            Variant::U32 => Some(LengthWidth::U32),
            _ => None,
        }
    }

    pub fn variant(self) -> Variant {
        match self {
            LengthWidth::U8 => Variant::U8,
            LengthWidth::U16 => Variant::U16,
            LengthWidth::U32 => Variant::U32,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            LengthWidth::U8 => 1,
            LengthWidth::U16 => 2,
            LengthWidth::U32 => 4,
        }
    }

    /// Largest length this width can carry.
    pub fn max_len(self) -> u32 {
        match self {
            LengthWidth::U8 => u32::from(u8::MAX),
            LengthWidth::U16 => u32::from(u16::MAX),
            LengthWidth::U32 => u32::MAX,
        }
    }

    /// Append `len` little-endian using exactly [`Self::bytes`] bytes.
    pub fn write_le(self, out: &mut Vec<u8>, len: u32) {
        out.extend_from_slice(&len.to_le_bytes()[..self.bytes()]);
    }

    /// Read a length from the first [`Self::bytes`] bytes of `bytes`.
    pub fn read_le(self, bytes: &[u8]) -> Option<u32> {
        let field = bytes.get(..self.bytes())?;
        let mut raw = [0u8; 4];
        raw[..field.len()].copy_from_slice(field);
        Some(u32::from_le_bytes(raw))
    }
}

/// Array part of a decoded element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub width: LengthWidth,
    pub dynamic: bool,
    /// Literal length of a fixed-size array; `None` when dynamic.
    pub length: Option<u32>,
}

/// One element description recovered from an instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementOp {
    pub offset: usize,
    pub opcode: Opcode,
    pub variant: Variant,
    pub array: Option<ArrayDescriptor>,
}

impl fmt::Display for ElementOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}: {:?} {:?}", self.offset, self.opcode, self.variant)?;
        match self.array {
            Some(ArrayDescriptor {
                length: Some(length),
                ..
            }) => write!(f, "[{length}]"),
            Some(ArrayDescriptor { width, .. }) => write!(f, "[*{:?}]", width),
            None => Ok(()),
        }
    }
}

/// Header plus element list of a full program image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedProgram {
    pub header: ProgramHeader,
    pub elements: Vec<ElementOp>,
}

pub fn decode_program(bytes: &[u8]) -> Result<DecodedProgram, DecodeError> {
    let header = ProgramHeader::parse(bytes)?;
    let elements = decode_instructions(&bytes[HEADER_SIZE..], HEADER_SIZE)?;
    Ok(DecodedProgram { header, elements })
}

/// Decode a header-less instruction stream; `base_offset` is added to reported offsets.
pub fn decode_instructions(code: &[u8], base_offset: usize) -> Result<Vec<ElementOp>, DecodeError> {
    let mut elements = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let element_offset = base_offset + offset;
        let instruction = Instruction::decode(code[offset])?;
        if instruction.opcode == Opcode::Array {
            return Err(DecodeError::UnexpectedInstruction {
                offset: element_offset,
                found: Opcode::Array,
            });
        }
        offset += 1;
        let array = if instruction.flag {
            let byte = *code
                .get(offset)
                .ok_or(DecodeError::UnexpectedEnd(base_offset + offset))?;
            let array_instruction = Instruction::decode(byte)?;
            if array_instruction.opcode != Opcode::Array {
                return Err(DecodeError::UnexpectedInstruction {
                    offset: base_offset + offset,
                    found: array_instruction.opcode,
                });
            }
            let width = LengthWidth::from_variant(array_instruction.variant)
                .ok_or(DecodeError::InvalidLengthWidth(array_instruction.variant))?;
            offset += 1;
            let length = if array_instruction.flag {
                None
            } else {
                let length = width
                    .read_le(&code[offset..])
                    .ok_or(DecodeError::UnexpectedEnd(base_offset + offset))?;
                offset += width.bytes();
                Some(length)
            };
            Some(ArrayDescriptor {
                width,
                dynamic: array_instruction.flag,
                length,
            })
        } else {
            None
        };
        elements.push(ElementOp {
            offset: element_offset,
            opcode: instruction.opcode,
            variant: instruction.variant,
            array,
        });
    }
    Ok(elements)
}
