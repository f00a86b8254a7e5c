//! Compilation of port signatures into pack/unpack programs.
//!
//! A port program is a 7-byte header followed by a single element description.
//! The compiler writes into a caller-owned [`Program`] that it borrows for the
//! duration of a compile; element bytes are staged locally and appended only once
//! the whole element has been validated, so a failed compile never leaves a
//! half-written instruction behind.

use thiserror::Error;
use tracing::{debug, trace};

use crate::bytecode::{DecodeError, Instruction, Opcode};
use crate::error::ErrorKind;
use crate::node::{BaseType, DataElement, Node, Port};
use crate::program::{LengthWidth, Program, ProgramType};

/// Result alias for compilation stages.
pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("port index {port_id} out of range ({count} ports)")]
    PortIndex { port_id: usize, count: usize },
    #[error("no program attached to the compiler")]
    MissingBuffer,
    #[error("base type {0:?} cannot be compiled")]
    ElementType(BaseType),
    #[error("array length {0} does not fit any length class")]
    Length(u32),
    #[error("minimum data size overflows 32 bits")]
    DataSizeOverflow,
    #[error(transparent)]
    Header(#[from] DecodeError),
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::PortIndex { .. } => ErrorKind::InvalidArgument,
            CompileError::MissingBuffer => ErrorKind::MissingBuffer,
            CompileError::ElementType(_) => ErrorKind::ElementType,
            CompileError::Length(_) | CompileError::DataSizeOverflow => ErrorKind::Length,
            CompileError::Header(err) => err.kind(),
        }
    }
}

/// Stateful element compiler bound to one target program at a time.
#[derive(Debug, Default)]
pub struct Compiler<'a> {
    program: Option<&'a mut Program>,
    min_data_size: u32,
}

impl<'a> Compiler<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the buffer subsequent element compiles append to.
    pub fn set_program(&mut self, program: &'a mut Program) {
        self.program = Some(program);
    }

    /// Bytes of port data the compiled elements require at minimum.
    pub fn min_data_size(&self) -> u32 {
        self.min_data_size
    }

    pub fn reset(&mut self) {
        self.min_data_size = 0;
    }

    pub fn compile_pack_element(&mut self, element: &DataElement) -> CompileResult<()> {
        self.compile_element(Opcode::Pack, element)
    }

    pub fn compile_unpack_element(&mut self, element: &DataElement) -> CompileResult<()> {
        self.compile_element(Opcode::Unpack, element)
    }

    /// Compile provide port `port_id` of `node` into a complete PACK program.
    pub fn compile_provide_port(
        &mut self,
        node: &Node,
        port_id: usize,
        program: &'a mut Program,
    ) -> CompileResult<()> {
        self.set_program(program);
        let port = node.provide_port(port_id).ok_or(CompileError::PortIndex {
            port_id,
            count: node.num_provide_ports(),
        })?;
        self.compile_port(port, ProgramType::Pack)
    }

    /// Compile require port `port_id` of `node` into a complete UNPACK program.
    pub fn compile_require_port(
        &mut self,
        node: &Node,
        port_id: usize,
        program: &'a mut Program,
    ) -> CompileResult<()> {
        self.set_program(program);
        let port = node.require_port(port_id).ok_or(CompileError::PortIndex {
            port_id,
            count: node.num_require_ports(),
        })?;
        self.compile_port(port, ProgramType::Unpack)
    }

    /// Header plus element; the data size accumulated for this port is written back
    /// into the header.  On failure the attached program is restored to its
    /// previous length.
    fn compile_port(&mut self, port: &Port, program_type: ProgramType) -> CompileResult<()> {
        let program = self.program.as_deref_mut().ok_or(CompileError::MissingBuffer)?;
        let header_offset = program.len();
        program.append_placeholder_header(program_type);
        self.reset();

        let result = self.compile_element(program_type.element_opcode(), &port.element);
        let data_size = self.min_data_size;
        let program = self.program.as_deref_mut().ok_or(CompileError::MissingBuffer)?;
        let result = result.and_then(|()| {
            program
                .patch_data_size(header_offset, data_size)
                .map_err(CompileError::from)
        });
        match result {
            Ok(()) => {
                debug!(
                    port = %port.name,
                    ?program_type,
                    length = program.len() - header_offset,
                    data_size,
                    "compiled port program"
                );
                Ok(())
            }
            Err(err) => {
                program.truncate(header_offset);
                debug!(port = %port.name, ?program_type, error = %err, "port compile failed");
                Err(err)
            }
        }
    }

    fn compile_element(&mut self, opcode: Opcode, element: &DataElement) -> CompileResult<()> {
        let Some(program) = self.program.as_deref_mut() else {
            return Err(CompileError::MissingBuffer);
        };
        let variant = element
            .base_type
            .variant()
            .ok_or(CompileError::ElementType(element.base_type))?;
        let element_size = variant
            .element_size()
            .ok_or(CompileError::ElementType(element.base_type))?;

        let mut staged = Vec::with_capacity(6);
        let added = if element.is_array() {
            let len = element.array_len;
            let width = LengthWidth::for_len(len).ok_or(CompileError::Length(len))?;
            staged.push(Instruction::new(opcode, variant, true).encode());
            staged.push(Instruction::new(Opcode::Array, width.variant(), element.dynamic_array).encode());
            if element.dynamic_array {
                0
            } else {
                width.write_le(&mut staged, len);
                element_size
                    .checked_mul(len)
                    .ok_or(CompileError::DataSizeOverflow)?
            }
        } else {
            staged.push(Instruction::new(opcode, variant, false).encode());
            element_size
        };
        let min_data_size = self
            .min_data_size
            .checked_add(added)
            .ok_or(CompileError::DataSizeOverflow)?;

        program.extend_from_slice(&staged);
        self.min_data_size = min_data_size;
        trace!(?opcode, ?variant, bytes = staged.len(), min_data_size, "element compiled");
        Ok(())
    }
}

/// Convenience helper returning a standalone PACK program for `element`.
pub fn compile_provide_program(element: &DataElement) -> CompileResult<Program> {
    compile_program(element, ProgramType::Pack)
}

/// Convenience helper returning a standalone UNPACK program for `element`.
pub fn compile_require_program(element: &DataElement) -> CompileResult<Program> {
    compile_program(element, ProgramType::Unpack)
}

fn compile_program(element: &DataElement, program_type: ProgramType) -> CompileResult<Program> {
    let mut program = Program::new();
    let port = Port::new(String::new(), *element);
    let mut compiler = Compiler::new();
    compiler.set_program(&mut program);
    compiler.compile_port(&port, program_type)?;
    Ok(program)
}
