//! APX VM runtime: bytecode codec, program compiler, deserializer and file map.

pub mod bytecode;
pub mod compiler;
pub mod deserializer;
pub mod error;
pub mod file_map;
pub mod limits;
pub mod node;
pub mod program;
pub mod value;

pub use compiler::{compile_provide_program, compile_require_program, CompileError, Compiler};
pub use deserializer::{Deserializer, DynLen, VmError};
pub use error::{ApxError, ErrorKind};
pub use file_map::{File, FileId, FileInfo, FileMap, FileMapError, FileType};
pub use limits::DeserializerLimits;
pub use node::{BaseType, DataElement, Node, Port};
pub use program::{Program, ProgramType};
pub use value::{ScalarValue, Value};
