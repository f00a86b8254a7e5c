//! Signature data model consumed by the compiler.
//!
//! Nodes are normally produced by the APX text parser, which lives outside this
//! crate.  The structures here carry only what compilation needs: the base type of
//! each port's data element and its array shape.

use serde::{Deserialize, Serialize};

use crate::bytecode::Variant;

/// Primitive type of a data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BaseType {
    #[default]
    None,
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    Bool,
    Bytes,
    Str,
    Record,
}

impl BaseType {
    /// Instruction variant for element types the compiler can emit.
    pub fn variant(self) -> Option<Variant> {
        match self {
            BaseType::U8 => Some(Variant::U8),
            BaseType::U16 => Some(Variant::U16),
            BaseType::U32 => Some(Variant::U32),
            BaseType::U64 => Some(Variant::U64),
            BaseType::S8 => Some(Variant::S8),
            BaseType::S16 => Some(Variant::S16),
            BaseType::S32 => Some(Variant::S32),
            BaseType::S64 => Some(Variant::S64),
            BaseType::Bool => Some(Variant::Bool),
            BaseType::Bytes => Some(Variant::Bytes),
            BaseType::Str => Some(Variant::Str),
            BaseType::None | BaseType::Record => None,
        }
    }
}

/// Type signature of a port's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataElement {
    pub base_type: BaseType,
    /// Zero for scalars.
    #[serde(default)]
    pub array_len: u32,
    #[serde(default)]
    pub dynamic_array: bool,
}

impl DataElement {
    pub fn scalar(base_type: BaseType) -> Self {
        Self {
            base_type,
            array_len: 0,
            dynamic_array: false,
        }
    }

    pub fn array(base_type: BaseType, array_len: u32) -> Self {
        Self {
            base_type,
            array_len,
            dynamic_array: false,
        }
    }

    /// Array whose actual length is carried in the data, bounded by `max_len`.
    pub fn dynamic_array(base_type: BaseType, max_len: u32) -> Self {
        Self {
            base_type,
            array_len: max_len,
            dynamic_array: true,
        }
    }

    pub fn is_array(&self) -> bool {
        self.array_len > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub element: DataElement,
}

impl Port {
    pub fn new(name: impl Into<String>, element: DataElement) -> Self {
        Self {
            name: name.into(),
            element,
        }
    }
}

/// A named collection of provide (output) and require (input) ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub provide_ports: Vec<Port>,
    #[serde(default)]
    pub require_ports: Vec<Port>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provide_ports: Vec::new(),
            require_ports: Vec::new(),
        }
    }

    pub fn with_provide_port(mut self, port: Port) -> Self {
        self.provide_ports.push(port);
        self
    }

    pub fn with_require_port(mut self, port: Port) -> Self {
        self.require_ports.push(port);
        self
    }

    pub fn provide_port(&self, port_id: usize) -> Option<&Port> {
        self.provide_ports.get(port_id)
    }

    pub fn require_port(&self, port_id: usize) -> Option<&Port> {
        self.require_ports.get(port_id)
    }

    pub fn num_provide_ports(&self) -> usize {
        self.provide_ports.len()
    }

    pub fn num_require_ports(&self) -> usize {
        self.require_ports.len()
    }
}
