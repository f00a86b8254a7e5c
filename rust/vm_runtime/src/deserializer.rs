//! VM deserializer reconstructing [`Value`]s from raw port data.
//!
//! The deserializer borrows one input buffer per `begin` cycle and reads it
//! little-endian from a cursor.  Nested structures are built on an explicit stack
//! of [`ReadState`] frames: the root frame receives top-level values, record
//! frames collect fields keyed by [`Deserializer::select_record_element`], and
//! array-of-record frames gather completed records until the expected count is
//! reached.  Every unpack call is all-or-nothing: when it fails the cursor and the
//! frame stack are exactly as they were before the call.

use thiserror::Error;
use tracing::{debug, trace};

use crate::bytecode::{DecodeError, Variant};
use crate::error::ErrorKind;
use crate::limits::{DeserializerLimits, LimitError};
use crate::program::{decode_program, ElementOp, LengthWidth};
use crate::value::{ScalarValue, Value};

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("no input buffer; call begin first")]
    MissingBuffer,
    #[error("read of {needed} bytes passes the end of the buffer ({remaining} remaining)")]
    BufferBoundary { needed: usize, remaining: usize },
    #[error("array length {length} exceeds the declared maximum {max}")]
    Length { length: u32, max: u32 },
    #[error("invalid read state: {0}")]
    InvalidState(&'static str),
    #[error("{0:?} elements cannot be executed from a program")]
    Unsupported(Variant),
    #[error(transparent)]
    Limit(#[from] LimitError),
    #[error(transparent)]
    Program(#[from] DecodeError),
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::MissingBuffer => ErrorKind::MissingBuffer,
            VmError::BufferBoundary { .. } => ErrorKind::BufferBoundary,
            VmError::Length { .. } => ErrorKind::Length,
            VmError::InvalidState(_) => ErrorKind::InvalidState,
            VmError::Unsupported(_) => ErrorKind::ElementType,
            VmError::Limit(LimitError::StateDepth { .. }) => ErrorKind::OutOfMemory,
            VmError::Limit(LimitError::ArrayLength { .. }) => ErrorKind::Length,
            VmError::Program(err) => err.kind(),
        }
    }
}

/// Width of the length prefix preceding a dynamically sized array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DynLen {
    #[default]
    None,
    U8,
    U16,
    U32,
}

impl From<LengthWidth> for DynLen {
    fn from(width: LengthWidth) -> Self {
        match width {
            LengthWidth::U8 => DynLen::U8,
            LengthWidth::U16 => DynLen::U16,
            LengthWidth::U32 => DynLen::U32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrEncoding {
    Ascii,
    Utf8,
}

/// String read from a fixed-size character field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedStr {
    pub text: String,
    pub encoding: StrEncoding,
}

impl FixedStr {
    /// Length in characters.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// One frame of the read-state stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadState {
    value: Option<Value>,
    record_key: Option<String>,
    is_last_element: bool,
    array_len: u32,
}

impl ReadState {
    fn with_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Key of the record field currently being filled.
    pub fn record_key(&self) -> Option<&str> {
        self.record_key.as_deref()
    }

    pub fn is_last_element(&self) -> bool {
        self.is_last_element
    }

    /// Expected element count when the frame gathers an array of records.
    pub fn array_len(&self) -> u32 {
        self.array_len
    }
}

trait LeScalar: Sized {
    const SIZE: usize;
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! le_scalar {
    ($($ty:ty),*) => {
        $(
            impl LeScalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

le_scalar!(u8, u16, u32, u64, i8, i16, i32, i64);

#[derive(Debug, Default)]
pub struct Deserializer<'a> {
    buffer: Option<&'a [u8]>,
    cursor: usize,
    states: Vec<ReadState>,
    limits: DeserializerLimits,
}

impl<'a> Deserializer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: DeserializerLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> DeserializerLimits {
        self.limits
    }

    /// Start a new cycle over `buffer` with a single empty root frame.
    pub fn begin(&mut self, buffer: &'a [u8]) {
        self.buffer = Some(buffer);
        self.cursor = 0;
        self.states.clear();
        self.states.push(ReadState::default());
    }

    /// Cursor offset from the start of the buffer.
    pub fn read_pos(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.buffer
            .map_or(0, |buffer| buffer.len().saturating_sub(self.cursor))
    }

    pub fn states(&self) -> &[ReadState] {
        &self.states
    }

    /// The innermost frame.
    pub fn state(&self) -> Option<&ReadState> {
        self.states.last()
    }

    pub fn unpack_u8(&mut self) -> VmResult<u8> {
        self.read()
    }

    pub fn unpack_u16(&mut self) -> VmResult<u16> {
        self.read()
    }

    pub fn unpack_u32(&mut self) -> VmResult<u32> {
        self.read()
    }

    pub fn unpack_u64(&mut self) -> VmResult<u64> {
        self.read()
    }

    pub fn unpack_s8(&mut self) -> VmResult<i8> {
        self.read()
    }

    pub fn unpack_s16(&mut self) -> VmResult<i16> {
        self.read()
    }

    pub fn unpack_s32(&mut self) -> VmResult<i32> {
        self.read()
    }

    pub fn unpack_s64(&mut self) -> VmResult<i64> {
        self.read()
    }

    pub fn unpack_u8_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, |raw: u8| ScalarValue::U32(raw.into()))
    }

    pub fn unpack_u16_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, |raw: u16| ScalarValue::U32(raw.into()))
    }

    pub fn unpack_u32_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, ScalarValue::U32)
    }

    pub fn unpack_u64_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, ScalarValue::U64)
    }

    pub fn unpack_s8_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, |raw: i8| ScalarValue::I32(raw.into()))
    }

    pub fn unpack_s16_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, |raw: i16| ScalarValue::I32(raw.into()))
    }

    pub fn unpack_s32_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, ScalarValue::I32)
    }

    pub fn unpack_s64_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, ScalarValue::I64)
    }

    pub fn unpack_bool_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.unpack_numeric_value(count, dyn_len, |raw: u8| ScalarValue::Bool(raw != 0))
    }

    /// Read exactly `max_len` bytes as a NUL-terminated string.
    ///
    /// Bytes after the first NUL are skipped but still consumed.  Invalid UTF-8
    /// sequences are replaced with U+FFFD.
    pub fn unpack_fixed_str(&mut self, max_len: u32) -> VmResult<FixedStr> {
        let bytes = self.take(to_usize(max_len)?)?;
        Ok(decode_str(bytes))
    }

    /// Unpack a string value; with a length prefix only that many bytes follow.
    pub fn unpack_str_value(&mut self, max_len: u32, dyn_len: DynLen) -> VmResult<()> {
        let text = self.atomically(|this| {
            let len = match dyn_len {
                DynLen::None => max_len,
                _ => this.read_array_len(max_len, dyn_len)?,
            };
            this.unpack_fixed_str(len)
        })?;
        self.store(Value::Scalar(ScalarValue::Str(text.text)))
    }

    pub fn unpack_bytes(&mut self, len: u32) -> VmResult<Vec<u8>> {
        Ok(self.take(to_usize(len)?)?.to_vec())
    }

    pub fn unpack_bytes_value(&mut self, len: u32, dyn_len: DynLen) -> VmResult<()> {
        let bytes = self.atomically(|this| {
            let len = match dyn_len {
                DynLen::None => len,
                _ => this.read_array_len(len, dyn_len)?,
            };
            this.unpack_bytes(len)
        })?;
        self.store(Value::Scalar(ScalarValue::Bytes(bytes)))
    }

    /// Begin a record (`count == 0`, no prefix) or an array of records.
    pub fn enter_record_value(&mut self, count: u32, dyn_len: DynLen) -> VmResult<()> {
        self.require_buffer()?;
        if count == 0 && dyn_len == DynLen::None {
            let state = self.current_mut()?;
            state.value = Some(Value::empty_record());
            state.record_key = None;
            state.is_last_element = false;
            return Ok(());
        }
        self.limits.check_depth(self.states.len() + 1)?;
        let len = self.atomically(|this| this.read_array_len(count, dyn_len))?;
        if len == 0 {
            return self.store(Value::Array(Vec::new()));
        }
        let state = self.current_mut()?;
        state.value = Some(Value::Array(Vec::with_capacity(len.min(64) as usize)));
        state.array_len = len;
        self.states.push(ReadState::with_value(Value::empty_record()));
        Ok(())
    }

    /// Select the record field the next unpacked value is stored under.
    pub fn select_record_element(&mut self, key: &str, is_last: bool) -> VmResult<()> {
        self.require_buffer()?;
        self.limits.check_depth(self.states.len() + 1)?;
        let state = self.current_mut()?;
        if !matches!(state.value, Some(Value::Record(_))) {
            return Err(VmError::InvalidState("selected element outside of a record"));
        }
        if state.record_key.is_some() {
            return Err(VmError::InvalidState("previous record element was never filled"));
        }
        state.record_key = Some(key.to_string());
        state.is_last_element = is_last;
        self.states.push(ReadState::default());
        Ok(())
    }

    /// Take the value of the innermost frame, or of the root when `auto_pop` is set.
    pub fn get_value(&mut self, auto_pop: bool) -> Option<Value> {
        if auto_pop {
            self.states.truncate(1);
        }
        self.states.last_mut().and_then(|state| state.value.take())
    }

    /// Execute a compiled program against the current buffer.
    ///
    /// The frame stack is reset to a single root before each element; reading
    /// continues from the current cursor.  A program with several elements yields
    /// an array of their values.  On failure the cursor is restored to where the
    /// program started.
    pub fn run_program(&mut self, program: &[u8]) -> VmResult<Value> {
        self.require_buffer()?;
        let decoded = decode_program(program)?;
        debug!(
            program_type = ?decoded.header.program_type,
            elements = decoded.elements.len(),
            data_size = decoded.header.data_size,
            remaining = self.remaining(),
            "executing program"
        );
        let needed = to_usize(decoded.header.data_size)?;
        if needed > self.remaining() {
            return Err(VmError::BufferBoundary {
                needed,
                remaining: self.remaining(),
            });
        }
        let mut values = self.atomically(|this| {
            let mut values = Vec::with_capacity(decoded.elements.len());
            for element in &decoded.elements {
                this.states.clear();
                this.states.push(ReadState::default());
                trace!(%element, pos = this.cursor, "unpacking element");
                this.execute_element(element)?;
                let value = this
                    .get_value(true)
                    .ok_or(VmError::InvalidState("element produced no value"))?;
                values.push(value);
            }
            Ok(values)
        })?;
        match values.len() {
            1 => values
                .pop()
                .ok_or(VmError::InvalidState("element produced no value")),
            _ => Ok(Value::Array(values)),
        }
    }

    fn execute_element(&mut self, element: &ElementOp) -> VmResult<()> {
        let (count, dyn_len) = match element.array {
            None => (0, DynLen::None),
            Some(array) => match array.length {
                Some(length) => (length, DynLen::None),
                None => (array.width.max_len(), DynLen::from(array.width)),
            },
        };
        match element.variant {
            Variant::U8 => self.unpack_u8_value(count, dyn_len),
            Variant::U16 => self.unpack_u16_value(count, dyn_len),
            Variant::U32 => self.unpack_u32_value(count, dyn_len),
            Variant::U64 => self.unpack_u64_value(count, dyn_len),
            Variant::S8 => self.unpack_s8_value(count, dyn_len),
            Variant::S16 => self.unpack_s16_value(count, dyn_len),
            Variant::S32 => self.unpack_s32_value(count, dyn_len),
            Variant::S64 => self.unpack_s64_value(count, dyn_len),
            Variant::Bool => self.unpack_bool_value(count, dyn_len),
            // A scalar string or byte field occupies one byte.
            Variant::Str => self.unpack_str_value(count.max(1), dyn_len),
            Variant::Bytes => self.unpack_bytes_value(count.max(1), dyn_len),
            Variant::Record => Err(VmError::Unsupported(Variant::Record)),
        }
    }

    fn unpack_numeric_value<T: LeScalar>(
        &mut self,
        count: u32,
        dyn_len: DynLen,
        widen: impl Fn(T) -> ScalarValue,
    ) -> VmResult<()> {
        let value = self.atomically(|this| {
            if count == 0 && dyn_len == DynLen::None {
                return Ok(Value::Scalar(widen(this.read::<T>()?)));
            }
            let len = this.read_array_len(count, dyn_len)?;
            let size = to_usize(len)?
                .checked_mul(T::SIZE)
                .ok_or(VmError::Length { length: len, max: count })?;
            let bytes = this.take(size)?;
            Ok(Value::Array(
                bytes
                    .chunks_exact(T::SIZE)
                    .map(|chunk| Value::Scalar(widen(T::from_le(chunk))))
                    .collect(),
            ))
        })?;
        self.store(value)
    }

    /// Element count of an array: `count` itself, or a prefix bounded by it.
    fn read_array_len(&mut self, count: u32, dyn_len: DynLen) -> VmResult<u32> {
        let len = match dyn_len {
            DynLen::None => count,
            DynLen::U8 => u32::from(self.read::<u8>()?),
            DynLen::U16 => u32::from(self.read::<u16>()?),
            DynLen::U32 => self.read::<u32>()?,
        };
        if len > count {
            return Err(VmError::Length {
                length: len,
                max: count,
            });
        }
        self.limits.check_array_len(len)?;
        Ok(len)
    }

    /// Place a finished value in the innermost frame and fold completed frames
    /// into their parents.
    fn store(&mut self, value: Value) -> VmResult<()> {
        self.current_mut()?.value = Some(value);
        self.complete_frames();
        Ok(())
    }

    fn complete_frames(&mut self) {
        while self.states.len() > 1 {
            let parent_index = self.states.len() - 2;
            let gathers_records = self.states[parent_index].array_len > 0;
            let completes_field = self.states[parent_index].record_key.is_some();
            if !gathers_records && !completes_field {
                break;
            }
            let Some(child) = self.states.pop().and_then(|state| state.value) else {
                break;
            };
            let parent = &mut self.states[parent_index];
            match (&mut parent.value, parent.record_key.take()) {
                (Some(Value::Record(fields)), Some(key)) => {
                    fields.insert(key, child);
                    if !parent.is_last_element {
                        break;
                    }
                    parent.is_last_element = false;
                }
                (Some(Value::Array(items)), _) => {
                    items.push(child);
                    if items.len() < parent.array_len as usize {
                        self.states
                            .push(ReadState::with_value(Value::empty_record()));
                        break;
                    }
                    parent.array_len = 0;
                }
                _ => break,
            }
        }
    }

    /// Run `f`, rewinding the cursor if it fails.
    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> VmResult<T>) -> VmResult<T> {
        let start = self.cursor;
        let result = f(self);
        if result.is_err() {
            self.cursor = start;
        }
        result
    }

    fn read<T: LeScalar>(&mut self) -> VmResult<T> {
        self.take(T::SIZE).map(T::from_le)
    }

    fn take(&mut self, len: usize) -> VmResult<&'a [u8]> {
        let buffer = self.require_buffer()?;
        let remaining = buffer.len().saturating_sub(self.cursor);
        if len > remaining {
            return Err(VmError::BufferBoundary {
                needed: len,
                remaining,
            });
        }
        let bytes = &buffer[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(bytes)
    }

    fn require_buffer(&self) -> VmResult<&'a [u8]> {
        self.buffer.ok_or(VmError::MissingBuffer)
    }

    fn current_mut(&mut self) -> VmResult<&mut ReadState> {
        self.states
            .last_mut()
            .ok_or(VmError::InvalidState("read-state stack is empty"))
    }
}

fn to_usize(len: u32) -> VmResult<usize> {
    usize::try_from(len).map_err(|_| VmError::BufferBoundary {
        needed: usize::MAX,
        remaining: 0,
    })
}

fn decode_str(bytes: &[u8]) -> FixedStr {
    let end = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];
    let encoding = if bytes.is_ascii() {
        StrEncoding::Ascii
    } else {
        StrEncoding::Utf8
    };
    FixedStr {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding,
    }
}
