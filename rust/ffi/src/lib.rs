//! C-compatible bridge exposing the APX runtime to foreign callers.
//!
//! Every entry point takes a NUL-terminated JSON request and returns a
//! heap-allocated JSON response that must be released with [`apx_free`].
//! Responses carry `"ok": true` plus a payload, or `"ok": false` with an error
//! descriptor whose `kind` names the failure class.

use std::ffi::{CStr, CString};
use std::ptr;

use apx_vm_runtime::file_map::{AddressLayout, File, FileMap};
use apx_vm_runtime::{
    compile_provide_program, compile_require_program, ApxError, DataElement, Deserializer,
    DeserializerLimits, ErrorKind, Program,
};
use libc::c_char;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Direction {
    #[default]
    Provide,
    Require,
}

#[derive(Debug, Deserialize)]
struct CompileRequest {
    element: DataElement,
    #[serde(default)]
    direction: Direction,
}

#[derive(Debug, Deserialize)]
struct UnpackRequest {
    program: Vec<u8>,
    data: Vec<u8>,
    #[serde(default)]
    limits: Option<DeserializerLimits>,
}

#[derive(Debug, Deserialize)]
struct FileMapPlanRequest {
    files: Vec<File>,
    #[serde(default)]
    layout: Option<AddressLayout>,
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    kind: String,
    message: String,
}

#[derive(Debug, Error)]
enum BridgeError {
    #[error("received null pointer from caller")]
    NullPointer,
    #[error("ffi payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("failed to parse request JSON: {0}")]
    Parse(serde_json::Error),
    #[error(transparent)]
    Runtime(#[from] ApxError),
}

impl BridgeError {
    fn payload(&self) -> ErrorPayload {
        let kind = match self {
            BridgeError::NullPointer => "null_pointer".to_string(),
            BridgeError::InvalidUtf8 => "invalid_utf8".to_string(),
            BridgeError::Parse(_) => "parse_error".to_string(),
            BridgeError::Runtime(err) => kind_name(err.kind()),
        };
        ErrorPayload {
            kind,
            message: self.to_string(),
        }
    }
}

fn kind_name(kind: ErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{kind:?}"))
}

/// Compile a data element into a PACK (provide) or UNPACK (require) program.
///
/// # Safety
///
/// The caller must pass a valid, null-terminated UTF-8 string pointer. The
/// returned pointer must be released with [`apx_free`].
#[no_mangle]
pub unsafe extern "C" fn apx_compile_element(request: *const c_char) -> *mut c_char {
    dispatch(request, |raw| {
        let payload: CompileRequest = serde_json::from_str(raw).map_err(BridgeError::Parse)?;
        let program = match payload.direction {
            Direction::Provide => compile_provide_program(&payload.element),
            Direction::Require => compile_require_program(&payload.element),
        }
        .map_err(ApxError::from)?;
        let min_data_size = program.header().map_err(ApxError::from)?.data_size;
        Ok(json!({
            "ok": true,
            "program": program.as_bytes(),
            "min_data_size": min_data_size,
        }))
    })
}

/// Run a compiled program over raw port data and return the unpacked value.
///
/// # Safety
///
/// Same contract as [`apx_compile_element`].
#[no_mangle]
pub unsafe extern "C" fn apx_unpack(request: *const c_char) -> *mut c_char {
    dispatch(request, |raw| {
        let payload: UnpackRequest = serde_json::from_str(raw).map_err(BridgeError::Parse)?;
        let program = Program::from(payload.program);
        let mut deserializer = Deserializer::with_limits(payload.limits.unwrap_or_default());
        deserializer.begin(&payload.data);
        let value = deserializer
            .run_program(program.as_bytes())
            .map_err(ApxError::from)?;
        Ok(json!({
            "ok": true,
            "value": value,
        }))
    })
}

/// Place a batch of files into a fresh file map and report their addresses.
///
/// # Safety
///
/// Same contract as [`apx_compile_element`].
#[no_mangle]
pub unsafe extern "C" fn apx_file_map_plan(request: *const c_char) -> *mut c_char {
    dispatch(request, |raw| {
        let payload: FileMapPlanRequest = serde_json::from_str(raw).map_err(BridgeError::Parse)?;
        let mut map = match payload.layout {
            Some(layout) => FileMap::with_layout(layout).map_err(ApxError::from)?,
            None => FileMap::new(),
        };
        for file in payload.files {
            map.insert_file(file).map_err(ApxError::from)?;
        }
        Ok(json!({
            "ok": true,
            "files": map.file_infos(),
        }))
    })
}

/// # Safety
///
/// `ptr` must originate from one of the `apx_*` entry points of this library.
#[no_mangle]
pub unsafe extern "C" fn apx_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

unsafe fn dispatch<F>(request: *const c_char, handler: F) -> *mut c_char
where
    F: FnOnce(&str) -> Result<serde_json::Value, BridgeError>,
{
    let response = read_request(request)
        .and_then(handler)
        .unwrap_or_else(|error| {
            json!({
                "ok": false,
                "error": error.payload(),
            })
        });
    to_c_string(&response)
}

unsafe fn read_request<'a>(request: *const c_char) -> Result<&'a str, BridgeError> {
    if request.is_null() {
        return Err(BridgeError::NullPointer);
    }
    CStr::from_ptr(request)
        .to_str()
        .map_err(|_| BridgeError::InvalidUtf8)
}

fn to_c_string(response: &serde_json::Value) -> *mut c_char {
    match serde_json::to_string(response) {
        Ok(serialised) => CString::new(serialised).map_or(ptr::null_mut(), CString::into_raw),
        Err(_) => ptr::null_mut(),
    }
}
