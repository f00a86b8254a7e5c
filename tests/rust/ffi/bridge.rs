use std::ffi::{CStr, CString};
use std::ptr;

use apx_ffi::{apx_compile_element, apx_file_map_plan, apx_free, apx_unpack};
use libc::c_char;
use serde_json::{json, Value};

type Entry = unsafe extern "C" fn(*const c_char) -> *mut c_char;

fn read_response(raw: *mut c_char) -> Value {
    assert!(!raw.is_null(), "bridge returned a null response");
    let text = unsafe { CStr::from_ptr(raw) }
        .to_str()
        .expect("response is UTF-8")
        .to_string();
    unsafe { apx_free(raw) };
    serde_json::from_str(&text).expect("response is JSON")
}

fn call(entry: Entry, request: &Value) -> Value {
    let request = CString::new(request.to_string()).expect("request has no interior NUL");
    read_response(unsafe { entry(request.as_ptr()) })
}

#[test]
fn compiles_elements_into_program_bytes() {
    let response = call(
        apx_compile_element,
        &json!({"element": {"base_type": "U8", "array_len": 32}}),
    );
    assert_eq!(response["ok"], json!(true));
    assert_eq!(
        response["program"],
        json!([1, 0, 1, 32, 0, 0, 0, 0x81, 0x02, 32])
    );
    assert_eq!(response["min_data_size"], json!(32));

    let response = call(
        apx_compile_element,
        &json!({
            "element": {"base_type": "U16", "array_len": 8, "dynamic_array": true},
            "direction": "require"
        }),
    );
    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["program"], json!([1, 0, 0, 0, 0, 0, 0, 0x88, 0x82]));
    assert_eq!(response["min_data_size"], json!(0));
}

#[test]
fn compile_errors_carry_their_kind() {
    let response = call(
        apx_compile_element,
        &json!({"element": {"base_type": "Record"}}),
    );
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"]["kind"], json!("element_type"));

    let response = call(apx_compile_element, &json!({"element": 5}));
    assert_eq!(response["error"]["kind"], json!("parse_error"));

    let response = read_response(unsafe { apx_compile_element(ptr::null()) });
    assert_eq!(response["error"]["kind"], json!("null_pointer"));
}

#[test]
fn unpacks_data_with_a_compiled_program() {
    let compiled = call(
        apx_compile_element,
        &json!({"element": {"base_type": "S16", "array_len": 2}, "direction": "require"}),
    );
    let response = call(
        apx_unpack,
        &json!({"program": compiled["program"], "data": [0xFF, 0xFF, 0x10, 0x00]}),
    );
    assert_eq!(response["ok"], json!(true));
    assert_eq!(
        response["value"],
        json!({
            "type": "Array",
            "value": [
                {"type": "Scalar", "value": {"type": "I32", "value": -1}},
                {"type": "Scalar", "value": {"type": "I32", "value": 16}}
            ]
        })
    );

    let response = call(
        apx_unpack,
        &json!({"program": compiled["program"], "data": [0xFF]}),
    );
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"]["kind"], json!("buffer_boundary"));
}

#[test]
fn plans_file_placement() {
    let unassigned = u32::MAX;
    let response = call(
        apx_file_map_plan,
        &json!({
            "files": [
                {"info": {"address": unassigned, "length": 100, "name": "Node.apx"}, "file_type": "Definition"},
                {"info": {"address": unassigned, "length": 8, "name": "Node.out"}, "file_type": "OutData"},
                {"info": {"address": unassigned, "length": 8, "name": "Node.in"}, "file_type": "InData"}
            ]
        }),
    );
    assert_eq!(response["ok"], json!(true));
    let files = response["files"].as_array().expect("files array");
    let placed: Vec<(String, u64)> = files
        .iter()
        .map(|file| {
            (
                file["name"].as_str().unwrap_or_default().to_string(),
                file["address"].as_u64().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(
        placed,
        vec![
            ("Node.out".to_string(), 0),
            ("Node.in".to_string(), 0x400),
            ("Node.apx".to_string(), 0x400_0000),
        ]
    );

    let response = call(
        apx_file_map_plan,
        &json!({
            "files": [
                {"info": {"address": 0x100, "length": 0x10, "name": "a"}, "file_type": "OutData"},
                {"info": {"address": 0x108, "length": 0x10, "name": "b"}, "file_type": "OutData"}
            ]
        }),
    );
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"]["kind"], json!("address_in_use"));
}
