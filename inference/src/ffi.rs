//! Raw FFI bindings for the C shim over the ONNX Runtime C API.
//!
//! The shim (csrc/ort_shim.c) flattens the API's function-pointer table
//! into plain functions. We hand-write declarations for the subset we need,
//! avoiding bindgen complexity.

use std::os::raw::{c_char, c_int, c_void};

// Opaque types.
pub type OrtApi = c_void;
pub type OrtEnv = c_void;
pub type OrtSession = c_void;
pub type OrtSessionOptions = c_void;
pub type OrtTypeInfo = c_void;
pub type OrtTensorTypeAndShapeInfo = c_void;
pub type OrtValue = c_void;
pub type OrtRunOptions = c_void;
pub type OrtStatus = c_void;

/// Mirrors `ort_session_config` in the shim.
#[repr(C)]
pub struct OrtSessionConfig {
    pub opt_level: c_int,
    pub intra_op_threads: c_int,
    pub inter_op_threads: c_int,
    pub execution_mode: c_int,
    pub cpu_mem_arena: c_int,
    pub mem_pattern: c_int,
    pub log_id: *const c_char,
    pub log_level: c_int,
    pub profile_prefix: *const c_char,
}

unsafe extern "C" {
    pub fn ort_api() -> *const OrtApi;

    pub fn ort_error_message(api: *const OrtApi, status: *mut OrtStatus) -> *const c_char;
    pub fn ort_error_code(api: *const OrtApi, status: *mut OrtStatus) -> c_int;
    pub fn ort_release_status(api: *const OrtApi, status: *mut OrtStatus);

    pub fn ort_create_env(api: *const OrtApi, level: c_int, name: *const c_char, out: *mut *mut OrtEnv) -> *mut OrtStatus;
    pub fn ort_release_env(api: *const OrtApi, env: *mut OrtEnv);

    pub fn ort_create_session_options(
        api: *const OrtApi,
        cfg: *const OrtSessionConfig,
        out: *mut *mut OrtSessionOptions,
    ) -> *mut OrtStatus;
    pub fn ort_append_cuda(api: *const OrtApi, opts: *mut OrtSessionOptions, device_id: c_int) -> *mut OrtStatus;
    pub fn ort_release_session_options(api: *const OrtApi, opts: *mut OrtSessionOptions);

    pub fn ort_create_session(
        api: *const OrtApi,
        env: *mut OrtEnv,
        path: *const c_char,
        opts: *mut OrtSessionOptions,
        out: *mut *mut OrtSession,
    ) -> *mut OrtStatus;
    pub fn ort_create_session_from_memory(
        api: *const OrtApi,
        env: *mut OrtEnv,
        data: *const c_void,
        len: usize,
        opts: *mut OrtSessionOptions,
        out: *mut *mut OrtSession,
    ) -> *mut OrtStatus;
    pub fn ort_release_session(api: *const OrtApi, session: *mut OrtSession);

    pub fn ort_session_input_count(api: *const OrtApi, session: *const OrtSession, out: *mut usize) -> *mut OrtStatus;
    pub fn ort_session_output_count(api: *const OrtApi, session: *const OrtSession, out: *mut usize) -> *mut OrtStatus;
    pub fn ort_session_input_name(
        api: *const OrtApi,
        session: *const OrtSession,
        index: usize,
        out: *mut *mut c_char,
    ) -> *mut OrtStatus;
    pub fn ort_session_output_name(
        api: *const OrtApi,
        session: *const OrtSession,
        index: usize,
        out: *mut *mut c_char,
    ) -> *mut OrtStatus;
    pub fn ort_free_name(api: *const OrtApi, name: *mut c_char) -> *mut OrtStatus;
    pub fn ort_session_input_type_info(
        api: *const OrtApi,
        session: *const OrtSession,
        index: usize,
        out: *mut *mut OrtTypeInfo,
    ) -> *mut OrtStatus;
    pub fn ort_session_output_type_info(
        api: *const OrtApi,
        session: *const OrtSession,
        index: usize,
        out: *mut *mut OrtTypeInfo,
    ) -> *mut OrtStatus;

    pub fn ort_type_info_onnx_type(api: *const OrtApi, info: *const OrtTypeInfo, out: *mut c_int) -> *mut OrtStatus;
    pub fn ort_cast_type_info_to_tensor_info(
        api: *const OrtApi,
        info: *const OrtTypeInfo,
        out: *mut *const OrtTensorTypeAndShapeInfo,
    ) -> *mut OrtStatus;
    pub fn ort_release_type_info(api: *const OrtApi, info: *mut OrtTypeInfo);

    pub fn ort_tensor_element_type(
        api: *const OrtApi,
        info: *const OrtTensorTypeAndShapeInfo,
        out: *mut c_int,
    ) -> *mut OrtStatus;
    pub fn ort_dimensions_count(
        api: *const OrtApi,
        info: *const OrtTensorTypeAndShapeInfo,
        out: *mut usize,
    ) -> *mut OrtStatus;
    pub fn ort_dimensions(
        api: *const OrtApi,
        info: *const OrtTensorTypeAndShapeInfo,
        dims: *mut i64,
        len: usize,
    ) -> *mut OrtStatus;
    pub fn ort_release_tensor_info(api: *const OrtApi, info: *mut OrtTensorTypeAndShapeInfo);

    pub fn ort_create_tensor(
        api: *const OrtApi,
        element: c_int,
        shape: *const i64,
        shape_len: usize,
        data: *mut c_void,
        byte_len: usize,
        out: *mut *mut OrtValue,
    ) -> *mut OrtStatus;
    pub fn ort_create_string_tensor(
        api: *const OrtApi,
        shape: *const i64,
        shape_len: usize,
        strings: *const *const c_char,
        count: usize,
        out: *mut *mut OrtValue,
    ) -> *mut OrtStatus;
    pub fn ort_value_type(api: *const OrtApi, value: *const OrtValue, out: *mut c_int) -> *mut OrtStatus;
    pub fn ort_value_tensor_info(
        api: *const OrtApi,
        value: *const OrtValue,
        out: *mut *mut OrtTensorTypeAndShapeInfo,
    ) -> *mut OrtStatus;
    pub fn ort_tensor_data(api: *const OrtApi, value: *mut OrtValue, out: *mut *mut c_void) -> *mut OrtStatus;
    pub fn ort_string_tensor_lengths(
        api: *const OrtApi,
        value: *const OrtValue,
        data_len: *mut usize,
        count: *mut usize,
    ) -> *mut OrtStatus;
    pub fn ort_string_tensor_content(
        api: *const OrtApi,
        value: *const OrtValue,
        buf: *mut c_void,
        buf_len: usize,
        offsets: *mut usize,
        count: usize,
    ) -> *mut OrtStatus;
    pub fn ort_release_value(api: *const OrtApi, value: *mut OrtValue);

    pub fn ort_create_run_options(
        api: *const OrtApi,
        tag: *const c_char,
        log_level: c_int,
        terminate: c_int,
        out: *mut *mut OrtRunOptions,
    ) -> *mut OrtStatus;
    pub fn ort_release_run_options(api: *const OrtApi, ro: *mut OrtRunOptions);

    pub fn ort_run(
        api: *const OrtApi,
        session: *mut OrtSession,
        ro: *const OrtRunOptions,
        input_names: *const *const c_char,
        inputs: *const *const OrtValue,
        num_inputs: usize,
        output_names: *const *const c_char,
        num_outputs: usize,
        outputs: *mut *mut OrtValue,
    ) -> *mut OrtStatus;
}
