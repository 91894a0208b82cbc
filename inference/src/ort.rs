//! [`Runtime`] backed by ONNX Runtime through the C shim.

use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::element::ElementType;
use crate::error::{InferenceError, Status, StatusCode};
use crate::ffi;
use crate::options::{ExecutionProvider, LogLevel, RunOptions, SessionOptions};
use crate::runtime::{RawHandle, Runtime, ValueKind};

static SHARED: Lazy<Result<Arc<OrtRuntime>, Status>> = Lazy::new(|| OrtRuntime::new().map(Arc::new));

/// ONNX Runtime, reached through its versioned API table.
pub struct OrtRuntime {
    api: *const ffi::OrtApi,
}

// The API table is immutable and the C API is thread-safe.
unsafe impl Send for OrtRuntime {}
unsafe impl Sync for OrtRuntime {}

impl std::fmt::Debug for OrtRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtRuntime").finish_non_exhaustive()
    }
}

impl OrtRuntime {
    /// Binds the API table of the linked library. Reached only through
    /// [`OrtRuntime::shared`].
    fn new() -> Result<Self, Status> {
        let api = unsafe { ffi::ort_api() };
        if api.is_null() {
            return Err(Status::new(
                StatusCode::Fail,
                "linked ONNX Runtime does not provide the requested API version",
            ));
        }
        Ok(Self { api })
    }

    /// The process-wide instance.
    pub fn shared() -> Result<Arc<dyn Runtime>, InferenceError> {
        match &*SHARED {
            Ok(rt) => Ok(rt.clone() as Arc<dyn Runtime>),
            Err(status) => Err(InferenceError::Native(status.clone())),
        }
    }

    fn check(&self, status: *mut ffi::OrtStatus) -> Result<(), Status> {
        if status.is_null() {
            return Ok(());
        }
        let err = unsafe {
            let msg = ffi::ort_error_message(self.api, status);
            let message = if msg.is_null() {
                String::from("unknown error")
            } else {
                CStr::from_ptr(msg).to_string_lossy().into_owned()
            };
            let code = ffi::ort_error_code(self.api, status);
            ffi::ort_release_status(self.api, status);
            Status::new(StatusCode::from_raw(code), message)
        };
        Err(err)
    }

    fn handle(&self, ptr: *mut c_void, what: &str) -> Result<RawHandle, Status> {
        RawHandle::new(ptr).ok_or_else(|| Status::new(StatusCode::Fail, format!("engine returned null {what}")))
    }

    fn take_name(&self, name: *mut c_char) -> Result<String, Status> {
        if name.is_null() {
            return Err(Status::new(StatusCode::Fail, "engine returned null name"));
        }
        let s = utf8(unsafe { CStr::from_ptr(name) }.to_bytes(), "node name");
        self.check(unsafe { ffi::ort_free_name(self.api, name) })?;
        s
    }

    /// Builds native session options; the caller releases them.
    fn session_options(&self, options: &SessionOptions) -> Result<*mut ffi::OrtSessionOptions, Status> {
        let log_id = optional_cstring(options.log_id.as_deref())?;
        let profile_prefix = optional_cstring(options.profile_prefix.as_deref())?;
        let cfg = ffi::OrtSessionConfig {
            opt_level: options.optimization_level as c_int,
            intra_op_threads: c_int::from(options.intra_op_threads),
            inter_op_threads: c_int::from(options.inter_op_threads),
            execution_mode: options.execution_mode as c_int,
            cpu_mem_arena: c_int::from(options.cpu_mem_arena),
            mem_pattern: c_int::from(options.mem_pattern),
            log_id: log_id.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            log_level: options.log_level as c_int,
            profile_prefix: profile_prefix.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        };

        let mut opts: *mut ffi::OrtSessionOptions = ptr::null_mut();
        self.check(unsafe { ffi::ort_create_session_options(self.api, &cfg, &mut opts) })?;

        for provider in &options.execution_providers {
            // CPU is always available as the fallback.
            if let ExecutionProvider::Cuda { device_id } = provider {
                let status = unsafe { ffi::ort_append_cuda(self.api, opts, *device_id) };
                if let Err(e) = self.check(status) {
                    unsafe { ffi::ort_release_session_options(self.api, opts) };
                    return Err(e);
                }
            }
        }
        Ok(opts)
    }

    fn finish_session(
        &self,
        opts: *mut ffi::OrtSessionOptions,
        session: *mut ffi::OrtSession,
        status: *mut ffi::OrtStatus,
    ) -> Result<RawHandle, Status> {
        unsafe { ffi::ort_release_session_options(self.api, opts) };
        self.check(status)?;
        self.handle(session, "session")
    }
}

fn optional_cstring(s: Option<&str>) -> Result<Option<CString>, Status> {
    s.map(|s| CString::new(s).map_err(|_| Status::new(StatusCode::InvalidArgument, format!("{s:?} contains NUL"))))
        .transpose()
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, Status> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Status::new(StatusCode::InvalidArgument, format!("{what} is not valid UTF-8")))
}

/// Splits the concatenated contents of a string tensor at `offsets`.
fn split_strings(buf: &[u8], offsets: &[usize]) -> Result<Vec<String>, Status> {
    let mut out = Vec::with_capacity(offsets.len());
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(buf.len());
        let bytes = buf
            .get(start..end)
            .ok_or_else(|| Status::new(StatusCode::Fail, "string tensor offsets out of range"))?;
        out.push(utf8(bytes, "string tensor element")?);
    }
    Ok(out)
}

fn path_cstring(path: &Path) -> Result<CString, Status> {
    let s = path
        .to_str()
        .ok_or_else(|| Status::new(StatusCode::InvalidArgument, format!("non UTF-8 model path {}", path.display())))?;
    CString::new(s).map_err(|_| Status::new(StatusCode::InvalidArgument, format!("model path {s:?} contains NUL")))
}

impl Runtime for OrtRuntime {
    fn create_env(&self, name: &CStr, level: LogLevel) -> Result<RawHandle, Status> {
        let mut env: *mut ffi::OrtEnv = ptr::null_mut();
        self.check(unsafe { ffi::ort_create_env(self.api, level as c_int, name.as_ptr(), &mut env) })?;
        self.handle(env, "env")
    }

    fn release_env(&self, env: RawHandle) {
        unsafe { ffi::ort_release_env(self.api, env.as_ptr()) }
    }

    fn create_session(&self, env: RawHandle, model_path: &Path, options: &SessionOptions) -> Result<RawHandle, Status> {
        let path = path_cstring(model_path)?;
        let opts = self.session_options(options)?;
        let mut session: *mut ffi::OrtSession = ptr::null_mut();
        let status = unsafe { ffi::ort_create_session(self.api, env.as_ptr(), path.as_ptr(), opts, &mut session) };
        self.finish_session(opts, session, status)
    }

    fn create_session_from_memory(
        &self,
        env: RawHandle,
        model: &[u8],
        options: &SessionOptions,
    ) -> Result<RawHandle, Status> {
        let opts = self.session_options(options)?;
        let mut session: *mut ffi::OrtSession = ptr::null_mut();
        let status = unsafe {
            ffi::ort_create_session_from_memory(
                self.api,
                env.as_ptr(),
                model.as_ptr() as *const c_void,
                model.len(),
                opts,
                &mut session,
            )
        };
        self.finish_session(opts, session, status)
    }

    fn release_session(&self, session: RawHandle) {
        unsafe { ffi::ort_release_session(self.api, session.as_ptr()) }
    }

    fn input_count(&self, session: RawHandle) -> Result<usize, Status> {
        let mut n = 0usize;
        self.check(unsafe { ffi::ort_session_input_count(self.api, session.as_ptr(), &mut n) })?;
        Ok(n)
    }

    fn output_count(&self, session: RawHandle) -> Result<usize, Status> {
        let mut n = 0usize;
        self.check(unsafe { ffi::ort_session_output_count(self.api, session.as_ptr(), &mut n) })?;
        Ok(n)
    }

    fn input_name(&self, session: RawHandle, index: usize) -> Result<String, Status> {
        let mut name: *mut c_char = ptr::null_mut();
        self.check(unsafe { ffi::ort_session_input_name(self.api, session.as_ptr(), index, &mut name) })?;
        self.take_name(name)
    }

    fn output_name(&self, session: RawHandle, index: usize) -> Result<String, Status> {
        let mut name: *mut c_char = ptr::null_mut();
        self.check(unsafe { ffi::ort_session_output_name(self.api, session.as_ptr(), index, &mut name) })?;
        self.take_name(name)
    }

    fn input_type_info(&self, session: RawHandle, index: usize) -> Result<RawHandle, Status> {
        let mut info: *mut ffi::OrtTypeInfo = ptr::null_mut();
        self.check(unsafe { ffi::ort_session_input_type_info(self.api, session.as_ptr(), index, &mut info) })?;
        self.handle(info, "type info")
    }

    fn output_type_info(&self, session: RawHandle, index: usize) -> Result<RawHandle, Status> {
        let mut info: *mut ffi::OrtTypeInfo = ptr::null_mut();
        self.check(unsafe { ffi::ort_session_output_type_info(self.api, session.as_ptr(), index, &mut info) })?;
        self.handle(info, "type info")
    }

    fn type_info_kind(&self, type_info: RawHandle) -> Result<ValueKind, Status> {
        let mut kind: c_int = 0;
        self.check(unsafe { ffi::ort_type_info_onnx_type(self.api, type_info.as_ptr(), &mut kind) })?;
        Ok(ValueKind::from_raw(kind))
    }

    fn cast_to_tensor_info(&self, type_info: RawHandle) -> Result<Option<RawHandle>, Status> {
        let mut info: *const ffi::OrtTensorTypeAndShapeInfo = ptr::null();
        self.check(unsafe { ffi::ort_cast_type_info_to_tensor_info(self.api, type_info.as_ptr(), &mut info) })?;
        Ok(RawHandle::new(info as *mut c_void))
    }

    fn release_type_info(&self, type_info: RawHandle) {
        unsafe { ffi::ort_release_type_info(self.api, type_info.as_ptr()) }
    }

    fn tensor_element_type(&self, tensor_info: RawHandle) -> Result<i32, Status> {
        let mut code: c_int = 0;
        self.check(unsafe { ffi::ort_tensor_element_type(self.api, tensor_info.as_ptr(), &mut code) })?;
        Ok(code)
    }

    fn dimensions_count(&self, tensor_info: RawHandle) -> Result<usize, Status> {
        let mut n = 0usize;
        self.check(unsafe { ffi::ort_dimensions_count(self.api, tensor_info.as_ptr(), &mut n) })?;
        Ok(n)
    }

    fn dimensions(&self, tensor_info: RawHandle, out: &mut [i64]) -> Result<(), Status> {
        self.check(unsafe { ffi::ort_dimensions(self.api, tensor_info.as_ptr(), out.as_mut_ptr(), out.len()) })
    }

    unsafe fn create_tensor(
        &self,
        element: ElementType,
        shape: &[i64],
        data: *mut c_void,
        byte_len: usize,
    ) -> Result<RawHandle, Status> {
        let mut value: *mut ffi::OrtValue = ptr::null_mut();
        // Zero-sized tensors still need a non-null data pointer.
        let data = if data.is_null() { ptr::NonNull::<u64>::dangling().as_ptr().cast() } else { data };
        self.check(unsafe {
            ffi::ort_create_tensor(
                self.api,
                element.code(),
                shape.as_ptr(),
                shape.len(),
                data,
                byte_len,
                &mut value,
            )
        })?;
        self.handle(value, "tensor")
    }

    fn create_string_tensor(&self, shape: &[i64], strings: &[&CStr]) -> Result<RawHandle, Status> {
        let ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        let mut value: *mut ffi::OrtValue = ptr::null_mut();
        self.check(unsafe {
            ffi::ort_create_string_tensor(self.api, shape.as_ptr(), shape.len(), ptrs.as_ptr(), ptrs.len(), &mut value)
        })?;
        self.handle(value, "tensor")
    }

    fn value_kind(&self, value: RawHandle) -> Result<ValueKind, Status> {
        let mut kind: c_int = 0;
        self.check(unsafe { ffi::ort_value_type(self.api, value.as_ptr(), &mut kind) })?;
        Ok(ValueKind::from_raw(kind))
    }

    fn value_tensor_info(&self, value: RawHandle) -> Result<RawHandle, Status> {
        let mut info: *mut ffi::OrtTensorTypeAndShapeInfo = ptr::null_mut();
        self.check(unsafe { ffi::ort_value_tensor_info(self.api, value.as_ptr(), &mut info) })?;
        self.handle(info, "tensor info")
    }

    fn release_tensor_info(&self, tensor_info: RawHandle) {
        unsafe { ffi::ort_release_tensor_info(self.api, tensor_info.as_ptr()) }
    }

    fn tensor_data(&self, value: RawHandle) -> Result<*const c_void, Status> {
        let mut data: *mut c_void = ptr::null_mut();
        self.check(unsafe { ffi::ort_tensor_data(self.api, value.as_ptr(), &mut data) })?;
        Ok(data as *const c_void)
    }

    fn string_tensor_content(&self, value: RawHandle) -> Result<Vec<String>, Status> {
        let (mut data_len, mut count) = (0usize, 0usize);
        self.check(unsafe { ffi::ort_string_tensor_lengths(self.api, value.as_ptr(), &mut data_len, &mut count) })?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; data_len];
        let mut offsets = vec![0usize; count];
        self.check(unsafe {
            ffi::ort_string_tensor_content(
                self.api,
                value.as_ptr(),
                buf.as_mut_ptr() as *mut c_void,
                data_len,
                offsets.as_mut_ptr(),
                count,
            )
        })?;

        split_strings(&buf, &offsets)
    }

    fn create_run_options(&self, options: &RunOptions) -> Result<RawHandle, Status> {
        let tag = optional_cstring(options.tag.as_deref())?;
        let mut ro: *mut ffi::OrtRunOptions = ptr::null_mut();
        self.check(unsafe {
            ffi::ort_create_run_options(
                self.api,
                tag.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
                options.log_level as c_int,
                c_int::from(options.terminate),
                &mut ro,
            )
        })?;
        self.handle(ro, "run options")
    }

    fn release_run_options(&self, run_options: RawHandle) {
        unsafe { ffi::ort_release_run_options(self.api, run_options.as_ptr()) }
    }

    fn run(
        &self,
        session: RawHandle,
        run_options: Option<RawHandle>,
        input_names: &[&CStr],
        inputs: &[RawHandle],
        output_names: &[&CStr],
        outputs: &mut [Option<RawHandle>],
    ) -> Result<(), Status> {
        let in_names: Vec<*const c_char> = input_names.iter().map(|s| s.as_ptr()).collect();
        let in_values: Vec<*const ffi::OrtValue> = inputs.iter().map(|v| v.as_ptr() as *const _).collect();
        let out_names: Vec<*const c_char> = output_names.iter().map(|s| s.as_ptr()).collect();
        let mut out_values: Vec<*mut ffi::OrtValue> = vec![ptr::null_mut(); outputs.len()];

        let status = unsafe {
            ffi::ort_run(
                self.api,
                session.as_ptr(),
                run_options.map_or(ptr::null(), |ro| ro.as_ptr() as *const _),
                in_names.as_ptr(),
                in_values.as_ptr(),
                in_values.len(),
                out_names.as_ptr(),
                out_names.len(),
                out_values.as_mut_ptr(),
            )
        };

        // Hand back whatever the engine populated, even on failure.
        for (slot, &raw) in outputs.iter_mut().zip(&out_values) {
            *slot = RawHandle::new(raw);
        }
        self.check(status)
    }

    fn release_value(&self, value: RawHandle) {
        unsafe { ffi::ort_release_value(self.api, value.as_ptr()) }
    }
}
