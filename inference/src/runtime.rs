//! The native engine contract.
//!
//! Everything this crate knows about the engine goes through [`Runtime`].
//! Handles cross the boundary as [`RawHandle`] addresses; ownership of
//! what they point at is tracked by the typed wrappers in [`crate::handle`].

use std::ffi::{CStr, c_void};
use std::path::Path;
use std::ptr::NonNull;

use crate::element::ElementType;
use crate::error::Status;
use crate::options::{LogLevel, RunOptions, SessionOptions};

/// Opaque, non-null address of a native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonNull<c_void>);

// Native handles are plain addresses; thread-safety of the objects behind
// them is the engine's contract.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Kind of value a node or value carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Tensor,
    SparseTensor,
    Sequence,
    Map,
    Opaque,
    Optional,
    Unknown,
}

impl ValueKind {
    /// Maps a raw `ONNXType` value.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Tensor,
            2 => Self::Sequence,
            3 => Self::Map,
            4 => Self::Opaque,
            5 => Self::SparseTensor,
            6 => Self::Optional,
            _ => Self::Unknown,
        }
    }

    pub fn is_tensor_like(self) -> bool {
        matches!(self, Self::Tensor | Self::SparseTensor)
    }
}

/// Synchronous native inference engine.
///
/// Release methods must be called at most once per handle; callers go
/// through the typed wrappers, which guarantee that.
pub trait Runtime: Send + Sync {
    fn create_env(&self, name: &CStr, level: LogLevel) -> Result<RawHandle, Status>;
    fn release_env(&self, env: RawHandle);

    fn create_session(
        &self,
        env: RawHandle,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<RawHandle, Status>;
    fn create_session_from_memory(
        &self,
        env: RawHandle,
        model: &[u8],
        options: &SessionOptions,
    ) -> Result<RawHandle, Status>;
    fn release_session(&self, session: RawHandle);

    fn input_count(&self, session: RawHandle) -> Result<usize, Status>;
    fn output_count(&self, session: RawHandle) -> Result<usize, Status>;
    fn input_name(&self, session: RawHandle, index: usize) -> Result<String, Status>;
    fn output_name(&self, session: RawHandle, index: usize) -> Result<String, Status>;
    fn input_type_info(&self, session: RawHandle, index: usize) -> Result<RawHandle, Status>;
    fn output_type_info(&self, session: RawHandle, index: usize) -> Result<RawHandle, Status>;

    fn type_info_kind(&self, type_info: RawHandle) -> Result<ValueKind, Status>;
    /// Returns tensor info borrowed from `type_info`, or `None` when the
    /// engine has none to give. Valid until `type_info` is released.
    fn cast_to_tensor_info(&self, type_info: RawHandle) -> Result<Option<RawHandle>, Status>;
    fn release_type_info(&self, type_info: RawHandle);

    fn tensor_element_type(&self, tensor_info: RawHandle) -> Result<i32, Status>;
    fn dimensions_count(&self, tensor_info: RawHandle) -> Result<usize, Status>;
    fn dimensions(&self, tensor_info: RawHandle, out: &mut [i64]) -> Result<(), Status>;

    /// Wraps caller memory in a tensor value without copying.
    ///
    /// # Safety
    ///
    /// `data` must point to `byte_len` readable bytes laid out as `element`
    /// that stay valid and unmoved until the returned value is released.
    unsafe fn create_tensor(
        &self,
        element: ElementType,
        shape: &[i64],
        data: *mut c_void,
        byte_len: usize,
    ) -> Result<RawHandle, Status>;
    /// Creates an engine-owned string tensor holding copies of `strings`.
    fn create_string_tensor(&self, shape: &[i64], strings: &[&CStr]) -> Result<RawHandle, Status>;

    fn value_kind(&self, value: RawHandle) -> Result<ValueKind, Status>;
    /// Returns owned tensor info for a tensor value; release it with
    /// [`Runtime::release_tensor_info`].
    fn value_tensor_info(&self, value: RawHandle) -> Result<RawHandle, Status>;
    fn release_tensor_info(&self, tensor_info: RawHandle);
    /// Address of the first element of a numeric tensor value.
    fn tensor_data(&self, value: RawHandle) -> Result<*const c_void, Status>;
    fn string_tensor_content(&self, value: RawHandle) -> Result<Vec<String>, Status>;

    fn create_run_options(&self, options: &RunOptions) -> Result<RawHandle, Status>;
    fn release_run_options(&self, run_options: RawHandle);

    /// Executes the session. `outputs` has one slot per output name; the
    /// engine may populate slots even when it reports failure.
    fn run(
        &self,
        session: RawHandle,
        run_options: Option<RawHandle>,
        input_names: &[&CStr],
        inputs: &[RawHandle],
        output_names: &[&CStr],
        outputs: &mut [Option<RawHandle>],
    ) -> Result<(), Status>;

    fn release_value(&self, value: RawHandle);
}
