//! Tensor values exchanged with a session.

use std::borrow::Cow;
use std::ffi::{CString, c_void};
use std::ops::Index;
use std::sync::Arc;

use half::{bf16, f16};

use crate::element::{Element, ElementType};
use crate::error::InferenceError;
use crate::handle::{TensorInfoHandle, ValueHandle};
use crate::metadata::tensor_type_and_shape;
use crate::runtime::{Runtime, ValueKind};

// ---------------------------------------------------------------------------
// TensorData
// ---------------------------------------------------------------------------

/// Typed tensor contents, borrowed from the caller or owned.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData<'a> {
    Float32(Cow<'a, [f32]>),
    Float64(Cow<'a, [f64]>),
    Int8(Cow<'a, [i8]>),
    Uint8(Cow<'a, [u8]>),
    Int16(Cow<'a, [i16]>),
    Uint16(Cow<'a, [u16]>),
    Int32(Cow<'a, [i32]>),
    Uint32(Cow<'a, [u32]>),
    Int64(Cow<'a, [i64]>),
    Uint64(Cow<'a, [u64]>),
    Bool(Cow<'a, [bool]>),
    Float16(Cow<'a, [f16]>),
    BFloat16(Cow<'a, [bf16]>),
    String(Cow<'a, [String]>),
}

macro_rules! for_each_numeric {
    ($data:expr, $d:ident => $body:expr, $strings:ident => $other:expr) => {
        match $data {
            TensorData::Float32($d) => $body,
            TensorData::Float64($d) => $body,
            TensorData::Int8($d) => $body,
            TensorData::Uint8($d) => $body,
            TensorData::Int16($d) => $body,
            TensorData::Uint16($d) => $body,
            TensorData::Int32($d) => $body,
            TensorData::Uint32($d) => $body,
            TensorData::Int64($d) => $body,
            TensorData::Uint64($d) => $body,
            TensorData::Bool($d) => $body,
            TensorData::Float16($d) => $body,
            TensorData::BFloat16($d) => $body,
            TensorData::String($strings) => $other,
        }
    };
}

impl TensorData<'_> {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Float32(_) => ElementType::Float32,
            Self::Float64(_) => ElementType::Float64,
            Self::Int8(_) => ElementType::Int8,
            Self::Uint8(_) => ElementType::Uint8,
            Self::Int16(_) => ElementType::Int16,
            Self::Uint16(_) => ElementType::Uint16,
            Self::Int32(_) => ElementType::Int32,
            Self::Uint32(_) => ElementType::Uint32,
            Self::Int64(_) => ElementType::Int64,
            Self::Uint64(_) => ElementType::Uint64,
            Self::Bool(_) => ElementType::Bool,
            Self::Float16(_) => ElementType::Float16,
            Self::BFloat16(_) => ElementType::BFloat16,
            Self::String(_) => ElementType::String,
        }
    }

    pub fn len(&self) -> usize {
        for_each_numeric!(self, d => d.len(), s => s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address and byte length of a numeric buffer; `None` for strings.
    fn raw_parts(&self) -> Option<(*const c_void, usize)> {
        for_each_numeric!(
            self,
            d => Some((d.as_ptr().cast::<c_void>(), size_of_val(&**d))),
            _s => None
        )
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::from_data(self)
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Self::String(s) => Some(&**s),
            _ => None,
        }
    }
}

impl<'a, T: Element> From<&'a [T]> for TensorData<'a> {
    fn from(data: &'a [T]) -> Self {
        T::into_data(Cow::Borrowed(data))
    }
}

impl<'a, T: Element> From<&'a Vec<T>> for TensorData<'a> {
    fn from(data: &'a Vec<T>) -> Self {
        T::into_data(Cow::Borrowed(data.as_slice()))
    }
}

impl<'a, T: Element, const N: usize> From<&'a [T; N]> for TensorData<'a> {
    fn from(data: &'a [T; N]) -> Self {
        T::into_data(Cow::Borrowed(data.as_slice()))
    }
}

impl<T: Element> From<Vec<T>> for TensorData<'static> {
    fn from(data: Vec<T>) -> Self {
        T::into_data(Cow::Owned(data))
    }
}

impl<'a> From<&'a [String]> for TensorData<'a> {
    fn from(data: &'a [String]) -> Self {
        Self::String(Cow::Borrowed(data))
    }
}

impl From<Vec<String>> for TensorData<'static> {
    fn from(data: Vec<String>) -> Self {
        Self::String(Cow::Owned(data))
    }
}

// ---------------------------------------------------------------------------
// Tensor / NamedValue
// ---------------------------------------------------------------------------

/// Element count of a concrete shape; `None` on a negative dimension or
/// when the count does not fit in `usize`.
pub(crate) fn element_count(shape: &[i64]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d).ok()?))
}

/// A shaped tensor ready to be fed to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<'a> {
    shape: Vec<i64>,
    data: TensorData<'a>,
}

impl<'a> Tensor<'a> {
    /// Creates a tensor, checking that `data` holds exactly as many
    /// elements as `shape` describes.
    pub fn new(shape: &[i64], data: impl Into<TensorData<'a>>) -> Result<Self, InferenceError> {
        let total = element_count(shape).ok_or_else(|| InferenceError::InvalidShape(shape.to_vec()))?;
        let data = data.into();
        if data.len() != total {
            return Err(InferenceError::DataLength {
                expected: total,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData<'a> {
        &self.data
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }
}

/// A named input value.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue<'a> {
    name: String,
    tensor: Tensor<'a>,
}

impl<'a> NamedValue<'a> {
    pub fn new(name: impl Into<String>, tensor: Tensor<'a>) -> Self {
        Self {
            name: name.into(),
            tensor,
        }
    }

    /// Shorthand for a tensor over a borrowed slice.
    pub fn from_slice<T: Element>(
        name: impl Into<String>,
        shape: &[i64],
        data: &'a [T],
    ) -> Result<Self, InferenceError> {
        Ok(Self::new(name, Tensor::new(shape, data)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensor(&self) -> &Tensor<'a> {
        &self.tensor
    }
}

// ---------------------------------------------------------------------------
// Input conversion
// ---------------------------------------------------------------------------

/// Keeps a caller buffer borrowed while a native tensor refers to it.
#[derive(Debug)]
pub(crate) struct PinnedBuffer<'v> {
    _data: &'v TensorData<'v>,
}

/// Native tensor built from a caller value for the duration of one run.
///
/// Fields drop in order: the native wrapper is released before the pin on
/// the caller's buffer ends. The buffer itself is never freed here.
#[derive(Debug)]
pub(crate) struct InputTensor<'v> {
    value: ValueHandle,
    pin: Option<PinnedBuffer<'v>>,
}

impl<'v> InputTensor<'v> {
    /// Wraps numeric data in place; copies strings into an engine-owned
    /// tensor.
    pub(crate) fn new(runtime: &Arc<dyn Runtime>, tensor: &'v Tensor<'v>) -> Result<Self, InferenceError> {
        match tensor.data.raw_parts() {
            Some((ptr, byte_len)) => {
                // SAFETY: `tensor` is borrowed for 'v and `pin` keeps that
                // borrow alive until after `value` is released.
                let raw = unsafe {
                    runtime.create_tensor(tensor.element_type(), &tensor.shape, ptr.cast_mut(), byte_len)?
                };
                Ok(Self {
                    value: ValueHandle::from_raw(runtime.clone(), raw),
                    pin: Some(PinnedBuffer { _data: &tensor.data }),
                })
            }
            None => {
                let strings = tensor.data.as_strings().unwrap_or_default();
                let owned = strings
                    .iter()
                    .map(|s| CString::new(s.as_str()).map_err(|_| InferenceError::InvalidString(s.clone())))
                    .collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<_> = owned.iter().map(|s| s.as_c_str()).collect();
                let raw = runtime.create_string_tensor(&tensor.shape, &refs)?;
                Ok(Self {
                    value: ValueHandle::from_raw(runtime.clone(), raw),
                    pin: None,
                })
            }
        }
    }

    pub(crate) fn value(&self) -> &ValueHandle {
        &self.value
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }
}

// ---------------------------------------------------------------------------
// DisposableNamedValue
// ---------------------------------------------------------------------------

/// An output value owned by the caller.
///
/// The native value is released by [`DisposableNamedValue::dispose`] or on
/// drop, whichever comes first.
#[derive(Debug)]
pub struct DisposableNamedValue {
    name: String,
    kind: ValueKind,
    element_type: ElementType,
    shape: Vec<i64>,
    len: usize,
    value: ValueHandle,
}

impl DisposableNamedValue {
    /// Takes ownership of `value` and reads its type and shape.
    pub(crate) fn from_handle(name: String, value: ValueHandle) -> Result<Self, InferenceError> {
        let rt = value.runtime().clone();
        let raw = value.get()?;

        let kind = rt.value_kind(raw)?;
        let (element_type, shape, len) = if kind.is_tensor_like() {
            let info = TensorInfoHandle::from_raw(rt.clone(), rt.value_tensor_info(raw)?);
            let (element_type, shape) = tensor_type_and_shape(rt.as_ref(), info.get()?)?;
            let len = element_count(&shape).ok_or_else(|| InferenceError::InvalidShape(shape.clone()))?;
            (element_type, shape, len)
        } else {
            (ElementType::Undefined, Vec::new(), 0)
        };

        Ok(Self {
            name,
            kind,
            element_type,
            shape,
            len,
            value,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_tensor(&self, expected: ElementType) -> Result<(), InferenceError> {
        if self.kind != ValueKind::Tensor {
            return Err(InferenceError::NotATensor(self.name.clone()));
        }
        if self.element_type != expected {
            return Err(InferenceError::TypeMismatch {
                name: self.name.clone(),
                expected,
                actual: self.element_type,
            });
        }
        Ok(())
    }

    /// Borrows the engine's buffer without copying.
    pub fn view<T: Element>(&self) -> Result<&[T], InferenceError> {
        self.check_tensor(T::TYPE)?;
        let raw = self.value.get()?;
        let len = self.len();
        if len == 0 {
            return Ok(&[]);
        }
        let ptr = self.value.runtime().tensor_data(raw)?;
        // SAFETY: the engine guarantees `len` elements of `T::TYPE` at `ptr`
        // for as long as the value is alive, and `&self` keeps it alive.
        Ok(unsafe { std::slice::from_raw_parts(ptr.cast::<T>(), len) })
    }

    /// Copies the tensor data.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, InferenceError> {
        Ok(self.view::<T>()?.to_vec())
    }

    /// Copies the contents of a string tensor.
    pub fn strings(&self) -> Result<Vec<String>, InferenceError> {
        self.check_tensor(ElementType::String)?;
        let raw = self.value.get()?;
        Ok(self.value.runtime().string_tensor_content(raw)?)
    }

    /// Releases the native value. Later data access fails with `Released`.
    pub fn dispose(&mut self) -> bool {
        self.value.release()
    }

    pub fn is_disposed(&self) -> bool {
        self.value.is_released()
    }
}

// ---------------------------------------------------------------------------
// SessionOutputs
// ---------------------------------------------------------------------------

/// Values returned by a run, in the order their names were requested.
#[derive(Debug, Default)]
pub struct SessionOutputs {
    values: Vec<DisposableNamedValue>,
}

impl SessionOutputs {
    pub(crate) fn new(values: Vec<DisposableNamedValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DisposableNamedValue> {
        self.values.iter().find(|v| v.name == name)
    }

    /// Takes one value out, leaving the others in order.
    pub fn remove(&mut self, name: &str) -> Option<DisposableNamedValue> {
        let pos = self.values.iter().position(|v| v.name == name)?;
        Some(self.values.remove(pos))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DisposableNamedValue> {
        self.values.iter()
    }

    pub fn into_vec(self) -> Vec<DisposableNamedValue> {
        self.values
    }
}

impl Index<usize> for SessionOutputs {
    type Output = DisposableNamedValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

impl IntoIterator for SessionOutputs {
    type Item = DisposableNamedValue;
    type IntoIter = std::vec::IntoIter<DisposableNamedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'s> IntoIterator for &'s SessionOutputs {
    type Item = &'s DisposableNamedValue;
    type IntoIter = std::slice::Iter<'s, DisposableNamedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
