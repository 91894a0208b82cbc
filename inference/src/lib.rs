//! Session-based inference over a native engine.
//!
//! A [`Session`] owns one loaded model. It reads input and output metadata
//! once at load time and runs the model synchronously: caller tensors are
//! wrapped in native tensors without copying for the duration of the call,
//! and outputs come back as [`DisposableNamedValue`]s that release their
//! native value when dropped.
//!
//! The engine is reached through the [`Runtime`] trait. With the `ort`
//! feature the crate provides [`OrtRuntime`], which talks to ONNX Runtime
//! through a thin C shim.
//!
//! # Usage
//!
//! ```no_run
//! # #[cfg(feature = "ort")]
//! # fn main() -> Result<(), giztoy_inference::InferenceError> {
//! use std::sync::Arc;
//! use giztoy_inference::{Environment, NamedValue, Session, SessionOptions};
//!
//! let env = Arc::new(Environment::ort("myapp")?);
//! let session = Session::from_file(&env, "speaker.onnx", &SessionOptions::default())?;
//!
//! let feats = vec![0.0f32; 40 * 80];
//! let input = NamedValue::from_slice("x", &[1, 40, 80], &feats)?;
//! let outputs = session.run_with_outputs(&[input], &["embedding"])?;
//! let embedding = outputs[0].to_vec::<f32>()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "ort"))]
//! # fn main() {}
//! ```
//!
//! # Dynamic Linking
//!
//! With `ort`, ONNX Runtime is linked dynamically. Point `ORT_LIB_DIR` and
//! `ORT_INCLUDE_DIR` at a pre-built release when building.

mod element;
mod error;
pub mod handle;
mod metadata;
mod options;
mod runtime;
mod session;
mod value;

#[cfg(feature = "ort")]
mod ffi;
#[cfg(feature = "ort")]
mod ort;

#[cfg(test)]
mod fake;

pub use element::{Element, ElementType};
pub use half::{bf16, f16};
pub use error::{InferenceError, Status, StatusCode};
pub use metadata::{MetadataMap, NodeMetadata};
pub use options::{ExecutionMode, ExecutionProvider, GraphOptimizationLevel, LogLevel, RunOptions, SessionOptions};
pub use runtime::{RawHandle, Runtime, ValueKind};
pub use session::{Environment, Session};
pub use value::{DisposableNamedValue, NamedValue, SessionOutputs, Tensor, TensorData};

#[cfg(feature = "ort")]
pub use ort::OrtRuntime;
