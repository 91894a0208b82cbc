//! Environment and inference session.

use std::collections::HashSet;
use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::element::ElementType;
use crate::error::{InferenceError, Status, StatusCode};
use crate::handle::{EnvHandle, RunOptionsHandle, SessionHandle, ValueHandle};
use crate::metadata::{self, MetadataMap};
use crate::options::{LogLevel, RunOptions, SessionOptions};
use crate::runtime::{RawHandle, Runtime};
use crate::value::{DisposableNamedValue, InputTensor, NamedValue, SessionOutputs};

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Engine environment. Create one per process and share it between
/// sessions.
#[derive(Debug)]
pub struct Environment {
    name: String,
    handle: EnvHandle,
}

impl Environment {
    /// Creates the native environment on `runtime`.
    pub fn new(runtime: Arc<dyn Runtime>, name: &str, level: LogLevel) -> Result<Self, InferenceError> {
        let c_name = CString::new(name).map_err(|_| InferenceError::InvalidName(name.to_string()))?;
        let raw = runtime.create_env(&c_name, level)?;
        Ok(Self {
            name: name.to_string(),
            handle: EnvHandle::from_raw(runtime, raw),
        })
    }

    /// Creates an environment on the shared ONNX Runtime instance.
    #[cfg(feature = "ort")]
    pub fn ort(name: &str) -> Result<Self, InferenceError> {
        Self::new(crate::ort::OrtRuntime::shared()?, name, LogLevel::Warning)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        self.handle.runtime()
    }

    fn raw(&self) -> Result<RawHandle, InferenceError> {
        self.handle.get()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A loaded model.
///
/// `run` takes `&self`; a session may be shared between threads and run
/// concurrently. Metadata is read once at load time and never changes.
#[derive(Debug)]
pub struct Session {
    env: Arc<Environment>,
    inputs: MetadataMap,
    outputs: MetadataMap,
    run_options: RunOptionsHandle,
    handle: SessionHandle,
}

impl Session {
    /// Loads a model from a file.
    pub fn from_file(
        env: &Arc<Environment>,
        path: impl AsRef<Path>,
        options: &SessionOptions,
    ) -> Result<Self, InferenceError> {
        let path = path.as_ref();
        let model = path.display().to_string();
        let raw = env
            .runtime()
            .create_session(env.raw()?, path, options)
            .map_err(|status| InferenceError::Load {
                model: model.clone(),
                status,
            })?;
        Self::init(env, raw, &model)
    }

    /// Loads a model from in-memory ONNX data.
    pub fn from_memory(
        env: &Arc<Environment>,
        model_data: &[u8],
        options: &SessionOptions,
    ) -> Result<Self, InferenceError> {
        if model_data.is_empty() {
            return Err(InferenceError::EmptyData);
        }
        let raw = env
            .runtime()
            .create_session_from_memory(env.raw()?, model_data, options)
            .map_err(|status| InferenceError::Load {
                model: "<memory>".into(),
                status,
            })?;
        Self::init(env, raw, "<memory>")
    }

    fn init(env: &Arc<Environment>, raw: RawHandle, model: &str) -> Result<Self, InferenceError> {
        let rt = env.runtime();
        // Released on any early return below.
        let handle = SessionHandle::from_raw(rt.clone(), raw);

        let inputs = metadata::load_inputs(&handle)?;
        let outputs = metadata::load_outputs(&handle)?;
        let run_options = RunOptionsHandle::from_raw(rt.clone(), rt.create_run_options(&RunOptions::default())?);

        debug!(model, inputs = inputs.len(), outputs = outputs.len(), "session loaded");
        Ok(Self {
            env: env.clone(),
            inputs,
            outputs,
            run_options,
            handle,
        })
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn input_metadata(&self) -> &MetadataMap {
        &self.inputs
    }

    pub fn output_metadata(&self) -> &MetadataMap {
        &self.outputs
    }

    /// Runs the model, returning every declared output.
    pub fn run(&self, inputs: &[NamedValue<'_>]) -> Result<SessionOutputs, InferenceError> {
        let names: Vec<&str> = self.outputs.names().collect();
        self.execute(inputs, &names, None)
    }

    /// Runs the model, returning the named outputs in the order given.
    pub fn run_with_outputs(
        &self,
        inputs: &[NamedValue<'_>],
        output_names: &[&str],
    ) -> Result<SessionOutputs, InferenceError> {
        self.execute(inputs, output_names, None)
    }

    pub fn run_with_options(
        &self,
        inputs: &[NamedValue<'_>],
        output_names: &[&str],
        options: &RunOptions,
    ) -> Result<SessionOutputs, InferenceError> {
        self.execute(inputs, output_names, Some(options))
    }

    fn execute(
        &self,
        inputs: &[NamedValue<'_>],
        output_names: &[&str],
        options: Option<&RunOptions>,
    ) -> Result<SessionOutputs, InferenceError> {
        let session = self.handle.get()?;
        let default_options = self.run_options.get()?;
        self.validate(inputs, output_names)?;

        let input_names = to_cstrings(inputs.iter().map(|v| v.name()))?;
        let output_cnames = to_cstrings(output_names.iter().copied())?;
        let input_refs: Vec<_> = input_names.iter().map(|s| s.as_c_str()).collect();
        let output_refs: Vec<_> = output_cnames.iter().map(|s| s.as_c_str()).collect();

        let rt = self.handle.runtime();
        let call_options = match options {
            Some(o) => Some(RunOptionsHandle::from_raw(rt.clone(), rt.create_run_options(o)?)),
            None => None,
        };
        let run_options = match &call_options {
            Some(h) => h.get()?,
            None => default_options,
        };

        // Dropping `prepared` releases each native input and then ends the
        // borrow of its caller buffer, on every exit path.
        let prepared = inputs
            .iter()
            .map(|v| InputTensor::new(rt, v.tensor()))
            .collect::<Result<Vec<_>, _>>()?;
        let raw_inputs = prepared
            .iter()
            .map(|t| t.value().get())
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            inputs = prepared.len(),
            pinned = prepared.iter().filter(|t| t.is_pinned()).count(),
            outputs = output_names.len(),
            "run"
        );

        let mut slots = OutputSlots::new(rt.clone(), output_names.len());
        let result = rt.run(
            session,
            Some(run_options),
            &input_refs,
            &raw_inputs,
            &output_refs,
            &mut slots.slots,
        );
        drop(prepared);
        drop(call_options);

        if let Err(status) = result {
            let reclaimed = slots.release_all();
            if reclaimed > 0 {
                warn!(reclaimed, "released outputs of failed run");
            }
            return Err(InferenceError::Execution(status));
        }

        let mut values = Vec::with_capacity(output_names.len());
        for (&name, handle) in output_names.iter().zip(slots.into_handles()) {
            let handle = handle.ok_or_else(|| {
                InferenceError::Native(Status::new(
                    StatusCode::EngineError,
                    format!("no value returned for output {name:?}"),
                ))
            })?;
            values.push(DisposableNamedValue::from_handle(name.to_string(), handle)?);
        }
        Ok(SessionOutputs::new(values))
    }

    fn validate(&self, inputs: &[NamedValue<'_>], output_names: &[&str]) -> Result<(), InferenceError> {
        let mut seen = HashSet::new();
        for input in inputs {
            let name = input.name();
            if !self.inputs.contains(name) {
                return Err(InferenceError::UnknownInput(name.to_string()));
            }
            if !seen.insert(name) {
                return Err(InferenceError::DuplicateName(name.to_string()));
            }
            let Some(meta) = self.inputs.get(name) else {
                continue;
            };
            if !meta.is_tensor() {
                continue;
            }
            let tensor = input.tensor();
            if meta.element_type != ElementType::Undefined && meta.element_type != tensor.element_type() {
                return Err(InferenceError::TypeMismatch {
                    name: name.to_string(),
                    expected: meta.element_type,
                    actual: tensor.element_type(),
                });
            }
            if !meta.accepts_shape(tensor.shape()) {
                return Err(InferenceError::ShapeMismatch {
                    name: name.to_string(),
                    expected: meta.dimensions.clone(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }

        let mut seen = HashSet::new();
        for &name in output_names {
            if !self.outputs.contains(name) {
                return Err(InferenceError::UnknownOutput(name.to_string()));
            }
            if !seen.insert(name) {
                return Err(InferenceError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }

    /// Releases the native session. Calling it again does nothing; runs
    /// after close fail with `Released`.
    pub fn close(&mut self) {
        if self.handle.is_released() {
            return;
        }
        self.run_options.release();
        self.handle.release();
        debug!(env = self.env.name(), "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn to_cstrings<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<CString>, InferenceError> {
    names
        .map(|n| CString::new(n).map_err(|_| InferenceError::InvalidName(n.to_string())))
        .collect()
}

/// Output slots filled by the engine. Anything still held when the slots
/// drop is released.
struct OutputSlots {
    runtime: Arc<dyn Runtime>,
    slots: Vec<Option<RawHandle>>,
}

impl OutputSlots {
    fn new(runtime: Arc<dyn Runtime>, n: usize) -> Self {
        Self {
            runtime,
            slots: vec![None; n],
        }
    }

    fn release_all(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if let Some(raw) = slot.take() {
                self.runtime.release_value(raw);
                released += 1;
            }
        }
        released
    }

    fn into_handles(mut self) -> Vec<Option<ValueHandle>> {
        std::mem::take(&mut self.slots)
            .into_iter()
            .map(|slot| slot.map(|raw| ValueHandle::from_raw(self.runtime.clone(), raw)))
            .collect()
    }
}

impl Drop for OutputSlots {
    fn drop(&mut self) {
        self.release_all();
    }
}
