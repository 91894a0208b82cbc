//! In-process engine for unit tests.
//!
//! Models are scripted: declared inputs/outputs plus a compute closure.
//! Every handle the fake hands out is tracked, so tests can assert that
//! each one is released exactly once.

use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::element::ElementType;
use crate::error::{Status, StatusCode};
use crate::options::{LogLevel, RunOptions, SessionOptions};
use crate::runtime::{RawHandle, Runtime, ValueKind};
use crate::value::element_count;

// ---------------------------------------------------------------------------
// Model description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct FakeNode {
    name: String,
    kind: ValueKind,
    element: i32,
    dims: Vec<i64>,
    tensor_info: bool,
}

impl FakeNode {
    pub fn tensor(name: &str, element: ElementType, dims: &[i64]) -> Self {
        Self::with_code(name, element.code(), dims)
    }

    pub fn with_code(name: &str, code: i32, dims: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            kind: ValueKind::Tensor,
            element: code,
            dims: dims.to_vec(),
            tensor_info: true,
        }
    }

    pub fn non_tensor(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            element: 0,
            dims: Vec::new(),
            tensor_info: false,
        }
    }

    /// The engine reports a tensor but returns no tensor info for it.
    pub fn without_tensor_info(mut self) -> Self {
        self.tensor_info = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FakeTensor {
    pub kind: ValueKind,
    pub element: ElementType,
    pub shape: Vec<i64>,
    pub bytes: Vec<u8>,
    pub strings: Vec<String>,
}

impl FakeTensor {
    pub fn f32(shape: &[i64], data: &[f32]) -> Self {
        Self {
            kind: ValueKind::Tensor,
            element: ElementType::Float32,
            shape: shape.to_vec(),
            bytes: data.iter().flat_map(|v| v.to_ne_bytes()).collect(),
            strings: Vec::new(),
        }
    }

    pub fn i64(shape: &[i64], data: &[i64]) -> Self {
        Self {
            kind: ValueKind::Tensor,
            element: ElementType::Int64,
            shape: shape.to_vec(),
            bytes: data.iter().flat_map(|v| v.to_ne_bytes()).collect(),
            strings: Vec::new(),
        }
    }

    /// A numeric tensor from its native-endian bytes.
    pub fn raw(element: ElementType, shape: &[i64], bytes: Vec<u8>) -> Self {
        Self {
            kind: ValueKind::Tensor,
            element,
            shape: shape.to_vec(),
            bytes,
            strings: Vec::new(),
        }
    }

    pub fn strings(shape: &[i64], data: &[String]) -> Self {
        Self {
            kind: ValueKind::Tensor,
            element: ElementType::String,
            shape: shape.to_vec(),
            bytes: Vec::new(),
            strings: data.to_vec(),
        }
    }

    pub fn other(kind: ValueKind) -> Self {
        Self {
            kind,
            element: ElementType::Undefined,
            shape: Vec::new(),
            bytes: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn floats(&self) -> Vec<f32> {
        self.bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

type Compute = dyn Fn(&[(String, FakeTensor)], &[String]) -> Result<Vec<FakeTensor>, String> + Send + Sync;

pub(crate) struct FakeModel {
    inputs: Vec<FakeNode>,
    outputs: Vec<FakeNode>,
    compute: Arc<Compute>,
    failure: Option<(String, usize)>,
}

impl FakeModel {
    /// A model whose float outputs are filled with the sum of all float
    /// inputs plus the output's declaration index, and whose string outputs
    /// echo every string input.
    pub fn new(inputs: Vec<FakeNode>, outputs: Vec<FakeNode>) -> Self {
        let declared = outputs.clone();
        let compute = move |feeds: &[(String, FakeTensor)], names: &[String]| {
            let sum: f32 = feeds
                .iter()
                .filter(|(_, t)| t.element == ElementType::Float32)
                .flat_map(|(_, t)| t.floats())
                .sum();
            let echoed: Vec<String> = feeds.iter().flat_map(|(_, t)| t.strings.clone()).collect();
            names
                .iter()
                .map(|name| {
                    let (pos, node) = declared
                        .iter()
                        .enumerate()
                        .find(|(_, n)| &n.name == name)
                        .ok_or_else(|| format!("no output {name}"))?;
                    if !node.kind.is_tensor_like() {
                        return Ok(FakeTensor::other(node.kind));
                    }
                    if node.element == ElementType::String.code() {
                        return Ok(FakeTensor::strings(&[echoed.len() as i64], &echoed));
                    }
                    let shape: Vec<i64> = node.dims.iter().map(|&d| if d < 0 { 1 } else { d }).collect();
                    let data = vec![sum + pos as f32; element_count(&shape).unwrap_or(0)];
                    Ok(FakeTensor::f32(&shape, &data))
                })
                .collect::<Result<Vec<_>, String>>()
        };
        Self {
            inputs,
            outputs,
            compute: Arc::new(compute),
            failure: None,
        }
    }

    pub fn with_compute<F>(mut self, f: F) -> Self
    where
        F: Fn(&[(String, FakeTensor)], &[String]) -> Result<Vec<FakeTensor>, String> + Send + Sync + 'static,
    {
        self.compute = Arc::new(f);
        self
    }

    /// Makes every run fail after writing `populated` output slots.
    pub fn failing(mut self, message: &str, populated: usize) -> Self {
        self.failure = Some((message.to_string(), populated));
        self
    }

    /// One float input "x" [1,3] and one float output "y" [1,2].
    pub fn simple() -> Self {
        Self::new(
            vec![FakeNode::tensor("x", ElementType::Float32, &[1, 3])],
            vec![FakeNode::tensor("y", ElementType::Float32, &[1, 2])],
        )
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeStats {
    pub envs_created: usize,
    pub envs_released: usize,
    pub sessions_created: usize,
    pub sessions_released: usize,
    pub type_infos_created: usize,
    pub type_infos_released: usize,
    pub tensor_infos_created: usize,
    pub tensor_infos_released: usize,
    pub inputs_created: usize,
    pub inputs_released: usize,
    pub outputs_created: usize,
    pub outputs_released: usize,
    pub run_options_created: usize,
    pub run_options_released: usize,
    pub runs: usize,
    pub last_run_options: Option<RunOptions>,
    pub last_session_options: Option<SessionOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Input,
    Output,
}

struct External(*const u8);

// Only dereferenced while the caller keeps the buffer pinned.
unsafe impl Send for External {}

enum Data {
    External(External, usize),
    // u64 backing keeps every element type aligned.
    Owned(Vec<u64>),
    Strings(Vec<String>),
    Empty,
}

struct FakeValue {
    origin: Origin,
    kind: ValueKind,
    element: ElementType,
    shape: Vec<i64>,
    data: Data,
}

enum Obj {
    Env,
    Session(Arc<FakeModel>),
    TypeInfo(FakeNode),
    TensorInfo(i32, Vec<i64>),
    Value(FakeValue),
    RunOptions(RunOptions),
}

#[derive(Default)]
struct State {
    next_id: usize,
    objects: HashMap<RawHandle, Obj>,
    models: HashMap<String, Arc<FakeModel>>,
    stats: FakeStats,
    double_releases: Vec<RawHandle>,
    fail_tensor_after: Option<usize>,
    fail_value_queries: bool,
}

impl State {
    fn alloc(&mut self, obj: Obj) -> RawHandle {
        self.next_id += 1;
        let ptr = std::ptr::without_provenance_mut::<c_void>(self.next_id << 4);
        let handle = RawHandle::new(ptr).expect("non-zero address");
        self.objects.insert(handle, obj);
        handle
    }

    fn model(&self, session: RawHandle) -> Result<Arc<FakeModel>, Status> {
        match self.objects.get(&session) {
            Some(Obj::Session(m)) => Ok(m.clone()),
            _ => Err(invalid("not a session")),
        }
    }

    fn tensor_desc(&self, info: RawHandle) -> Result<(i32, Vec<i64>), Status> {
        match self.objects.get(&info) {
            Some(Obj::TypeInfo(node)) if node.tensor_info => Ok((node.element, node.dims.clone())),
            Some(Obj::TensorInfo(code, dims)) => Ok((*code, dims.clone())),
            _ => Err(invalid("not tensor info")),
        }
    }

    fn value(&self, value: RawHandle) -> Result<&FakeValue, Status> {
        if self.fail_value_queries {
            return Err(Status::new(StatusCode::Fail, "value query failed"));
        }
        match self.objects.get(&value) {
            Some(Obj::Value(v)) => Ok(v),
            _ => Err(invalid("not a value")),
        }
    }

    fn output(&mut self, t: FakeTensor) -> RawHandle {
        self.stats.outputs_created += 1;
        let data = if t.element == ElementType::String {
            Data::Strings(t.strings)
        } else if t.kind.is_tensor_like() {
            let len = t.bytes.len();
            let mut words = vec![0u64; len.div_ceil(8)];
            // SAFETY: `words` holds at least `len` bytes.
            unsafe { std::ptr::copy_nonoverlapping(t.bytes.as_ptr(), words.as_mut_ptr().cast::<u8>(), len) };
            Data::Owned(words)
        } else {
            Data::Empty
        };
        self.alloc(Obj::Value(FakeValue {
            origin: Origin::Output,
            kind: t.kind,
            element: t.element,
            shape: t.shape,
            data,
        }))
    }

    fn remove(&mut self, handle: RawHandle) -> Option<Obj> {
        let obj = self.objects.remove(&handle);
        if obj.is_none() {
            self.double_releases.push(handle);
        }
        obj
    }
}

fn invalid(msg: &str) -> Status {
    Status::new(StatusCode::InvalidArgument, msg)
}

pub(crate) struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
        })
    }

    /// Serves `model` to sessions created from `path`, or from memory
    /// holding the bytes of `path`.
    pub fn register(&self, path: &str, model: FakeModel) {
        self.state.lock().models.insert(path.to_string(), Arc::new(model));
    }

    pub fn stats(&self) -> FakeStats {
        self.state.lock().stats.clone()
    }

    pub fn live_handles(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn double_releases(&self) -> Vec<RawHandle> {
        self.state.lock().double_releases.clone()
    }

    /// Fails tensor creation once `n` tensors have been created.
    pub fn fail_tensor_creation_after(&self, n: usize) {
        self.state.lock().fail_tensor_after = Some(n);
    }

    pub fn fail_value_queries(&self, fail: bool) {
        self.state.lock().fail_value_queries = fail;
    }

    /// Address the engine sees for a value's data.
    pub fn data_address(&self, value: RawHandle) -> Option<*const u8> {
        match self.state.lock().objects.get(&value) {
            Some(Obj::Value(FakeValue {
                data: Data::External(ptr, _),
                ..
            })) => Some(ptr.0),
            _ => None,
        }
    }

    fn new_session(&self, key: &str, options: &SessionOptions) -> Result<RawHandle, Status> {
        let mut st = self.state.lock();
        let model = st
            .models
            .get(key)
            .cloned()
            .ok_or_else(|| Status::new(StatusCode::NoSuchFile, format!("load model from {key} failed")))?;
        st.stats.sessions_created += 1;
        st.stats.last_session_options = Some(options.clone());
        Ok(st.alloc(Obj::Session(model)))
    }

    fn create_input(&self, value: FakeValue) -> Result<RawHandle, Status> {
        let mut st = self.state.lock();
        if let Some(n) = st.fail_tensor_after {
            if st.stats.inputs_created >= n {
                return Err(Status::new(StatusCode::Fail, "tensor allocation failed"));
            }
        }
        st.stats.inputs_created += 1;
        Ok(st.alloc(Obj::Value(value)))
    }

    fn type_info(&self, session: RawHandle, index: usize, input: bool) -> Result<RawHandle, Status> {
        let mut st = self.state.lock();
        let model = st.model(session)?;
        let nodes = if input { &model.inputs } else { &model.outputs };
        let node = nodes.get(index).ok_or_else(|| invalid("index out of range"))?.clone();
        st.stats.type_infos_created += 1;
        Ok(st.alloc(Obj::TypeInfo(node)))
    }

    fn name(&self, session: RawHandle, index: usize, input: bool) -> Result<String, Status> {
        let model = self.state.lock().model(session)?;
        let nodes = if input { &model.inputs } else { &model.outputs };
        nodes
            .get(index)
            .map(|n| n.name.clone())
            .ok_or_else(|| invalid("index out of range"))
    }
}

impl Runtime for FakeRuntime {
    fn create_env(&self, _name: &CStr, _level: LogLevel) -> Result<RawHandle, Status> {
        let mut st = self.state.lock();
        st.stats.envs_created += 1;
        Ok(st.alloc(Obj::Env))
    }

    fn release_env(&self, env: RawHandle) {
        let mut st = self.state.lock();
        if st.remove(env).is_some() {
            st.stats.envs_released += 1;
        }
    }

    fn create_session(&self, _env: RawHandle, model_path: &Path, options: &SessionOptions) -> Result<RawHandle, Status> {
        self.new_session(&model_path.to_string_lossy(), options)
    }

    fn create_session_from_memory(
        &self,
        _env: RawHandle,
        model: &[u8],
        options: &SessionOptions,
    ) -> Result<RawHandle, Status> {
        self.new_session(&String::from_utf8_lossy(model), options)
    }

    fn release_session(&self, session: RawHandle) {
        let mut st = self.state.lock();
        if st.remove(session).is_some() {
            st.stats.sessions_released += 1;
        }
    }

    fn input_count(&self, session: RawHandle) -> Result<usize, Status> {
        Ok(self.state.lock().model(session)?.inputs.len())
    }

    fn output_count(&self, session: RawHandle) -> Result<usize, Status> {
        Ok(self.state.lock().model(session)?.outputs.len())
    }

    fn input_name(&self, session: RawHandle, index: usize) -> Result<String, Status> {
        self.name(session, index, true)
    }

    fn output_name(&self, session: RawHandle, index: usize) -> Result<String, Status> {
        self.name(session, index, false)
    }

    fn input_type_info(&self, session: RawHandle, index: usize) -> Result<RawHandle, Status> {
        self.type_info(session, index, true)
    }

    fn output_type_info(&self, session: RawHandle, index: usize) -> Result<RawHandle, Status> {
        self.type_info(session, index, false)
    }

    fn type_info_kind(&self, type_info: RawHandle) -> Result<ValueKind, Status> {
        match self.state.lock().objects.get(&type_info) {
            Some(Obj::TypeInfo(node)) => Ok(node.kind),
            _ => Err(invalid("not type info")),
        }
    }

    fn cast_to_tensor_info(&self, type_info: RawHandle) -> Result<Option<RawHandle>, Status> {
        match self.state.lock().objects.get(&type_info) {
            Some(Obj::TypeInfo(node)) => Ok(node.tensor_info.then_some(type_info)),
            _ => Err(invalid("not type info")),
        }
    }

    fn release_type_info(&self, type_info: RawHandle) {
        let mut st = self.state.lock();
        if st.remove(type_info).is_some() {
            st.stats.type_infos_released += 1;
        }
    }

    fn tensor_element_type(&self, tensor_info: RawHandle) -> Result<i32, Status> {
        Ok(self.state.lock().tensor_desc(tensor_info)?.0)
    }

    fn dimensions_count(&self, tensor_info: RawHandle) -> Result<usize, Status> {
        Ok(self.state.lock().tensor_desc(tensor_info)?.1.len())
    }

    fn dimensions(&self, tensor_info: RawHandle, out: &mut [i64]) -> Result<(), Status> {
        let dims = self.state.lock().tensor_desc(tensor_info)?.1;
        if out.len() != dims.len() {
            return Err(invalid("dimension buffer size mismatch"));
        }
        out.copy_from_slice(&dims);
        Ok(())
    }

    unsafe fn create_tensor(
        &self,
        element: ElementType,
        shape: &[i64],
        data: *mut c_void,
        byte_len: usize,
    ) -> Result<RawHandle, Status> {
        if element_count(shape).and_then(|n| n.checked_mul(element.width())) != Some(byte_len) {
            return Err(invalid("buffer size does not match shape"));
        }
        self.create_input(FakeValue {
            origin: Origin::Input,
            kind: ValueKind::Tensor,
            element,
            shape: shape.to_vec(),
            data: Data::External(External(data.cast_const().cast::<u8>()), byte_len),
        })
    }

    fn create_string_tensor(&self, shape: &[i64], strings: &[&CStr]) -> Result<RawHandle, Status> {
        self.create_input(FakeValue {
            origin: Origin::Input,
            kind: ValueKind::Tensor,
            element: ElementType::String,
            shape: shape.to_vec(),
            data: Data::Strings(strings.iter().map(|s| s.to_string_lossy().into_owned()).collect()),
        })
    }

    fn value_kind(&self, value: RawHandle) -> Result<ValueKind, Status> {
        Ok(self.state.lock().value(value)?.kind)
    }

    fn value_tensor_info(&self, value: RawHandle) -> Result<RawHandle, Status> {
        let mut st = self.state.lock();
        let v = st.value(value)?;
        let desc = Obj::TensorInfo(v.element.code(), v.shape.clone());
        st.stats.tensor_infos_created += 1;
        Ok(st.alloc(desc))
    }

    fn release_tensor_info(&self, tensor_info: RawHandle) {
        let mut st = self.state.lock();
        if st.remove(tensor_info).is_some() {
            st.stats.tensor_infos_released += 1;
        }
    }

    fn tensor_data(&self, value: RawHandle) -> Result<*const c_void, Status> {
        let st = self.state.lock();
        match &st.value(value)?.data {
            Data::External(ptr, _) => Ok(ptr.0.cast::<c_void>()),
            Data::Owned(words) => Ok(words.as_ptr().cast::<c_void>()),
            _ => Err(invalid("not a numeric tensor")),
        }
    }

    fn string_tensor_content(&self, value: RawHandle) -> Result<Vec<String>, Status> {
        let st = self.state.lock();
        match &st.value(value)?.data {
            Data::Strings(s) => Ok(s.clone()),
            _ => Err(invalid("not a string tensor")),
        }
    }

    fn create_run_options(&self, options: &RunOptions) -> Result<RawHandle, Status> {
        let mut st = self.state.lock();
        st.stats.run_options_created += 1;
        Ok(st.alloc(Obj::RunOptions(options.clone())))
    }

    fn release_run_options(&self, run_options: RawHandle) {
        let mut st = self.state.lock();
        if st.remove(run_options).is_some() {
            st.stats.run_options_released += 1;
        }
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
        let mut st = self.state.lock();
        st.stats.runs += 1;
        let last = match run_options.and_then(|h| st.objects.get(&h)) {
            Some(Obj::RunOptions(ro)) => Some(ro.clone()),
            _ => None,
        };
        st.stats.last_run_options = last;
        let model = st.model(session)?;
        if input_names.len() != inputs.len() || output_names.len() != outputs.len() {
            return Err(invalid("argument count mismatch"));
        }

        let mut feeds = Vec::with_capacity(inputs.len());
        for (name, &handle) in input_names.iter().zip(inputs) {
            let name = name.to_string_lossy().into_owned();
            if !model.inputs.iter().any(|n| n.name == name) {
                return Err(invalid(&format!("invalid input name: {name}")));
            }
            let Some(Obj::Value(v)) = st.objects.get(&handle) else {
                return Err(invalid("not a value"));
            };
            let tensor = match &v.data {
                Data::External(ptr, len) => {
                    // SAFETY: the buffer is pinned by the caller for the run.
                    let bytes = unsafe { std::slice::from_raw_parts(ptr.0, *len) };
                    FakeTensor {
                        kind: v.kind,
                        element: v.element,
                        shape: v.shape.clone(),
                        bytes: bytes.to_vec(),
                        strings: Vec::new(),
                    }
                }
                Data::Strings(s) => FakeTensor::strings(&v.shape, s),
                _ => return Err(invalid("unsupported input value")),
            };
            feeds.push((name, tensor));
        }

        if let Some((message, populated)) = &model.failure {
            for slot in outputs.iter_mut().take(*populated) {
                *slot = Some(st.output(FakeTensor::f32(&[1], &[0.0])));
            }
            return Err(Status::new(StatusCode::RuntimeException, message.clone()));
        }

        let names: Vec<String> = output_names
            .iter()
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        let results = (model.compute)(&feeds, &names).map_err(|m| Status::new(StatusCode::RuntimeException, m))?;
        if results.len() != outputs.len() {
            return Err(Status::new(StatusCode::EngineError, "wrong number of results"));
        }
        for (slot, t) in outputs.iter_mut().zip(results) {
            *slot = Some(st.output(t));
        }
        Ok(())
    }

    fn release_value(&self, value: RawHandle) {
        let mut st = self.state.lock();
        match st.remove(value) {
            Some(Obj::Value(v)) if v.origin == Origin::Input => st.stats.inputs_released += 1,
            Some(Obj::Value(_)) => st.stats.outputs_released += 1,
            _ => {}
        }
    }
}
