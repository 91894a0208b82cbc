//! Input and output metadata read from a loaded session.

use std::collections::HashMap;

use tracing::debug;

use crate::element::ElementType;
use crate::error::InferenceError;
use crate::handle::{SessionHandle, TypeInfoHandle};
use crate::runtime::{RawHandle, Runtime, ValueKind};

/// Declared kind, shape and element type of a session input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub kind: ValueKind,
    /// Dimension sizes; -1 marks a symbolic dimension.
    pub dimensions: Vec<i64>,
    pub element_type: ElementType,
}

impl NodeMetadata {
    pub fn is_tensor(&self) -> bool {
        self.kind.is_tensor_like()
    }

    /// Reports whether any dimension is symbolic.
    pub fn is_dynamic(&self) -> bool {
        self.dimensions.iter().any(|&d| d < 0)
    }

    /// Checks a concrete shape against the declared one. Symbolic dimensions
    /// match any size.
    pub fn accepts_shape(&self, shape: &[i64]) -> bool {
        self.dimensions.len() == shape.len()
            && self
                .dimensions
                .iter()
                .zip(shape)
                .all(|(&declared, &actual)| declared < 0 || declared == actual)
    }
}

/// Name-keyed metadata in declaration order.
///
/// An entry whose tensor info the engine did not provide is kept with no
/// metadata: [`MetadataMap::contains`] is true for it while
/// [`MetadataMap::get`] returns `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMap {
    entries: Vec<(String, Option<NodeMetadata>)>,
    index: HashMap<String, usize>,
}

impl MetadataMap {
    pub(crate) fn insert(&mut self, name: String, meta: Option<NodeMetadata>) -> Result<(), InferenceError> {
        if self.index.contains_key(&name) {
            return Err(InferenceError::DuplicateName(name));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((name, meta));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&NodeMetadata> {
        self.index
            .get(name)
            .and_then(|&i| self.entries[i].1.as_ref())
    }

    /// Position of `name` in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&NodeMetadata>)> {
        self.entries
            .iter()
            .map(|(name, meta)| (name.as_str(), meta.as_ref()))
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Input,
    Output,
}

pub(crate) fn load_inputs(session: &SessionHandle) -> Result<MetadataMap, InferenceError> {
    load(session, Side::Input)
}

pub(crate) fn load_outputs(session: &SessionHandle) -> Result<MetadataMap, InferenceError> {
    load(session, Side::Output)
}

fn load(session: &SessionHandle, side: Side) -> Result<MetadataMap, InferenceError> {
    let rt = session.runtime();
    let raw = session.get()?;

    let count = match side {
        Side::Input => rt.input_count(raw)?,
        Side::Output => rt.output_count(raw)?,
    };

    let mut map = MetadataMap::default();
    for i in 0..count {
        let (name, type_info) = match side {
            Side::Input => (rt.input_name(raw, i)?, rt.input_type_info(raw, i)?),
            Side::Output => (rt.output_name(raw, i)?, rt.output_type_info(raw, i)?),
        };
        let type_info = TypeInfoHandle::from_raw(rt.clone(), type_info);
        let meta = extract(&type_info)?;
        if meta.is_none() {
            debug!(?side, %name, "tensor info unavailable");
        }
        map.insert(name, meta)?;
    }
    Ok(map)
}

/// Translates native type info into [`NodeMetadata`].
///
/// Returns `Ok(None)` when the engine reports a tensor kind but hands back
/// no tensor info.
pub(crate) fn extract(type_info: &TypeInfoHandle) -> Result<Option<NodeMetadata>, InferenceError> {
    let rt = type_info.runtime();
    let raw = type_info.get()?;

    let kind = rt.type_info_kind(raw)?;
    if !kind.is_tensor_like() {
        return Ok(Some(NodeMetadata {
            kind,
            dimensions: Vec::new(),
            element_type: ElementType::Undefined,
        }));
    }

    let Some(tensor_info) = rt.cast_to_tensor_info(raw)? else {
        return Ok(None);
    };
    let (element_type, dimensions) = tensor_type_and_shape(rt.as_ref(), tensor_info)?;
    Ok(Some(NodeMetadata {
        kind,
        dimensions,
        element_type,
    }))
}

/// Reads element type and dimensions from native tensor info.
pub(crate) fn tensor_type_and_shape(
    rt: &dyn Runtime,
    tensor_info: RawHandle,
) -> Result<(ElementType, Vec<i64>), InferenceError> {
    let element_type = ElementType::from_code(rt.tensor_element_type(tensor_info)?)?;
    let ndim = rt.dimensions_count(tensor_info)?;
    let mut dims = vec![0i64; ndim];
    if ndim > 0 {
        rt.dimensions(tensor_info, &mut dims)?;
    }
    Ok((element_type, dims))
}
