use std::fmt;

use thiserror::Error;

/// Error code reported by the native engine alongside a failed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Fail,
    InvalidArgument,
    NoSuchFile,
    NoModel,
    EngineError,
    RuntimeException,
    InvalidProtobuf,
    ModelLoaded,
    NotImplemented,
    InvalidGraph,
    EpFail,
    Unknown(i32),
}

impl StatusCode {
    /// Maps a raw `OrtErrorCode` value.
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => Self::Fail,
            2 => Self::InvalidArgument,
            3 => Self::NoSuchFile,
            4 => Self::NoModel,
            5 => Self::EngineError,
            6 => Self::RuntimeException,
            7 => Self::InvalidProtobuf,
            8 => Self::ModelLoaded,
            9 => Self::NotImplemented,
            10 => Self::InvalidGraph,
            11 => Self::EpFail,
            other => Self::Unknown(other),
        }
    }
}

/// A non-success status returned by a native call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.code)
    }
}

impl std::error::Error for Status {}

/// Errors returned by inference sessions and tensor values.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference: load {model}: {status}")]
    Load { model: String, status: Status },

    #[error("inference: empty model data")]
    EmptyData,

    #[error("inference: run: {0}")]
    Execution(Status),

    #[error("inference: {0}")]
    Native(Status),

    #[error("inference: input {0:?} not declared by the model")]
    UnknownInput(String),

    #[error("inference: output {0:?} not declared by the model")]
    UnknownOutput(String),

    #[error("inference: name {0:?} given more than once")]
    DuplicateName(String),

    #[error("inference: invalid name {0:?}")]
    InvalidName(String),

    #[error("inference: {name:?} is {actual:?}, expected {expected:?}")]
    TypeMismatch {
        name: String,
        expected: crate::ElementType,
        actual: crate::ElementType,
    },

    #[error("inference: {name:?} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("inference: invalid tensor shape {0:?}")]
    InvalidShape(Vec<i64>),

    #[error("inference: string element contains NUL: {0:?}")]
    InvalidString(String),

    #[error("inference: tensor data length {actual} does not match shape (need {expected})")]
    DataLength { expected: usize, actual: usize },

    #[error("inference: {0:?} is not a tensor")]
    NotATensor(String),

    #[error("inference: unsupported element type code {0}")]
    UnsupportedElementType(i32),

    #[error("inference: native handle already released")]
    Released,

    #[error("inference: session options: {0}")]
    Config(#[from] serde_json::Error),
}

impl InferenceError {
    /// Reports whether the error was caused by the caller's arguments rather
    /// than by the engine.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::UnknownInput(_)
                | Self::UnknownOutput(_)
                | Self::DuplicateName(_)
                | Self::InvalidName(_)
                | Self::TypeMismatch { .. }
                | Self::ShapeMismatch { .. }
                | Self::InvalidShape(_)
                | Self::InvalidString(_)
                | Self::DataLength { .. }
                | Self::NotATensor(_)
                | Self::Released
        )
    }
}

impl From<Status> for InferenceError {
    fn from(status: Status) -> Self {
        Self::Native(status)
    }
}
