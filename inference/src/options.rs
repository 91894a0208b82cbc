//! Session, run and environment configuration.

use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// Engine log severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose = 0,
    Info = 1,
    #[default]
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphOptimizationLevel {
    Disabled = 0,
    Basic = 1,
    Extended = 2,
    #[default]
    All = 99,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential = 0,
    Parallel = 1,
}

/// Hardware backend the engine should try, in the order given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cpu,
    Cuda {
        #[serde(default)]
        device_id: i32,
    },
}

/// Configuration applied when a session is created.
///
/// ```
/// use giztoy_inference::{GraphOptimizationLevel, SessionOptions};
///
/// let opts = SessionOptions::default()
///     .with_optimization_level(GraphOptimizationLevel::Basic)
///     .with_intra_threads(2);
/// assert_eq!(opts.intra_op_threads, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub optimization_level: GraphOptimizationLevel,
    /// Threads used within an operator. Zero lets the engine decide.
    pub intra_op_threads: u16,
    /// Threads used across operators in parallel mode. Zero lets the engine decide.
    pub inter_op_threads: u16,
    pub execution_mode: ExecutionMode,
    pub execution_providers: Vec<ExecutionProvider>,
    pub cpu_mem_arena: bool,
    pub mem_pattern: bool,
    pub log_id: Option<String>,
    pub log_level: LogLevel,
    /// Enables profiling, writing files with this prefix.
    pub profile_prefix: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            optimization_level: GraphOptimizationLevel::default(),
            intra_op_threads: 0,
            inter_op_threads: 0,
            execution_mode: ExecutionMode::default(),
            execution_providers: vec![ExecutionProvider::Cpu],
            cpu_mem_arena: true,
            mem_pattern: true,
            log_id: None,
            log_level: LogLevel::default(),
            profile_prefix: None,
        }
    }
}

impl SessionOptions {
    /// Parses options from JSON. Missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self, InferenceError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn with_optimization_level(mut self, level: GraphOptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_intra_threads(mut self, n: u16) -> Self {
        self.intra_op_threads = n;
        self
    }

    pub fn with_inter_threads(mut self, n: u16) -> Self {
        self.inter_op_threads = n;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_execution_providers(mut self, providers: impl Into<Vec<ExecutionProvider>>) -> Self {
        self.execution_providers = providers.into();
        self
    }

    pub fn with_cpu_mem_arena(mut self, enabled: bool) -> Self {
        self.cpu_mem_arena = enabled;
        self
    }

    pub fn with_mem_pattern(mut self, enabled: bool) -> Self {
        self.mem_pattern = enabled;
        self
    }

    pub fn with_log_id(mut self, id: impl Into<String>) -> Self {
        self.log_id = Some(id.into());
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_profiling(mut self, prefix: impl Into<String>) -> Self {
        self.profile_prefix = Some(prefix.into());
        self
    }
}

/// Per-call knobs forwarded to the engine as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub tag: Option<String>,
    pub log_level: LogLevel,
    /// Asks the engine to abort runs using these options.
    pub terminate: bool,
}

impl RunOptions {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_terminate(mut self, terminate: bool) -> Self {
        self.terminate = terminate;
        self
    }
}
