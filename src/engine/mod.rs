//! Neural network execution engine seam
//!
//! The session cache does not talk to a runtime directly; it is handed an
//! [`InferenceEngine`] at construction. [`OrtEngine`] is the production
//! implementation on ONNX Runtime.

mod onnx;

#[cfg(test)]
pub(crate) mod mock;

pub use self::onnx::{BackendPreference, OrtEngine};

use crate::catalog::ModelDescriptor;
use crate::codec::{InputTensor, OutputTensor};

/// Engine errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("no usable execution backend")]
    NoBackend,
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("input shape {actual} does not match model input {expected}")]
    InputShape { expected: String, actual: String },
}

/// Execution backend a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Cuda,
    CoreMl,
    DirectMl,
    /// Portable fallback
    Cpu,
}

impl Backend {
    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Backend::Cpu)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Cuda => "CUDA",
            Backend::CoreMl => "CoreML",
            Backend::DirectMl => "DirectML",
            Backend::Cpu => "CPU",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Compiles model weights into executable sessions.
///
/// Calls block; the session cache runs them on the blocking pool.
pub trait InferenceEngine: Send + Sync {
    /// Backend new sessions will be bound to
    fn backend(&self) -> Backend;

    fn create_session(
        &self,
        descriptor: &ModelDescriptor,
        weights: &[u8],
    ) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// A compiled model. Not reentrant: callers serialize `run`.
pub trait EngineSession: Send {
    fn backend(&self) -> Backend;

    fn run(&mut self, input: InputTensor) -> Result<OutputTensor, EngineError>;
}
