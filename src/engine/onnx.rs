//! ONNX Runtime engine
//!
//! Requests the platform's accelerated execution provider first (CUDA on
//! Linux, CoreML on macOS, DirectML on Windows) and falls back to the CPU
//! provider. Backend availability is checked once, when the engine is built.

use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use serde::{Deserialize, Serialize};

use super::{Backend, EngineError, EngineSession, InferenceEngine};
use crate::catalog::ModelDescriptor;
use crate::codec::{InputTensor, OutputTensor, TensorShape};

/// Which backends the engine may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendPreference {
    /// Accelerated provider if present, CPU otherwise
    #[default]
    Auto,
    CpuOnly,
}

/// ONNX Runtime backed [`InferenceEngine`]
pub struct OrtEngine {
    backend: Backend,
    intra_threads: usize,
}

impl OrtEngine {
    /// Initialize ONNX Runtime and select a backend.
    ///
    /// Fails with [`EngineError::NoBackend`] when not even the CPU provider
    /// can be used.
    pub fn new(preference: BackendPreference, intra_threads: usize) -> Result<Self, EngineError> {
        ort::init()
            .with_name("StyleTransfer")
            .commit()
            .map_err(|e| EngineError::Load(format!("failed to initialize ONNX Runtime: {}", e)))?;

        let accelerated = match preference {
            BackendPreference::Auto => detect_accelerated(),
            BackendPreference::CpuOnly => None,
        };

        let backend = match accelerated {
            Some(backend) => backend,
            None => {
                let cpu_ok = CPUExecutionProvider::default().is_available().unwrap_or(false);
                if !cpu_ok {
                    tracing::error!("ONNX Runtime has no usable execution provider");
                    return Err(EngineError::NoBackend);
                }
                Backend::Cpu
            }
        };

        tracing::info!(%backend, intra_threads, "ONNX Runtime initialized");

        Ok(Self {
            backend,
            intra_threads: intra_threads.max(1),
        })
    }

    fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::with_capacity(2);
        if let Some(provider) = accelerated_provider(self.backend) {
            providers.push(provider);
        }
        providers.push(CPUExecutionProvider::default().build());
        providers
    }
}

impl InferenceEngine for OrtEngine {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn create_session(
        &self,
        descriptor: &ModelDescriptor,
        weights: &[u8],
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let load_err = |e: ort::Error| EngineError::Load(format!("{}: {}", descriptor.id, e));

        let session = Session::builder()
            .map_err(load_err)?
            .with_intra_threads(self.intra_threads)
            .map_err(load_err)?
            .with_execution_providers(self.execution_providers())
            .map_err(load_err)?
            .commit_from_memory(weights)
            .map_err(load_err)?;

        tracing::info!(model = %descriptor.id, backend = %self.backend, "Compiled ONNX session");

        Ok(Box::new(OrtSession {
            session,
            backend: self.backend,
            output_shape: descriptor.output_shape(),
        }))
    }
}

struct OrtSession {
    session: Session,
    backend: Backend,
    output_shape: TensorShape,
}

impl EngineSession for OrtSession {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn run(&mut self, input: InputTensor) -> Result<OutputTensor, EngineError> {
        let (shape, data) = input.into_parts();
        let input_array = Array4::from_shape_vec(
            (shape.batch, shape.channels, shape.height, shape.width),
            data,
        )
        .map_err(|e| EngineError::Execution(format!("failed to create input array: {}", e)))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| EngineError::Execution(format!("failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| EngineError::Execution(e.to_string()))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| EngineError::Execution("model produced no outputs".into()))?;

        let (dims, values) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Execution(format!("failed to extract output: {}", e)))?;

        // Dynamic axes come back as the concrete size; anything else must match.
        let dims: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
        let shape = match dims.as_slice() {
            &[n, c, h, w] => TensorShape::new(n, c, h, w),
            _ => {
                return Err(EngineError::Execution(format!(
                    "expected 4D output like {}, got {:?}",
                    self.output_shape, dims
                )))
            }
        };

        OutputTensor::new(shape, values.to_vec()).map_err(|e| EngineError::Execution(e.to_string()))
    }
}

#[cfg(target_os = "linux")]
fn detect_accelerated() -> Option<Backend> {
    use ort::execution_providers::CUDAExecutionProvider;
    provider_if_available(Backend::Cuda, CUDAExecutionProvider::default().is_available())
}

#[cfg(target_os = "macos")]
fn detect_accelerated() -> Option<Backend> {
    use ort::execution_providers::CoreMLExecutionProvider;
    provider_if_available(Backend::CoreMl, CoreMLExecutionProvider::default().is_available())
}

#[cfg(target_os = "windows")]
fn detect_accelerated() -> Option<Backend> {
    use ort::execution_providers::DirectMLExecutionProvider;
    provider_if_available(Backend::DirectMl, DirectMLExecutionProvider::default().is_available())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn detect_accelerated() -> Option<Backend> {
    None
}

fn provider_if_available(backend: Backend, available: ort::Result<bool>) -> Option<Backend> {
    match available {
        Ok(true) => Some(backend),
        Ok(false) => {
            tracing::info!(%backend, "Accelerated provider unavailable, using CPU");
            None
        }
        Err(e) => {
            tracing::warn!(%backend, "Failed to query accelerated provider: {}", e);
            None
        }
    }
}

fn accelerated_provider(backend: Backend) -> Option<ExecutionProviderDispatch> {
    match backend {
        #[cfg(target_os = "linux")]
        Backend::Cuda => Some(ort::execution_providers::CUDAExecutionProvider::default().build()),
        #[cfg(target_os = "macos")]
        Backend::CoreMl => Some(ort::execution_providers::CoreMLExecutionProvider::default().build()),
        #[cfg(target_os = "windows")]
        Backend::DirectMl => Some(ort::execution_providers::DirectMLExecutionProvider::default().build()),
        _ => None,
    }
}
