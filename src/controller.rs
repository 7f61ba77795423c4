//! Single-shot inference controller
//!
//! `run` takes one frame through preprocess -> execute -> postprocess. The
//! expensive half (`stylize`) and the cheap half (`render`) are also exposed
//! separately so a strength change can re-render a cached [`Stylization`]
//! without touching the session.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::codec::{CodecError, OutputTensor, StyleStrength, TensorCodec};
use crate::frame::RawFrame;
use crate::session::{Session, SessionCache, SessionError};
use crate::status::{PipelineStatus, StatusReporter};

/// Inference errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("model `{0}` not found")]
    UnknownModel(String),
    #[error("session unavailable: {0}")]
    SessionUnavailable(#[from] SessionError),
    #[error("inference failed: {0}")]
    ExecutionFailed(String),
    #[error("codec contract violated: {0}")]
    Codec(String),
}

impl From<CodecError> for InferenceError {
    fn from(e: CodecError) -> Self {
        InferenceError::Codec(e.to_string())
    }
}

/// Size of the frame returned to the display layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputSize {
    /// The model's output resolution
    Model,
    /// Resampled back to the source frame's dimensions
    #[default]
    Source,
}

/// One unit of work for the controller or the frame scheduler
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model_id: String,
    pub frame: RawFrame,
    pub strength: StyleStrength,
    pub output_size: OutputSize,
}

impl InferenceRequest {
    pub fn new(model_id: impl Into<String>, frame: RawFrame, strength: StyleStrength) -> Self {
        Self {
            model_id: model_id.into(),
            frame,
            strength,
            output_size: OutputSize::default(),
        }
    }

    pub fn with_output_size(mut self, output_size: OutputSize) -> Self {
        self.output_size = output_size;
        self
    }
}

/// Model output for one source frame, ready to be rendered at any strength
#[derive(Debug, Clone)]
pub struct Stylization {
    descriptor: Arc<ModelDescriptor>,
    source: Arc<RawFrame>,
    output: Arc<OutputTensor>,
}

impl Stylization {
    pub fn model_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.descriptor
    }

    pub fn source(&self) -> &Arc<RawFrame> {
        &self.source
    }

    pub fn output(&self) -> &OutputTensor {
        &self.output
    }
}

/// Single-shot entry point; cheap to clone
#[derive(Clone)]
pub struct InferenceController {
    sessions: SessionCache,
    codec: TensorCodec,
    status: StatusReporter,
}

impl InferenceController {
    pub fn new(sessions: SessionCache, codec: TensorCodec, status: StatusReporter) -> Self {
        Self {
            sessions,
            codec,
            status,
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        self.sessions.catalog()
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn codec(&self) -> &TensorCodec {
        &self.codec
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn describe(&self, model_id: &str) -> Result<Arc<ModelDescriptor>, InferenceError> {
        self.catalog()
            .describe(model_id)
            .ok_or_else(|| InferenceError::UnknownModel(model_id.to_string()))
    }

    /// Create (or reuse) the session for `model_id` ahead of the first frame
    pub async fn preload(&self, model_id: &str) -> Result<Session, InferenceError> {
        let result = async {
            let descriptor = self.describe(model_id)?;
            let session = self.session_for(&descriptor).await?;
            self.status
                .set(PipelineStatus::Loaded(descriptor.display_name.clone()));
            Ok::<_, InferenceError>(session)
        }
        .await;
        self.report(result)
    }

    /// Full pipeline for one request
    pub async fn run(&self, request: InferenceRequest) -> Result<RawFrame, InferenceError> {
        let InferenceRequest {
            model_id,
            frame,
            strength,
            output_size,
        } = request;
        let stylization = self.stylize(&model_id, Arc::new(frame)).await?;
        self.render(&stylization, strength, output_size)
    }

    /// Preprocess and execute; the result can be rendered repeatedly
    pub async fn stylize(
        &self,
        model_id: &str,
        frame: Arc<RawFrame>,
    ) -> Result<Stylization, InferenceError> {
        let result = self.stylize_inner(model_id, frame).await;
        self.report(result)
    }

    async fn stylize_inner(
        &self,
        model_id: &str,
        frame: Arc<RawFrame>,
    ) -> Result<Stylization, InferenceError> {
        let descriptor = self.describe(model_id)?;
        let session = self.session_for(&descriptor).await?;

        self.status.set(PipelineStatus::Preprocessing);
        let input_shape = descriptor.input_shape();
        let tensor = self.codec.preprocess(
            &frame,
            input_shape.width as u32,
            input_shape.height as u32,
            descriptor.input.normalization,
        )?;

        self.status.set(PipelineStatus::Running);
        let started = Instant::now();
        let output = session
            .execute(tensor)
            .await
            .map_err(|e| InferenceError::ExecutionFailed(e.to_string()))?;
        tracing::debug!(
            model = %descriptor.id,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Inference complete"
        );

        Ok(Stylization {
            descriptor,
            source: frame,
            output: Arc::new(output),
        })
    }

    /// Postprocess a cached stylization; never runs the model
    pub fn render(
        &self,
        stylization: &Stylization,
        strength: StyleStrength,
        output_size: OutputSize,
    ) -> Result<RawFrame, InferenceError> {
        let result = self.render_inner(stylization, strength, output_size);
        if result.is_ok() {
            self.status.set(PipelineStatus::Done);
        }
        self.report(result)
    }

    fn render_inner(
        &self,
        stylization: &Stylization,
        strength: StyleStrength,
        output_size: OutputSize,
    ) -> Result<RawFrame, InferenceError> {
        self.status.set(PipelineStatus::Postprocessing);
        let descriptor = &stylization.descriptor;
        let output_shape = descriptor.output_shape();
        let frame = self.codec.postprocess(
            &stylization.output,
            &stylization.source,
            output_shape.width as u32,
            output_shape.height as u32,
            strength,
            descriptor.output.normalization,
        )?;

        Ok(match output_size {
            OutputSize::Model => frame,
            OutputSize::Source => {
                let (width, height) = stylization.source.dimensions();
                frame.resized(width, height, self.codec.filter())
            }
        })
    }

    async fn session_for(&self, descriptor: &ModelDescriptor) -> Result<Session, InferenceError> {
        if !self.sessions.is_ready(&descriptor.id) {
            self.status
                .set(PipelineStatus::Loading(descriptor.display_name.clone()));
        }
        Ok(self.sessions.acquire(&descriptor.id).await?)
    }

    fn report<T>(&self, result: Result<T, InferenceError>) -> Result<T, InferenceError> {
        if let Err(e) = &result {
            tracing::warn!("{}", e);
            self.status.fail(e);
        }
        result
    }
}
