//! Style Transfer Library
//!
//! On-device neural style transfer for still images and live camera feeds.
//! Loads style models from a manifest, keeps one warmed-up ONNX Runtime
//! session per model, converts RGBA frames to and from planar tensors, and
//! schedules continuous inference with drop-on-busy backpressure.

pub mod assets;
#[cfg(feature = "camera")]
pub mod camera;
pub mod catalog;
pub mod codec;
pub mod controller;
pub mod editor;
pub mod engine;
pub mod frame;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod status;
pub mod telemetry;

pub use assets::{AssetLoader, FileAssetLoader, InMemoryAssets};
#[cfg(feature = "camera")]
pub use camera::{CameraInfo, CameraSource};
pub use catalog::{CatalogError, ModelCatalog, ModelDescriptor};
pub use codec::{CodecError, InputTensor, Normalization, OutputTensor, StyleStrength, TensorCodec, TensorShape};
pub use controller::{InferenceController, InferenceError, InferenceRequest, OutputSize, Stylization};
pub use editor::StyleEditor;
pub use engine::{Backend, BackendPreference, EngineError, EngineSession, InferenceEngine, OrtEngine};
pub use frame::{RawFrame, ResizeFilter};
pub use pipeline::{PipelineError, StylePipeline};
pub use scheduler::{
    DisplayAdapter, FramePipeline, FrameScheduler, FrameSource, SchedulerConfig, SchedulerState,
    StreamControls, TickOutcome,
};
pub use session::{Session, SessionCache, SessionError};
pub use settings::{PipelineSettings, SettingsError};
pub use status::{PipelineStatus, StatusReporter};
pub use telemetry::{init_logging, LogConfig, SchedulerStats};
