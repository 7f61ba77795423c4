//! Pipeline assembly
//!
//! Wires catalog, engine, assets, session cache and controller together from
//! [`PipelineSettings`]. Hosts build one `StylePipeline` at startup and hand
//! out editors and schedulers from it.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::assets::{AssetLoader, FileAssetLoader};
use crate::catalog::{CatalogError, ModelCatalog};
use crate::controller::InferenceController;
use crate::editor::StyleEditor;
use crate::engine::{Backend, EngineError, InferenceEngine, OrtEngine};
use crate::scheduler::{DisplayAdapter, FrameScheduler, FrameSource, StreamControls};
use crate::session::SessionCache;
use crate::settings::PipelineSettings;
use crate::status::StatusReporter;

/// Startup failures
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

pub struct StylePipeline {
    settings: PipelineSettings,
    backend: Backend,
    controller: InferenceController,
}

impl StylePipeline {
    /// Load the manifest from disk and start ONNX Runtime
    pub async fn open(settings: &PipelineSettings) -> Result<Self, PipelineError> {
        let assets = Arc::new(FileAssetLoader::new(&settings.asset_root));
        let catalog = ModelCatalog::load(assets.as_ref(), &settings.manifest_path).await?;
        let engine = OrtEngine::new(settings.backend, settings.intra_threads)?;
        Ok(Self::with_parts(
            settings.clone(),
            Arc::new(catalog),
            Arc::new(engine),
            assets,
        ))
    }

    /// Assemble from an already loaded catalog and any engine/loader
    pub fn with_parts(
        settings: PipelineSettings,
        catalog: Arc<ModelCatalog>,
        engine: Arc<dyn InferenceEngine>,
        assets: Arc<dyn AssetLoader>,
    ) -> Self {
        let backend = engine.backend();
        let sessions = SessionCache::new(catalog, engine, assets);
        let controller = InferenceController::new(sessions, settings.codec(), StatusReporter::new());
        Self {
            settings,
            backend,
            controller,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        self.controller.catalog()
    }

    pub fn controller(&self) -> &InferenceController {
        &self.controller
    }

    pub fn status(&self) -> &StatusReporter {
        self.controller.status()
    }

    /// Image-mode editor with the configured strength and output size
    pub fn editor(&self) -> StyleEditor {
        StyleEditor::new(self.controller.clone())
            .with_strength(self.settings.strength())
            .with_output_size(self.settings.output_size)
    }

    /// Stream controls starting on the first catalog model
    pub fn stream_controls(&self) -> Arc<StreamControls> {
        let model_id = self
            .catalog()
            .first()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        let controls = StreamControls::new(model_id, self.settings.strength());
        controls.set_output_size(self.settings.output_size);
        Arc::new(controls)
    }

    /// Camera-mode scheduler sharing this pipeline's sessions and status
    pub fn scheduler(
        &self,
        source: Arc<dyn FrameSource>,
        display: Arc<dyn DisplayAdapter>,
        runtime: Handle,
    ) -> FrameScheduler {
        FrameScheduler::new(
            Arc::new(self.controller.clone()),
            source,
            display,
            self.stream_controls(),
            self.status().clone(),
            self.settings.scheduler_config(),
            runtime,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::InMemoryAssets;
    use crate::controller::OutputSize;
    use crate::engine::mock::{test_assets, MockEngine, TEST_MANIFEST};
    use crate::frame::RawFrame;
    use crate::scheduler::TickOutcome;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn pipeline(settings: PipelineSettings) -> StylePipeline {
        let catalog = Arc::new(ModelCatalog::from_json(TEST_MANIFEST).unwrap());
        StylePipeline::with_parts(
            settings,
            catalog,
            Arc::new(MockEngine::new()),
            Arc::new(test_assets()),
        )
    }

    struct StillSource;

    impl FrameSource for StillSource {
        fn capture(&self) -> Option<RawFrame> {
            Some(RawFrame::filled(640, 480, [0, 0, 0, 255]))
        }
    }

    #[derive(Default)]
    struct LastFrame(Mutex<Option<RawFrame>>);

    impl DisplayAdapter for LastFrame {
        fn present(&self, frame: RawFrame) {
            *self.0.lock() = Some(frame);
        }
    }

    #[tokio::test]
    async fn test_editor_uses_settings() {
        let pipeline = pipeline(PipelineSettings {
            default_strength: 0.25,
            ..PipelineSettings::default()
        });
        assert_eq!(pipeline.backend(), Backend::Cpu);
        assert_eq!(pipeline.catalog().len(), 2);

        let editor = pipeline.editor();
        assert_eq!(editor.strength().value(), 0.25);
        assert_eq!(editor.selected_model(), Some("candy"));
    }

    #[tokio::test]
    async fn test_scheduler_downscales_to_capture_size() {
        let pipeline = pipeline(PipelineSettings {
            capture_width: 64,
            capture_height: 48,
            output_size: OutputSize::Source,
            ..PipelineSettings::default()
        });
        let display = Arc::new(LastFrame::default());
        let scheduler = pipeline.scheduler(Arc::new(StillSource), display.clone(), Handle::current());
        assert_eq!(scheduler.controls().model_id(), "candy");

        scheduler.start();
        assert_eq!(scheduler.tick(), TickOutcome::Submitted);
        for _ in 0..200 {
            if display.0.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let frame = display.0.lock().clone().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        assert!(pipeline.status().current().is_settled());
    }

    #[tokio::test]
    async fn test_open_reports_unreachable_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            asset_root: dir.path().to_string_lossy().into_owned(),
            ..PipelineSettings::default()
        };
        let err = StylePipeline::open(&settings).await.err().unwrap();
        assert!(matches!(err, PipelineError::Catalog(CatalogError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_empty_catalog_gives_empty_controls() {
        let catalog = Arc::new(ModelCatalog::from_json(r#"{ "models": [] }"#).unwrap());
        let pipeline = StylePipeline::with_parts(
            PipelineSettings::default(),
            catalog,
            Arc::new(MockEngine::new()),
            Arc::new(InMemoryAssets::new()),
        );
        assert_eq!(pipeline.stream_controls().model_id(), "");
        assert_eq!(pipeline.editor().selected_model(), None);
    }
}
