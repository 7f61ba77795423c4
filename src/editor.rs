//! Still-image editing session
//!
//! Holds the selected model, blend strength, source image and the cached
//! model output for one image-mode screen. Changing the style re-runs the
//! model; changing only the strength re-renders the cached output.

use std::sync::Arc;

use crate::catalog::ModelDescriptor;
use crate::codec::StyleStrength;
use crate::controller::{InferenceController, InferenceError, OutputSize, Stylization};
use crate::frame::RawFrame;
use crate::status::PipelineStatus;

pub struct StyleEditor {
    controller: InferenceController,
    selected: Option<String>,
    strength: StyleStrength,
    output_size: OutputSize,
    source: Option<Arc<RawFrame>>,
    stylization: Option<Stylization>,
    rendered: Option<RawFrame>,
}

impl StyleEditor {
    /// New editor with the first catalog model selected
    pub fn new(controller: InferenceController) -> Self {
        let selected = controller.catalog().first().map(|m| m.id.clone());
        Self {
            controller,
            selected,
            strength: StyleStrength::default(),
            output_size: OutputSize::default(),
            source: None,
            stylization: None,
            rendered: None,
        }
    }

    pub fn with_strength(mut self, strength: StyleStrength) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_output_size(mut self, output_size: OutputSize) -> Self {
        self.output_size = output_size;
        self
    }

    pub fn models(&self) -> &[Arc<ModelDescriptor>] {
        self.controller.catalog().models()
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn strength(&self) -> StyleStrength {
        self.strength
    }

    pub fn source(&self) -> Option<&RawFrame> {
        self.source.as_deref()
    }

    /// Latest blended output
    pub fn rendered(&self) -> Option<&RawFrame> {
        self.rendered.as_ref()
    }

    pub fn stylization(&self) -> Option<&Stylization> {
        self.stylization.as_ref()
    }

    pub fn status(&self) -> PipelineStatus {
        self.controller.status().current()
    }

    /// Decode an uploaded image and stylize it with the selected model
    pub async fn load_image(&mut self, bytes: &[u8]) -> Result<Option<&RawFrame>, InferenceError> {
        let frame = match RawFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                let e = InferenceError::from(e);
                self.controller.status().fail(&e);
                return Err(e);
            }
        };
        self.set_frame(frame).await
    }

    /// Replace the source image and stylize it
    pub async fn set_frame(&mut self, frame: RawFrame) -> Result<Option<&RawFrame>, InferenceError> {
        self.source = Some(Arc::new(frame));
        self.invalidate();
        self.refresh().await
    }

    /// Switch style; drops the cached output and re-runs inference
    pub async fn select_model(&mut self, model_id: &str) -> Result<Option<&RawFrame>, InferenceError> {
        self.controller.describe(model_id)?;
        if self.selected.as_deref() != Some(model_id) {
            self.selected = Some(model_id.to_string());
            self.invalidate();
        }
        self.refresh().await
    }

    /// Change blend strength; only postprocessing runs
    pub fn set_strength(&mut self, strength: StyleStrength) -> Result<Option<&RawFrame>, InferenceError> {
        self.strength = strength;
        if let Some(stylization) = &self.stylization {
            self.rendered = Some(
                self.controller
                    .render(stylization, self.strength, self.output_size)?,
            );
        }
        Ok(self.rendered.as_ref())
    }

    /// Clear the output and return to the initial status
    pub fn reset(&mut self) {
        self.source = None;
        self.invalidate();
        self.controller.status().set(PipelineStatus::NotLoaded);
    }

    fn invalidate(&mut self) {
        self.stylization = None;
        self.rendered = None;
    }

    async fn refresh(&mut self) -> Result<Option<&RawFrame>, InferenceError> {
        if self.stylization.is_none() {
            let (Some(model_id), Some(source)) = (&self.selected, &self.source) else {
                return Ok(None);
            };
            let stylization = self.controller.stylize(model_id, source.clone()).await?;
            self.stylization = Some(stylization);
        }

        if let Some(stylization) = &self.stylization {
            self.rendered = Some(
                self.controller
                    .render(stylization, self.strength, self.output_size)?,
            );
        }
        Ok(self.rendered.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::codec::TensorCodec;
    use crate::engine::mock::{test_assets, MockEngine, MockStats, TEST_MANIFEST};
    use crate::session::SessionCache;
    use crate::status::StatusReporter;
    use image::{Rgba, RgbaImage};

    fn editor() -> (StyleEditor, Arc<MockStats>) {
        let engine = MockEngine::new();
        let stats = engine.stats();
        let catalog = Arc::new(ModelCatalog::from_json(TEST_MANIFEST).unwrap());
        let sessions = SessionCache::new(catalog, Arc::new(engine), Arc::new(test_assets()));
        let controller =
            InferenceController::new(sessions, TensorCodec::default(), StatusReporter::new());
        (StyleEditor::new(controller), stats)
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([40, 80, 120, 255]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        image.write_to(&mut encoded, image::ImageFormat::Png).unwrap();
        encoded.into_inner()
    }

    #[tokio::test]
    async fn test_defaults() {
        let (editor, _) = editor();
        assert_eq!(editor.selected_model(), Some("candy"));
        assert_eq!(editor.strength().value(), 0.8);
        assert_eq!(editor.models().len(), 2);
        assert_eq!(editor.status(), PipelineStatus::NotLoaded);
    }

    #[tokio::test]
    async fn test_strength_only_rerenders() {
        let (mut editor, stats) = editor();
        let first = editor.load_image(&png(100, 80)).await.unwrap().cloned();
        assert_eq!(first.as_ref().map(|f| f.dimensions()), Some((100, 80)));
        let executions = stats.executions();

        let changed = editor.set_strength(StyleStrength::new(0.2)).unwrap().cloned();
        assert_ne!(first, changed);
        editor.set_strength(StyleStrength::new(1.0)).unwrap();
        assert_eq!(stats.executions(), executions);
        assert_eq!(editor.status(), PipelineStatus::Done);
    }

    #[tokio::test]
    async fn test_style_change_reruns() {
        let (mut editor, stats) = editor();
        editor.load_image(&png(32, 32)).await.unwrap();
        let executions = stats.executions();

        editor.select_model("mosaic").await.unwrap();
        assert_eq!(editor.stylization().map(|s| s.model_id()), Some("mosaic"));
        // New session warm-up plus one real run
        assert_eq!(stats.executions(), executions + 2);

        // Re-selecting the same style keeps the cached output
        editor.select_model("mosaic").await.unwrap();
        assert_eq!(stats.executions(), executions + 2);
    }

    #[tokio::test]
    async fn test_select_unknown_model_keeps_state() {
        let (mut editor, _) = editor();
        editor.load_image(&png(16, 16)).await.unwrap();
        assert!(editor.select_model("udnie").await.is_err());
        assert_eq!(editor.selected_model(), Some("candy"));
        assert!(editor.rendered().is_some());
    }

    #[tokio::test]
    async fn test_strength_without_image() {
        let (mut editor, stats) = editor();
        assert!(editor.set_strength(StyleStrength::new(0.3)).unwrap().is_none());
        assert_eq!(stats.executions(), 0);
    }

    #[tokio::test]
    async fn test_bad_image_and_reset() {
        let (mut editor, _) = editor();
        assert!(editor.load_image(b"garbage").await.is_err());
        assert!(editor.status().is_error());

        editor.load_image(&png(16, 16)).await.unwrap();
        editor.reset();
        assert!(editor.rendered().is_none());
        assert!(editor.source().is_none());
        assert_eq!(editor.status(), PipelineStatus::NotLoaded);
    }
}
