//! Pipeline settings
//!
//! Persisted as XML in the user's config directory.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::{StyleStrength, TensorCodec};
use crate::controller::OutputSize;
use crate::engine::BackendPreference;
use crate::frame::ResizeFilter;
use crate::scheduler::SchedulerConfig;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Everything a host needs to assemble a [`crate::StylePipeline`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "StyleTransferSettings", default)]
pub struct PipelineSettings {
    /// Manifest locator, relative to `asset_root`
    #[serde(rename = "manifestPath")]
    pub manifest_path: String,

    /// Directory model locators are resolved against
    #[serde(rename = "assetRoot")]
    pub asset_root: String,

    #[serde(rename = "backend")]
    pub backend: BackendPreference,

    /// ONNX Runtime intra-op threads (>= 1)
    #[serde(rename = "intraThreads")]
    pub intra_threads: usize,

    /// Initial blend strength (0.0 - 1.0)
    #[serde(rename = "defaultStrength")]
    pub default_strength: f32,

    /// Live frames are downscaled to this size before inference
    #[serde(rename = "captureWidth")]
    pub capture_width: u32,

    #[serde(rename = "captureHeight")]
    pub capture_height: u32,

    /// Failed frames in a row before the stream stops
    #[serde(rename = "maxConsecutiveFailures")]
    pub max_consecutive_failures: u32,

    #[serde(rename = "outputSize")]
    pub output_size: OutputSize,

    #[serde(rename = "resizeFilter")]
    pub resize_filter: ResizeFilter,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            manifest_path: "models/manifest.json".to_string(),
            asset_root: ".".to_string(),
            backend: BackendPreference::Auto,
            intra_threads: 2,
            default_strength: 0.8,
            capture_width: 224,
            capture_height: 224,
            max_consecutive_failures: 3,
            output_size: OutputSize::Source,
            resize_filter: ResizeFilter::Triangle,
        }
    }
}

impl PipelineSettings {
    /// Pull every numeric field back into its valid range
    pub fn clamp(&mut self) {
        self.default_strength = StyleStrength::new(self.default_strength).value();
        self.intra_threads = self.intra_threads.max(1);
        self.capture_width = self.capture_width.max(1);
        self.capture_height = self.capture_height.max(1);
        self.max_consecutive_failures = self.max_consecutive_failures.max(1);
    }

    pub fn strength(&self) -> StyleStrength {
        StyleStrength::new(self.default_strength)
    }

    pub fn capture_size(&self) -> (u32, u32) {
        (self.capture_width, self.capture_height)
    }

    pub fn codec(&self) -> TensorCodec {
        TensorCodec::new(self.resize_filter)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_consecutive_failures: self.max_consecutive_failures,
            capture_size: Some(self.capture_size()),
        }
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        let mut settings: Self = from_str(&contents).map_err(SettingsError::XmlParse)?;
        settings.clamp();
        Ok(settings)
    }

    /// Save settings to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let xml = to_string(self).map_err(SettingsError::XmlWrite)?;
        fs::write(path, format!("{}{}", XML_DECLARATION, xml)).map_err(SettingsError::Io)?;
        Ok(())
    }

    /// `<config dir>/StyleTransfer/settings.xml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("StyleTransfer");
            p.push("settings.xml");
            p
        })
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = Self::default_path() else {
            return Err(SettingsError::NoConfigDir);
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }
        self.save_to_file(&path)
    }
}

/// Settings-related errors
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    XmlParse(quick_xml::DeError),
    XmlWrite(quick_xml::SeError),
    NoConfigDir,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::XmlParse(e) => write!(f, "XML parse error: {}", e),
            SettingsError::XmlWrite(e) => write!(f, "XML write error: {}", e),
            SettingsError::NoConfigDir => write!(f, "Could not find config directory"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(e) => Some(e),
            SettingsError::XmlParse(e) => Some(e),
            SettingsError::XmlWrite(e) => Some(e),
            SettingsError::NoConfigDir => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.manifest_path, "models/manifest.json");
        assert_eq!(settings.backend, BackendPreference::Auto);
        assert_eq!(settings.intra_threads, 2);
        assert_eq!(settings.strength().value(), 0.8);
        assert_eq!(settings.capture_size(), (224, 224));
        assert_eq!(settings.output_size, OutputSize::Source);
        assert_eq!(settings.scheduler_config().max_consecutive_failures, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.xml");

        let settings = PipelineSettings {
            manifest_path: "styles/manifest.json".into(),
            backend: BackendPreference::CpuOnly,
            default_strength: 0.5,
            capture_width: 320,
            capture_height: 240,
            output_size: OutputSize::Model,
            resize_filter: ResizeFilter::Lanczos3,
            ..PipelineSettings::default()
        };
        settings.save_to_file(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("<?xml"));
        assert!(contents.contains("<manifestPath>styles/manifest.json</manifestPath>"));

        let loaded = PipelineSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_clamps_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.xml");
        fs::write(
            &path,
            "<StyleTransferSettings>\
               <defaultStrength>1.7</defaultStrength>\
               <intraThreads>0</intraThreads>\
               <captureWidth>0</captureWidth>\
               <maxConsecutiveFailures>0</maxConsecutiveFailures>\
             </StyleTransferSettings>",
        )
        .unwrap();

        let loaded = PipelineSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.default_strength, 1.0);
        assert_eq!(loaded.intra_threads, 1);
        assert_eq!(loaded.capture_width, 1);
        assert_eq!(loaded.capture_height, 224);
        assert_eq!(loaded.max_consecutive_failures, 1);
        assert_eq!(loaded.manifest_path, "models/manifest.json");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.xml");
        assert!(matches!(
            PipelineSettings::load_from_file(&missing),
            Err(SettingsError::Io(_))
        ));

        let broken = dir.path().join("broken.xml");
        fs::write(&broken, "<StyleTransferSettings><intraThreads>many</intraThreads></StyleTransferSettings>").unwrap();
        assert!(matches!(
            PipelineSettings::load_from_file(&broken),
            Err(SettingsError::XmlParse(_))
        ));
    }
}
