//! Model catalog
//!
//! Parses the style model manifest and exposes immutable descriptors with the
//! tensor contract of each model.
//!
//! Manifest layout (JSON):
//!
//! ```json
//! { "models": [ {
//!     "id": "candy", "name": "Candy", "file": "/models/candy.onnx",
//!     "input":  { "name": "input1", "shape": [1, 3, 224, 224], "dtype": "float32" },
//!     "output": { "name": "output1", "shape": [1, 3, 224, 224], "scale": 1.0 },
//!     "hash": "sha256-..."
//! } ] }
//! ```
//!
//! A bare list of entries is accepted as well. Fields the pipeline does not
//! read are kept in [`ModelDescriptor::metadata`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::assets::AssetLoader;
use crate::codec::{Normalization, TensorShape, TENSOR_CHANNELS};

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("malformed manifest: {0}")]
    Malformed(String),
    #[error("manifest unreachable at {locator}: {source}")]
    Unreachable {
        locator: String,
        #[source]
        source: std::io::Error,
    },
}

/// Tensor element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementType {
    #[default]
    Float32,
}

/// One side (input or output) of a model's tensor contract
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    /// Graph tensor name, when the manifest provides one
    pub name: Option<String>,
    pub shape: TensorShape,
    pub normalization: Normalization,
}

/// Immutable description of one style model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub weights_locator: String,
    pub input: TensorSpec,
    pub output: TensorSpec,
    pub element_type: ElementType,
    pub integrity_hash: Option<String>,
    /// Unread manifest fields, passed through untouched
    pub metadata: Map<String, Value>,
}

impl ModelDescriptor {
    pub fn input_shape(&self) -> TensorShape {
        self.input.shape
    }

    pub fn output_shape(&self) -> TensorShape {
        self.output.shape
    }
}

#[derive(Deserialize)]
struct ManifestEntry {
    id: String,
    name: String,
    file: String,
    input: TensorEntry,
    output: TensorEntry,
    #[serde(default)]
    hash: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct TensorEntry {
    shape: Vec<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    scale: Option<f32>,
    #[serde(default)]
    offset: Option<f32>,
}

/// Loaded set of model descriptors, in manifest order
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<Arc<ModelDescriptor>>,
    index: HashMap<String, usize>,
}

impl ModelCatalog {
    /// Fetch and parse a manifest
    pub async fn load(loader: &dyn AssetLoader, locator: &str) -> Result<Self, CatalogError> {
        let bytes = loader
            .fetch(locator)
            .await
            .map_err(|source| CatalogError::Unreachable {
                locator: locator.to_string(),
                source,
            })?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| CatalogError::Malformed(format!("manifest is not UTF-8: {}", e)))?;
        let catalog = Self::from_json(text)?;
        tracing::info!(locator, models = catalog.len(), "Model catalog loaded");
        Ok(catalog)
    }

    /// Parse and validate manifest text
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let document: Value =
            serde_json::from_str(text).map_err(|e| CatalogError::Malformed(e.to_string()))?;

        let entries = match document {
            Value::Object(mut root) => match root.remove("models") {
                Some(models) => models,
                None => return Err(CatalogError::Malformed("missing `models` list".into())),
            },
            list @ Value::Array(_) => list,
            _ => {
                return Err(CatalogError::Malformed(
                    "manifest must be an object or a list".into(),
                ))
            }
        };

        let entries: Vec<ManifestEntry> =
            serde_json::from_value(entries).map_err(|e| CatalogError::Malformed(e.to_string()))?;

        let mut catalog = Self::default();
        for entry in entries {
            let descriptor = descriptor_from_entry(entry)?;
            if catalog.index.contains_key(&descriptor.id) {
                return Err(CatalogError::Malformed(format!(
                    "duplicate model id `{}`",
                    descriptor.id
                )));
            }
            catalog
                .index
                .insert(descriptor.id.clone(), catalog.models.len());
            catalog.models.push(Arc::new(descriptor));
        }
        Ok(catalog)
    }

    pub fn describe(&self, model_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.index.get(model_id).map(|&i| self.models[i].clone())
    }

    pub fn models(&self) -> &[Arc<ModelDescriptor>] {
        &self.models
    }

    pub fn first(&self) -> Option<&Arc<ModelDescriptor>> {
        self.models.first()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn descriptor_from_entry(entry: ManifestEntry) -> Result<ModelDescriptor, CatalogError> {
    let ManifestEntry {
        id,
        name,
        file,
        input,
        output,
        hash,
        extra,
    } = entry;

    if id.trim().is_empty() {
        return Err(CatalogError::Malformed("model id must not be empty".into()));
    }
    if file.trim().is_empty() {
        return Err(CatalogError::Malformed(format!("model `{}` has an empty file", id)));
    }

    let input = tensor_spec(&id, "input", input)?;
    let output = tensor_spec(&id, "output", output)?;

    Ok(ModelDescriptor {
        id,
        display_name: name,
        weights_locator: file,
        input,
        output,
        element_type: ElementType::Float32,
        integrity_hash: hash.filter(|h| !h.is_empty()),
        metadata: extra,
    })
}

fn tensor_spec(id: &str, side: &str, entry: TensorEntry) -> Result<TensorSpec, CatalogError> {
    let malformed = |what: String| CatalogError::Malformed(format!("model `{}` {}: {}", id, side, what));

    if let Some(dtype) = &entry.dtype {
        if dtype != "float32" {
            return Err(malformed(format!("unsupported dtype `{}`", dtype)));
        }
    }

    let dims: [i64; 4] = entry
        .shape
        .as_slice()
        .try_into()
        .map_err(|_| malformed(format!("shape must have 4 dimensions, got {}", entry.shape.len())))?;
    if let Some(bad) = dims.iter().find(|&&d| d <= 0) {
        return Err(malformed(format!("non-positive dimension {}", bad)));
    }
    let [batch, channels, height, width] = dims.map(|d| d as usize);
    // The codec only produces and consumes single RGB images
    if batch != 1 || channels != TENSOR_CHANNELS {
        return Err(malformed(format!(
            "shape must be [1, {}, height, width], got {:?}",
            TENSOR_CHANNELS, dims
        )));
    }

    let mut normalization = Normalization::UNIT;
    if let Some(scale) = entry.scale {
        if !scale.is_finite() || scale == 0.0 {
            return Err(malformed(format!("invalid scale {}", scale)));
        }
        normalization.scale = scale;
    }
    if let Some(offset) = entry.offset {
        if !offset.is_finite() {
            return Err(malformed(format!("invalid offset {}", offset)));
        }
        normalization.offset = offset;
    }

    Ok(TensorSpec {
        name: entry.name,
        shape: TensorShape::new(batch, channels, height, width),
        normalization,
    })
}
