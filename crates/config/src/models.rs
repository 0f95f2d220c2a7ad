use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// One public model exposed by the gateway, mapped to an upstream profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier clients use in the `model` field.
    pub id: String,
    /// The upstream profile name the request is dispatched with.
    pub upstream_id: String,
    /// Human-readable name for listings. Defaults to the id.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Unix timestamp advertised in model listings.
    #[serde(default)]
    pub created: Option<u64>,
    /// Listed owner. Defaults to `jetbrains-ai`.
    #[serde(default)]
    pub owned_by: Option<String>,
}

/// On-disk shape of `models.json`.
#[derive(Debug, Deserialize)]
pub(crate) struct ModelsFile {
    pub(crate) models: Vec<ModelDescriptor>,
}

/// Read-only registry of configured models, loaded once at boot.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl From<ModelsFile> for ModelRegistry {
    fn from(file: ModelsFile) -> Self {
        Self { models: file.models }
    }
}

impl ModelRegistry {
    /// Load the registry from a `models.json` file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read models file {}", path.display()))?;

        let file: ModelsFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse models file {}", path.display()))?;

        Ok(file.into())
    }

    /// Look up a model by its public id.
    pub fn resolve(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|model| model.id == id)
    }

    /// All configured models, in file order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    /// Whether the registry holds no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
