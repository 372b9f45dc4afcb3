#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use serde_derive::Deserialize;
use serde_derive::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelTier {
    Free,
    Premium,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub tier: ModelTier,
}

impl ModelInfo {
    pub fn is_premium(&self) -> bool {
        return self.tier == ModelTier::Premium;
    }
}

/// Models the endpoint serves, with the fallback used for unknown ids.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
    default_id: String,
}

impl ModelCatalog {
    /// Parses `id:tier` pairs separated by commas, e.g.
    /// `gpt-4o-mini:free,gpt-4:premium`. A missing tier means free.
    pub fn parse(list: &str, default_id: &str) -> Result<ModelCatalog> {
        let mut models = vec![];
        for entry in list.split(',').map(|e| return e.trim()) {
            if entry.is_empty() {
                continue;
            }

            let (id, tier) = match entry.split_once(':') {
                Some((id, "premium")) => (id, ModelTier::Premium),
                Some((id, "free")) => (id, ModelTier::Free),
                Some((_, tier)) => bail!(format!("Unknown model tier '{tier}' in '{entry}'")),
                None => (entry, ModelTier::Free),
            };
            models.push(ModelInfo {
                id: id.trim().to_string(),
                tier,
            });
        }

        if models.is_empty() {
            bail!("At least one model must be configured");
        }
        if !models.iter().any(|e| return e.id == default_id) {
            bail!(format!("Default model '{default_id}' is not in the model list"));
        }

        return Ok(ModelCatalog {
            models,
            default_id: default_id.to_string(),
        });
    }

    /// Looks a model up, falling back to the default when unknown.
    pub fn resolve(&self, id: &str) -> ModelInfo {
        if let Some(model) = self.models.iter().find(|e| return e.id == id) {
            return model.clone();
        }

        tracing::debug!(requested = id, fallback = %self.default_id, "Unknown model");
        return self
            .models
            .iter()
            .find(|e| return e.id == self.default_id)
            .cloned()
            .unwrap_or_else(|| return self.models[0].clone());
    }

    pub fn ids(&self) -> Vec<String> {
        return self.models.iter().map(|e| return e.id.to_string()).collect();
    }
}
