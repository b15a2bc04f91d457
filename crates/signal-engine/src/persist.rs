//! Model persistence: a self-describing JSON artifact that round-trips
//! predictions exactly.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::alpha::{AlphaConfig, AlphaSignal};
use crate::learner::Model;

/// The minimal persisted surface: learner parameters, configuration, and
/// the feature schema with importances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: Model,
    pub config: AlphaConfig,
    pub feature_names: Vec<String>,
    pub feature_importance: Vec<(String, f64)>,
}

impl AlphaSignal {
    /// Serialize the fitted model to `path` as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let artifact = self.to_artifact()?;
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("creating model artifact {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &artifact)
            .with_context(|| format!("serializing model artifact {}", path.display()))?;
        Ok(())
    }

    /// Restore a fitted model from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<AlphaSignal> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening model artifact {}", path.display()))?;
        let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("deserializing model artifact {}", path.display()))?;
        Ok(AlphaSignal::from_parts(
            artifact.config,
            artifact.model,
            artifact.feature_names,
            artifact.feature_importance,
        ))
    }

    fn to_artifact(&self) -> Result<ModelArtifact> {
        let model = self
            .fitted_model()
            .context("cannot persist an unfitted model")?;
        Ok(ModelArtifact {
            model: model.clone(),
            config: self.config().clone(),
            feature_names: self.feature_names().to_vec(),
            feature_importance: self.feature_importance().to_vec(),
        })
    }
}
