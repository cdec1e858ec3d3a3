// src/services/core/infrastructure/result_archive.rs

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::types::Experiment;
use crate::utils::{ChaosLabError, ChaosLabResult};

/// Durable storage for finished experiment records
#[async_trait]
pub trait ResultArchive: Send + Sync {
    async fn store(&self, experiment: &Experiment) -> ChaosLabResult<()>;

    async fn load(&self, experiment_id: &str) -> ChaosLabResult<Option<Experiment>>;
}

/// One pretty-printed JSON file per experiment under a results directory
pub struct FileResultArchive {
    dir: PathBuf,
}

impl FileResultArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, experiment_id: &str) -> ChaosLabResult<PathBuf> {
        let valid = !experiment_id.is_empty()
            && experiment_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ChaosLabError::validation_error(format!(
                "Invalid experiment id: {}",
                experiment_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", experiment_id)))
    }
}

#[async_trait]
impl ResultArchive for FileResultArchive {
    async fn store(&self, experiment: &Experiment) -> ChaosLabResult<()> {
        let path = self.record_path(&experiment.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let bytes = serde_json::to_vec_pretty(experiment)?;
        // Readers never observe a half-written record
        let tmp = self.dir.join(format!(
            ".{}.json.tmp.{}",
            experiment.id,
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&self, experiment_id: &str) -> ChaosLabResult<Option<Experiment>> {
        let path = self.record_path(experiment_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
