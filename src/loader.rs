//! Lazy, single-flight loading of the process-wide model handle.
//!
//! The first caller of [`ModelSlot::ensure_loaded`] reads the artifact on the
//! blocking pool while concurrent callers wait on the same initialization.
//! Once set, the handle is read without locking for the rest of the process.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::error::ModelError;
use crate::mapping::LabelTable;
use crate::model::{Classifier, InputSpec, ModelSource};

struct LoadedModel {
    classifier: Arc<dyn Classifier>,
    loaded_at: DateTime<Utc>,
}

/// Point-in-time view of the slot, reported by `/health`.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelStatus {
    NotLoaded,
    Loaded {
        loaded_at: DateTime<Utc>,
        input: InputSpec,
    },
    Failed {
        error: String,
        retryable: bool,
    },
}

pub struct ModelSlot {
    source: Arc<dyn ModelSource>,
    path: PathBuf,
    labels: Arc<LabelTable>,
    handle: OnceCell<LoadedModel>,
    last_error: Mutex<Option<ModelError>>,
}

impl ModelSlot {
    pub fn new(source: Arc<dyn ModelSource>, path: impl Into<PathBuf>, labels: LabelTable) -> Self {
        Self {
            source,
            path: path.into(),
            labels: Arc::new(labels),
            handle: OnceCell::new(),
            last_error: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.initialized()
    }

    /// Return the handle, loading it first if no caller has yet.
    ///
    /// Failed loads leave the slot empty so a later call retries, except for
    /// configuration errors, which are returned again without reloading.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn Classifier>, ModelError> {
        if let Some(loaded) = self.handle.get() {
            return Ok(loaded.classifier.clone());
        }

        match self.handle.get_or_try_init(|| self.load()).await {
            Ok(loaded) => {
                self.set_last_error(None);
                Ok(loaded.classifier.clone())
            }
            Err(err) => {
                self.set_last_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    pub fn status(&self) -> ModelStatus {
        if let Some(loaded) = self.handle.get() {
            return ModelStatus::Loaded {
                loaded_at: loaded.loaded_at,
                input: loaded.classifier.input_spec(),
            };
        }
        match self.sticky_or_last_error() {
            Some(err) => ModelStatus::Failed {
                error: err.to_string(),
                retryable: err.is_retryable(),
            },
            None => ModelStatus::NotLoaded,
        }
    }

    async fn load(&self) -> Result<LoadedModel, ModelError> {
        if let Some(err) = self.sticky_or_last_error().filter(|e| !e.is_retryable()) {
            return Err(err);
        }

        let source = self.source.clone();
        let path = self.path.clone();
        info!(path = %path.display(), "loading model");
        let classifier = tokio::task::spawn_blocking(move || load_blocking(source.as_ref(), &path))
            .await
            .map_err(|e| ModelError::LoadFailure {
                path: self.path.clone(),
                reason: format!("load task failed: {e}"),
            })??;

        validate_labels(classifier.as_ref(), &self.labels)?;

        let spec = classifier.input_spec();
        info!(
            path = %self.path.display(),
            shape = ?spec.shape(),
            element = ?spec.element,
            classes = self.labels.len(),
            "model loaded"
        );
        Ok(LoadedModel {
            classifier,
            loaded_at: Utc::now(),
        })
    }

    fn sticky_or_last_error(&self) -> Option<ModelError> {
        match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_last_error(&self, err: Option<ModelError>) {
        if let Some(e) = &err {
            if e.is_retryable() {
                warn!(error = %e, "model load failed, will retry on next request");
            } else {
                error!(error = %e, "model is misconfigured");
            }
        }
        match self.last_error.lock() {
            Ok(mut guard) => *guard = err,
            Err(poisoned) => *poisoned.into_inner() = err,
        }
    }
}

fn load_blocking(source: &dyn ModelSource, path: &Path) -> Result<Arc<dyn Classifier>, ModelError> {
    if !path.is_file() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }
    source.load(path)
}

/// The label table must name every score the model declares.
pub fn validate_labels(classifier: &dyn Classifier, labels: &LabelTable) -> Result<(), ModelError> {
    match classifier.output_len() {
        Some(n) if n != labels.len() => Err(ModelError::Configuration(format!(
            "model outputs {n} classes but {} labels are configured",
            labels.len()
        ))),
        _ => Ok(()),
    }
}
