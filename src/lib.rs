pub mod cli;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod mapping;
pub mod model;
pub mod postprocess;
pub mod preprocess;
pub mod service;

pub use crate::cli::{Args, Command, FetchArgs, InspectArgs, ServeArgs};
pub use crate::error::{ApiError, MappingError, ModelError, PreprocessError};
pub use crate::loader::{ModelSlot, ModelStatus};
pub use crate::mapping::{load_class_mapping, LabelTable};
pub use crate::model::{Classifier, ElementType, InputSpec, Layout, ModelInput, ModelSource, OnnxModel};
pub use crate::postprocess::{argmax_and_max, build_response, softmax, Prediction, ScoreTransform};
pub use crate::preprocess::Processor;
pub use crate::service::{router, AppState};
