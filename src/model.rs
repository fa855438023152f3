use std::path::Path;
use std::sync::Arc;

use half::f16;
use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::ValueType;

use crate::error::ModelError;

/// Channel placement of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `(batch, height, width, channels)`
    Nhwc,
    /// `(batch, channels, height, width)`
    Nchw,
}

/// Element type the model expects for its input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
    F16,
}

/// Image input geometry declared by the loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub height: usize,
    pub width: usize,
    pub layout: Layout,
    pub element: ElementType,
}

impl InputSpec {
    pub const CHANNELS: usize = 3;

    /// Reads a 4-d image input. Batch may be dynamic; spatial dims may not.
    pub fn from_dimensions(dims: &[i64], element: ElementType) -> Result<Self, ModelError> {
        let [batch, d1, d2, d3] = dims else {
            return Err(ModelError::UnsupportedInput(format!(
                "expected a 4-d image input, model declares {dims:?}"
            )));
        };
        if *batch > 1 {
            return Err(ModelError::UnsupportedInput(format!(
                "fixed batch size {batch} is not supported, need 1"
            )));
        }

        let channels = InputSpec::CHANNELS as i64;
        let (layout, height, width) = if *d3 == channels {
            (Layout::Nhwc, *d1, *d2)
        } else if *d1 == channels {
            (Layout::Nchw, *d2, *d3)
        } else {
            return Err(ModelError::UnsupportedInput(format!(
                "no 3-channel axis in input shape {dims:?}"
            )));
        };
        if height <= 0 || width <= 0 {
            return Err(ModelError::UnsupportedInput(format!(
                "input height and width must be static, model declares {dims:?}"
            )));
        }

        Ok(Self {
            height: height as usize,
            width: width as usize,
            layout,
            element,
        })
    }

    pub fn shape(&self) -> [usize; 4] {
        match self.layout {
            Layout::Nhwc => [1, self.height, self.width, Self::CHANNELS],
            Layout::Nchw => [1, Self::CHANNELS, self.height, self.width],
        }
    }

    /// Rejects tensors whose shape or element type differ from the declaration.
    pub fn check(&self, input: &ModelInput) -> Result<(), ModelError> {
        let expected = self.shape();
        if input.shape() != expected || input.element() != self.element {
            return Err(ModelError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: input.shape().to_vec(),
            });
        }
        Ok(())
    }
}

/// A single preprocessed, batched image.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    F32(Array4<f32>),
    F16(Array4<f16>),
}

impl ModelInput {
    pub fn shape(&self) -> &[usize] {
        match self {
            ModelInput::F32(a) => a.shape(),
            ModelInput::F16(a) => a.shape(),
        }
    }

    pub fn element(&self) -> ElementType {
        match self {
            ModelInput::F32(_) => ElementType::F32,
            ModelInput::F16(_) => ElementType::F16,
        }
    }
}

/// A loaded classifier: one batched image in, one score per class out.
///
/// Implementations hold no per-call state, so the same input always yields
/// the same scores.
pub trait Classifier: Send + Sync {
    fn input_spec(&self) -> InputSpec;

    /// Number of scores per image when the artifact declares it statically.
    fn output_len(&self) -> Option<usize>;

    fn infer(&self, input: &ModelInput) -> Result<Vec<f32>, ModelError>;
}

/// Turns a model artifact on disk into a [`Classifier`].
pub trait ModelSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Classifier>, ModelError>;
}

/// ONNX Runtime backed model loader.
#[derive(Debug, Clone, Copy)]
pub struct OnnxModel {
    cuda: bool,
}

impl OnnxModel {
    pub fn new(cuda: bool) -> Self {
        Self { cuda }
    }

    fn provider(&self) -> [ExecutionProviderDispatch; 1] {
        if self.cuda {
            [CUDAExecutionProvider::default().build().error_on_failure()]
        } else {
            [CPUExecutionProvider::default().build()]
        }
    }

    fn build_session(&self, model_path: &Path) -> ort::Result<Session> {
        SessionBuilder::new()?
            .with_execution_providers(self.provider())?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
    }

    pub fn load_model(&self, model_path: &Path) -> Result<OnnxClassifier, ModelError> {
        let session = self
            .build_session(model_path)
            .map_err(|e| ModelError::LoadFailure {
                path: model_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        OnnxClassifier::new(session)
    }
}

impl ModelSource for OnnxModel {
    fn load(&self, path: &Path) -> Result<Arc<dyn Classifier>, ModelError> {
        Ok(Arc::new(self.load_model(path)?))
    }
}

/// An ONNX Runtime session plus what it declares about its first input and
/// first output.
pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    spec: InputSpec,
    output_name: String,
    output_element: ElementType,
    output_len: Option<usize>,
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("session", &"ort::Session (not Debug)")
            .field("input", &self.input_name)
            .field("spec", &self.spec)
            .field("output", &self.output_name)
            .field("output_len", &self.output_len)
            .finish()
    }
}

impl OnnxClassifier {
    fn new(session: Session) -> Result<Self, ModelError> {
        let input = session
            .inputs
            .first()
            .ok_or_else(|| ModelError::UnsupportedInput("model declares no inputs".into()))?;
        let (element, dims) = tensor_type(&input.input_type)
            .ok_or_else(|| ModelError::UnsupportedInput(format!("input {} is not a tensor", input.name)))?;
        let element = element.ok_or_else(|| {
            ModelError::UnsupportedInput(format!("input {} must be float32 or float16", input.name))
        })?;
        let spec = InputSpec::from_dimensions(dims, element)?;
        let input_name = input.name.clone();

        let output = session
            .outputs
            .first()
            .ok_or_else(|| ModelError::UnsupportedInput("model declares no outputs".into()))?;
        let (output_element, output_dims) = tensor_type(&output.output_type)
            .ok_or_else(|| ModelError::UnsupportedInput(format!("output {} is not a tensor", output.name)))?;
        let output_element = output_element.ok_or_else(|| {
            ModelError::UnsupportedInput(format!("output {} must be float32 or float16", output.name))
        })?;
        let output_len = static_output_len(output_dims);
        let output_name = output.name.clone();

        Ok(Self {
            session,
            input_name,
            spec,
            output_name,
            output_element,
            output_len,
        })
    }

    /// Log what the artifact declares.
    pub fn summary(&self) {
        tracing::info!(
            input = %self.input_name,
            shape = ?self.spec.shape(),
            layout = ?self.spec.layout,
            element = ?self.spec.element,
            output = %self.output_name,
            output_len = ?self.output_len,
            "model summary"
        );
    }

    fn run(&self, input: &ModelInput) -> Result<Vec<f32>, ModelError> {
        let ort_err = |e: ort::Error| ModelError::Inference(e.to_string());
        let inputs = match input {
            ModelInput::F32(xs) => ort::inputs![self.input_name.as_str() => xs.view().into_dyn()],
            ModelInput::F16(xs) => ort::inputs![self.input_name.as_str() => xs.view().into_dyn()],
        }
        .map_err(ort_err)?;
        let ys = self.session.run(inputs).map_err(ort_err)?;
        let scores = ys.get(self.output_name.as_str()).ok_or_else(|| {
            ModelError::Inference(format!("output {} missing from run", self.output_name))
        })?;
        let scores = match self.output_element {
            ElementType::F32 => scores
                .try_extract_tensor::<f32>()
                .map_err(ort_err)?
                .iter()
                .copied()
                .collect(),
            ElementType::F16 => scores
                .try_extract_tensor::<f16>()
                .map_err(ort_err)?
                .iter()
                .map(|v| v.to_f32())
                .collect(),
        };
        Ok(scores)
    }
}

impl Classifier for OnnxClassifier {
    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn output_len(&self) -> Option<usize> {
        self.output_len
    }

    fn infer(&self, input: &ModelInput) -> Result<Vec<f32>, ModelError> {
        self.spec.check(input)?;
        self.run(input)
    }
}

fn tensor_type(value_type: &ValueType) -> Option<(Option<ElementType>, &[i64])> {
    match value_type {
        ValueType::Tensor { ty, dimensions, .. } => {
            let element = match ty {
                TensorElementType::Float32 => Some(ElementType::F32),
                TensorElementType::Float16 => Some(ElementType::F16),
                _ => None,
            };
            Some((element, dimensions.as_slice()))
        }
        _ => None,
    }
}

/// Scores per image for an output shaped `(batch, classes...)`, if static.
pub fn static_output_len(dims: &[i64]) -> Option<usize> {
    let per_image = match dims {
        [] => return None,
        [only] => std::slice::from_ref(only),
        [_batch, rest @ ..] => rest,
    };
    per_image
        .iter()
        .try_fold(1usize, |acc, &d| (d > 0).then(|| acc * d as usize))
}
