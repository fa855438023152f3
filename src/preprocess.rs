use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use half::f16;
use image::DynamicImage;
use ndarray::Array4;

use crate::error::PreprocessError;
use crate::model::{ElementType, InputSpec, Layout, ModelInput};

/// Decode uploaded bytes into an image.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::Decode("empty upload".into()));
    }
    image::load_from_memory(bytes).map_err(|e| PreprocessError::Decode(e.to_string()))
}

/// Builds model input tensors for one declared [`InputSpec`].
#[derive(Debug)]
pub struct Processor {
    pub spec: InputSpec,
}

impl Processor {
    pub fn new(spec: InputSpec) -> Self {
        Self { spec }
    }

    /// Decode, then [`Processor::prepare`].
    pub fn preprocess(&self, bytes: &[u8]) -> Result<ModelInput, PreprocessError> {
        let image = decode(bytes)?;
        self.prepare(image)
    }

    /// Convert to RGB, resize to the declared size, scale to `[0, 1]` and
    /// add the batch axis.
    pub fn prepare(&self, image: DynamicImage) -> Result<ModelInput, PreprocessError> {
        let rgb = match image {
            DynamicImage::ImageRgb8(_) => image,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };

        let (height, width) = (self.spec.height, self.spec.width);
        let mut dst_image = Image::new(width as u32, height as u32, PixelType::U8x3);
        let resize_options =
            ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::CatmullRom));
        Resizer::new()
            .resize(&rgb, &mut dst_image, &resize_options)
            .map_err(|e| PreprocessError::Resize(e.to_string()))?;

        let pixels: Vec<f32> = dst_image
            .buffer()
            .iter()
            .map(|&p| f32::from(p) / 255.0)
            .collect();
        let nhwc = Array4::from_shape_vec((1, height, width, InputSpec::CHANNELS), pixels)?;
        let batched = match self.spec.layout {
            Layout::Nhwc => nhwc,
            Layout::Nchw => nhwc
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned(),
        };

        Ok(match self.spec.element {
            ElementType::F32 => ModelInput::F32(batched),
            ElementType::F16 => ModelInput::F16(batched.mapv(f16::from_f32)),
        })
    }
}
