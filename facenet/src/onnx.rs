use std::io::Cursor;

use anyhow::Result;
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

use crate::manifest::ModelManifest;

pub(crate) type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Input layout of a network: `[1, channels, height, width]` plus per-channel normalization.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct InputSpec {
    pub channels: usize,
    pub width: u32,
    pub height: u32,
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl InputSpec {
    pub fn from_manifest(manifest: &ModelManifest) -> Self {
        let channels = manifest.channels();
        let (width, height) = manifest.input_size();
        Self {
            channels,
            width,
            height,
            mean: per_channel(&manifest.mean, channels, 0.0),
            std: per_channel(&manifest.std, channels, 1.0),
        }
    }

    pub fn with_size(mut self, (width, height): (u32, u32)) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn shape(&self) -> TVec<usize> {
        tvec!(1, self.channels, self.height as usize, self.width as usize)
    }

    /// Resize the image to the input size and lay it out as a normalized NCHW tensor.
    pub fn to_tensor(&self, image: &RgbImage) -> Tensor {
        let resized: RgbImage = imageops::resize(
            image,
            self.width,
            self.height,
            imageops::FilterType::Triangle,
        );
        let gray = (self.channels == 1).then(|| imageops::grayscale(&resized));

        tract_ndarray::Array4::from_shape_fn(
            (1, self.channels, self.height as usize, self.width as usize),
            |(_, c, y, x)| {
                let value = match &gray {
                    Some(gray) => gray[(x as _, y as _)][0],
                    None => resized[(x as _, y as _)][c],
                };
                (value as f32 / 255.0 - self.mean[c]) / self.std[c]
            },
        )
        .into()
    }
}

fn per_channel(values: &[f32], channels: usize, default: f32) -> Vec<f32> {
    match values {
        [] => vec![default; channels],
        [value] => vec![*value; channels],
        values => values.to_vec(),
    }
}

/// Parse ONNX bytes and turn them into an optimized, runnable plan for the given input.
pub(crate) fn load_runnable(weights: &[u8], input: &InputSpec) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), input.shape());
    let model = tract_onnx::onnx()
        .model_for_read(&mut Cursor::new(weights))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Run the plan on an image and return every output flattened to `f32`.
pub(crate) fn run_flat(
    model: &NnModel,
    input: &InputSpec,
    image: &RgbImage,
) -> Result<Vec<Vec<f32>>> {
    let outputs = model.run(tvec!(input.to_tensor(image).into()))?;
    outputs
        .iter()
        .map(|output| -> Result<Vec<f32>> {
            Ok(output.to_array_view::<f32>()?.iter().copied().collect())
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use image::Rgb;

    fn manifest(input_shape: Vec<usize>, mean: Vec<f32>, std: Vec<f32>) -> ModelManifest {
        ModelManifest {
            paths: vec!["net.onnx".into()],
            input_shape,
            mean,
            std,
            labels: vec![],
            softmax: true,
        }
    }

    #[test]
    fn rgb_tensor_is_normalized_per_channel() -> Result<()> {
        let spec = InputSpec::from_manifest(&manifest(
            vec![1, 3, 4, 6],
            vec![0.5, 0.0, 0.0],
            vec![0.5, 1.0, 2.0],
        ));
        let image = RgbImage::from_pixel(12, 8, Rgb([255, 255, 0]));

        let tensor = spec.to_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 3, 4, 6]);

        let view = tensor
            .to_array_view::<f32>()?
            .into_dimensionality::<tract_ndarray::Ix4>()?;
        assert!((view[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((view[[0, 1, 2, 3]] - 1.0).abs() < 1e-6);
        assert!(view[[0, 2, 3, 5]].abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn single_channel_tensor_uses_grayscale() -> Result<()> {
        let spec = InputSpec::from_manifest(&manifest(vec![1, 1, 2, 2], vec![], vec![]));
        let image = RgbImage::from_pixel(5, 5, Rgb([255, 255, 255]));

        let tensor = spec.to_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 1, 2, 2]);
        assert!(tensor
            .to_array_view::<f32>()?
            .iter()
            .all(|v| (v - 1.0).abs() < 1e-6));

        Ok(())
    }

    #[test]
    fn size_override_changes_shape() {
        let spec = InputSpec::from_manifest(&manifest(vec![1, 3, 240, 320], vec![], vec![]))
            .with_size((160, 120));
        assert_eq!(spec.shape(), tvec!(1, 3, 120, 160));
    }

    #[test]
    fn garbage_weights_fail_to_load() {
        let spec = InputSpec::from_manifest(&manifest(vec![1, 3, 8, 8], vec![], vec![]));
        assert!(load_runnable(b"definitely not protobuf", &spec).is_err());
    }
}
