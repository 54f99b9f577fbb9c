//! InSwapper identity swap via ONNX Runtime.
//!
//! The inswapper_128 network takes a 128×128 aligned target crop and a source
//! identity latent, and returns the crop re-rendered with the source identity.
//! The latent is the ArcFace embedding projected through the model's 512×512
//! embedding map ("emap"), which ships as a separate little-endian f32 file
//! because ONNX Runtime does not expose graph initializers.

use crate::alignment;
use crate::recognizer::{l2_normalize, ARCFACE_EMBEDDING_DIM};
use crate::types::{DetectedFace, Embedding};
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: u32 = 128;
const INSWAPPER_STD: f32 = 255.0;
/// Width of the blend ramp at the crop border, as a fraction of the crop size.
const PASTE_FEATHER: f32 = 0.1;

#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("model file not found: {0} — download inswapper_128.onnx and place it in the model directory")]
    ModelNotFound(String),
    #[error("embedding map {path}: {reason}")]
    EmbeddingMapInvalid { path: String, reason: String },
    #[error("target face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("source embedding has {0} values, expected {ARCFACE_EMBEDDING_DIM}")]
    EmbeddingDimension(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pluggable identity swap capability.
///
/// Takes ownership of the working image and returns the next one with
/// `target`'s face re-rendered as `source`. Callers must not assume the input
/// buffer survives.
pub trait SwapFace {
    fn swap(
        &mut self,
        image: RgbImage,
        target: &DetectedFace,
        source: &DetectedFace,
    ) -> Result<RgbImage, SwapperError>;
}

/// inswapper_128 swap model.
pub struct InSwapper {
    session: Session,
    target_input: String,
    source_input: String,
    emap: Array2<f32>,
}

impl InSwapper {
    /// Load the swap model and its embedding map.
    pub fn load(model_path: &str, emap_path: &str, intra_threads: usize) -> Result<Self, SwapperError> {
        if !Path::new(model_path).exists() {
            return Err(SwapperError::ModelNotFound(model_path.to_string()));
        }
        let emap = load_emap(emap_path)?;

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let input_names: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let [target_input, source_input] = match input_names.as_slice() {
            [target, source, ..] => [target.clone(), source.clone()],
            _ => {
                return Err(SwapperError::InferenceFailed(format!(
                    "inswapper requires 2 inputs (target, source), got {input_names:?}"
                )))
            }
        };

        tracing::info!(
            path = model_path,
            emap = emap_path,
            target_input = %target_input,
            source_input = %source_input,
            "loaded InSwapper model"
        );

        Ok(Self { session, target_input, source_input, emap })
    }

    /// Project an ArcFace embedding into the swap network's latent space.
    fn latent(&self, embedding: &Embedding) -> Result<Array2<f32>, SwapperError> {
        project_latent(&self.emap, embedding)
    }
}

impl SwapFace for InSwapper {
    fn swap(
        &mut self,
        mut image: RgbImage,
        target: &DetectedFace,
        source: &DetectedFace,
    ) -> Result<RgbImage, SwapperError> {
        let landmarks = target.landmarks().ok_or(SwapperError::NoLandmarks)?;
        let latent = self.latent(&source.embedding)?;

        let template = alignment::arcface_template(INSWAPPER_INPUT_SIZE);
        let (crop, to_crop) = alignment::align_face(&image, landmarks, &template, INSWAPPER_INPUT_SIZE);
        let blob = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![
            self.target_input.clone() => TensorRef::from_array_view(blob.view())?,
            self.source_input.clone() => TensorRef::from_array_view(latent.view())?,
        ])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapperError::InferenceFailed(format!("swap output: {e}")))?;
        let size = INSWAPPER_INPUT_SIZE as usize;
        if data.len() != 3 * size * size {
            return Err(SwapperError::InferenceFailed(format!(
                "expected 1×3×{size}×{size} output, got shape {shape:?}"
            )));
        }

        let swapped = postprocess(data, INSWAPPER_INPUT_SIZE);
        alignment::paste_back(&mut image, &swapped, &to_crop, PASTE_FEATHER);
        Ok(image)
    }
}

/// Read a 512×512 row-major little-endian f32 matrix.
fn load_emap(path: &str) -> Result<Array2<f32>, SwapperError> {
    let invalid = |reason: String| SwapperError::EmbeddingMapInvalid { path: path.to_string(), reason };

    let bytes = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
    parse_emap(&bytes).map_err(invalid)
}

fn parse_emap(bytes: &[u8]) -> Result<Array2<f32>, String> {
    let dim = ARCFACE_EMBEDDING_DIM;
    let expected = dim * dim * 4;
    if bytes.len() != expected {
        return Err(format!("expected {expected} bytes ({dim}×{dim} f32), got {}", bytes.len()));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Array2::from_shape_vec((dim, dim), values).map_err(|e| e.to_string())
}

fn project_latent(emap: &Array2<f32>, embedding: &Embedding) -> Result<Array2<f32>, SwapperError> {
    if embedding.values.len() != emap.nrows() {
        return Err(SwapperError::EmbeddingDimension(embedding.values.len()));
    }
    let normed = l2_normalize(&embedding.values);
    let row = ndarray::ArrayView1::from(&normed[..]);
    let projected = row.dot(emap);
    let latent = l2_normalize(&projected.to_vec());
    Array2::from_shape_vec((1, latent.len()), latent)
        .map_err(|e| SwapperError::InferenceFailed(format!("latent shape: {e}")))
}

/// RGB crop → NCHW in [0, 1].
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / INSWAPPER_STD;
        }
    }
    tensor
}

/// NCHW [0, 1] network output → RGB crop.
fn postprocess(data: &[f32], size: u32) -> RgbImage {
    let plane = (size * size) as usize;
    RgbImage::from_fn(size, size, |x, y| {
        let offset = (y * size + x) as usize;
        Rgb(std::array::from_fn(|c| {
            (data[c * plane + offset].clamp(0.0, 1.0) * 255.0).round() as u8
        }))
    })
}
