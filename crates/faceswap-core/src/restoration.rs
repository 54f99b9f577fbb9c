//! Post-swap restoration: CodeFormer face restoration with optional
//! Real-ESRGAN upsampling of the background and of restored faces.

use crate::alignment::{self, FFHQ_TEMPLATE_512};
use crate::detector::{DetectorError, FaceDetector};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const CODEFORMER_INPUT_SIZE: u32 = 512;
const RESTORE_FEATHER: f32 = 0.08;
pub const MAX_UPSCALE: u32 = 4;

/// Above this many pixels on the longer side, upscale is capped at 2.
const LARGE_IMAGE_SIDE: u32 = 1000;
/// Above this many pixels on the longer side, no upscaling or enhancement runs.
const HUGE_IMAGE_SIDE: u32 = 1500;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid restore option: {0}")]
    InvalidOption(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Caller-facing restoration settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestoreOptions {
    pub background_enhance: bool,
    pub face_upsample: bool,
    /// Output scale factor, 1..=4.
    pub upscale: u32,
    /// CodeFormer fidelity weight: 0.0 favours quality, 1.0 favours identity.
    pub fidelity: f32,
}

impl RestoreOptions {
    pub fn new(
        background_enhance: bool,
        face_upsample: bool,
        upscale: u32,
        fidelity: f32,
    ) -> Result<Self, RestoreError> {
        if !(1..=MAX_UPSCALE).contains(&upscale) {
            return Err(RestoreError::InvalidOption(format!(
                "upscale must be between 1 and {MAX_UPSCALE}, got {upscale}"
            )));
        }
        if !(0.0..=1.0).contains(&fidelity) {
            return Err(RestoreError::InvalidOption(format!(
                "fidelity must be between 0.0 and 1.0, got {fidelity}"
            )));
        }
        Ok(Self { background_enhance, face_upsample, upscale, fidelity })
    }

    /// Scale settings down for large inputs to bound memory and runtime.
    pub fn fit_to(mut self, width: u32, height: u32) -> Self {
        let longest = width.max(height);
        self.upscale = self.upscale.min(MAX_UPSCALE);
        if self.upscale > 2 && longest > LARGE_IMAGE_SIDE {
            tracing::info!(longest, "large input, limiting upscale to 2");
            self.upscale = 2;
        }
        if longest > HUGE_IMAGE_SIDE {
            tracing::info!(longest, "very large input, disabling upscale and enhancement");
            self.upscale = 1;
            self.background_enhance = false;
            self.face_upsample = false;
        }
        self
    }
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self { background_enhance: false, face_upsample: false, upscale: 1, fidelity: 0.5 }
    }
}

/// Pluggable restoration capability, run once after all swaps.
pub trait Restore {
    fn restore(&mut self, image: RgbImage, options: &RestoreOptions) -> Result<RgbImage, RestoreError>;
}

fn load_session(model_path: &str, intra_threads: usize) -> Result<Session, RestoreError> {
    if !Path::new(model_path).exists() {
        return Err(RestoreError::ModelNotFound(model_path.to_string()));
    }
    Ok(Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?)
}

/// CodeFormer restoration network on 512×512 FFHQ-aligned crops.
pub struct CodeFormer {
    session: Session,
    image_input: String,
    weight_input: String,
}

impl CodeFormer {
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, RestoreError> {
        let session = load_session(model_path, intra_threads)?;
        let names: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let (image_input, weight_input) = match names.as_slice() {
            [image, weight, ..] => (image.clone(), weight.clone()),
            _ => {
                return Err(RestoreError::InferenceFailed(format!(
                    "CodeFormer requires 2 inputs (image, fidelity weight), got {names:?}"
                )))
            }
        };
        tracing::info!(path = model_path, inputs = ?names, "loaded CodeFormer model");
        Ok(Self { session, image_input, weight_input })
    }

    /// Restore one aligned 512×512 face crop.
    pub fn restore_face(&mut self, crop: &RgbImage, fidelity: f32) -> Result<RgbImage, RestoreError> {
        let input = to_signed_tensor(crop);
        let weight = Array1::from_elem(1, fidelity as f64);

        let outputs = self.session.run(ort::inputs![
            self.image_input.clone() => TensorRef::from_array_view(input.view())?,
            self.weight_input.clone() => TensorRef::from_array_view(weight.view())?,
        ])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RestoreError::InferenceFailed(format!("CodeFormer output: {e}")))?;
        let size = CODEFORMER_INPUT_SIZE as usize;
        if data.len() != 3 * size * size {
            return Err(RestoreError::InferenceFailed(format!(
                "expected 1×3×{size}×{size} CodeFormer output, got shape {shape:?}"
            )));
        }
        Ok(from_signed_tensor(data, CODEFORMER_INPUT_SIZE, CODEFORMER_INPUT_SIZE))
    }
}

/// Real-ESRGAN super-resolution network with a fixed native scale.
pub struct Upsampler {
    session: Session,
    native_scale: u32,
}

impl Upsampler {
    pub fn load(model_path: &str, native_scale: u32, intra_threads: usize) -> Result<Self, RestoreError> {
        let session = load_session(model_path, intra_threads)?;
        tracing::info!(path = model_path, native_scale, "loaded Real-ESRGAN model");
        Ok(Self { session, native_scale })
    }

    /// Upsample `image` by `outscale`.
    ///
    /// The network always produces its native scale; other factors are reached
    /// by resizing its output. The whole image goes through in one tile.
    pub fn enhance(&mut self, image: &RgbImage, outscale: u32) -> Result<RgbImage, RestoreError> {
        let (w, h) = image.dimensions();
        let input = to_unit_tensor(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RestoreError::InferenceFailed(format!("Real-ESRGAN output: {e}")))?;

        let (out_w, out_h) = (w * self.native_scale, h * self.native_scale);
        if data.len() != (3 * out_w * out_h) as usize {
            return Err(RestoreError::InferenceFailed(format!(
                "expected 1×3×{out_h}×{out_w} Real-ESRGAN output, got shape {shape:?}"
            )));
        }
        let upsampled = from_unit_tensor(data, out_w, out_h);

        if outscale == self.native_scale {
            Ok(upsampled)
        } else {
            Ok(imageops::resize(&upsampled, w * outscale, h * outscale, FilterType::Lanczos3))
        }
    }
}

/// SCRFD re-detection + CodeFormer + optional Real-ESRGAN.
pub struct CodeFormerRestorer {
    detector: FaceDetector,
    codeformer: CodeFormer,
    upsampler: Option<Upsampler>,
}

impl CodeFormerRestorer {
    pub fn new(detector: FaceDetector, codeformer: CodeFormer, upsampler: Option<Upsampler>) -> Self {
        Self { detector, codeformer, upsampler }
    }

    fn background(&mut self, image: &RgbImage, options: &RestoreOptions) -> Result<RgbImage, RestoreError> {
        match (options.background_enhance, self.upsampler.as_mut()) {
            (true, Some(upsampler)) => return upsampler.enhance(image, options.upscale),
            (true, None) => {
                tracing::warn!("background enhancement requested but no upsampler model loaded; resizing instead")
            }
            _ => {}
        }
        Ok(resize_by(image, options.upscale))
    }
}

impl Restore for CodeFormerRestorer {
    fn restore(&mut self, image: RgbImage, options: &RestoreOptions) -> Result<RgbImage, RestoreError> {
        let faces = self.detector.detect(&image)?;
        let mut canvas = self.background(&image, options)?;
        let upscale = options.upscale as f32;

        tracing::info!(
            faces = faces.len(),
            upscale = options.upscale,
            fidelity = options.fidelity,
            background_enhance = options.background_enhance,
            face_upsample = options.face_upsample,
            "restoring faces"
        );

        for face in &faces {
            let Some(landmarks) = face.landmarks.as_ref() else {
                continue;
            };
            let (crop, to_crop) =
                alignment::align_face(&image, landmarks, &FFHQ_TEMPLATE_512, CODEFORMER_INPUT_SIZE);
            let restored = self.codeformer.restore_face(&crop, options.fidelity)?;

            let (restored, crop_scale) = match self.upsampler.as_mut() {
                Some(upsampler) if options.face_upsample && options.upscale > 1 => {
                    (upsampler.enhance(&restored, options.upscale)?, upscale)
                }
                _ => (restored, 1.0),
            };

            let canvas_to_crop = to_crop.with_input_scale(upscale).scaled(crop_scale);
            alignment::paste_back(&mut canvas, &restored, &canvas_to_crop, RESTORE_FEATHER);
        }

        Ok(canvas)
    }
}

fn resize_by(image: &RgbImage, factor: u32) -> RgbImage {
    if factor <= 1 {
        return image.clone();
    }
    imageops::resize(image, image.width() * factor, image.height() * factor, FilterType::Lanczos3)
}

/// RGB → NCHW in [-1, 1].
fn to_signed_tensor(image: &RgbImage) -> Array4<f32> {
    to_unit_tensor(image).mapv(|v| (v - 0.5) / 0.5)
}

/// RGB → NCHW in [0, 1].
fn to_unit_tensor(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

fn from_signed_tensor(data: &[f32], width: u32, height: u32) -> RgbImage {
    let plane = (width * height) as usize;
    RgbImage::from_fn(width, height, |x, y| {
        let offset = (y * width + x) as usize;
        Rgb(std::array::from_fn(|c| {
            ((data[c * plane + offset].clamp(-1.0, 1.0) + 1.0) / 2.0 * 255.0).round() as u8
        }))
    })
}

fn from_unit_tensor(data: &[f32], width: u32, height: u32) -> RgbImage {
    let plane = (width * height) as usize;
    RgbImage::from_fn(width, height, |x, y| {
        let offset = (y * width + x) as usize;
        Rgb(std::array::from_fn(|c| {
            (data[c * plane + offset].clamp(0.0, 1.0) * 255.0).round() as u8
        }))
    })
}
