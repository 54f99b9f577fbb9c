//! Face analysis: detection followed by identity embedding.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyserError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Pluggable face detection capability.
///
/// Implementations return every face they find in `image`, each with the
/// landmarks and embedding the swap step needs. An empty vector means the
/// image has no usable faces. Order is unspecified; [`crate::FaceSet`] sorts.
pub trait DetectFaces {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyserError>;
}

/// SCRFD + ArcFace analyser, the `buffalo_l` pair.
pub struct FaceAnalyser {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyser {
    pub fn load(
        detector_path: &str,
        recognizer_path: &str,
        options: DetectorOptions,
    ) -> Result<Self, AnalyserError> {
        let detector = FaceDetector::load(detector_path, options)?;
        let recognizer = FaceRecognizer::load(recognizer_path, options.intra_threads)?;
        Ok(Self { detector, recognizer })
    }

    pub fn from_parts(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }
}

impl DetectFaces for FaceAnalyser {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyserError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            if bbox.landmarks.is_none() {
                tracing::warn!(x = bbox.x, y = bbox.y, "skipping detection without landmarks");
                continue;
            }
            let embedding = self.recognizer.extract(image, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }

        Ok(faces)
    }
}
