//! faceswap-core — Face index resolution and identity swapping.
//!
//! Faces are found with SCRFD and embedded with ArcFace, sorted left-to-right
//! into FaceSets, paired by the index resolver, and swapped with InSwapper.
//! CodeFormer and Real-ESRGAN provide optional restoration. All networks run
//! via ONNX Runtime on the CPU.

pub mod alignment;
pub mod analyser;
pub mod detector;
pub mod executor;
pub mod faceset;
pub mod pairing;
pub mod pipeline;
pub mod recognizer;
pub mod restoration;
pub mod selection;
pub mod swapper;
pub mod types;

use std::path::PathBuf;

pub use analyser::{AnalyserError, DetectFaces, FaceAnalyser};
pub use detector::{DetectorOptions, FaceDetector};
pub use faceset::FaceSet;
pub use pairing::{PairingError, PairingMode, PairingPolicy, Resolution, SwapPair};
pub use pipeline::{Pipeline, PipelineError, SwapOutcome, SwapRequest};
pub use restoration::{CodeFormer, CodeFormerRestorer, Restore, RestoreOptions, Upsampler};
pub use selection::{IndexSelection, SelectionError};
pub use swapper::{InSwapper, SwapFace};
pub use types::{BoundingBox, DetectedFace, Embedding, Side};

/// Default model directory: `$XDG_DATA_HOME/faceswap/models`, falling back to
/// `~/.local/share/faceswap/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceswap/models")
}
