//! One swap run: detect, pair, fold swaps, optionally restore.

use crate::analyser::{AnalyserError, DetectFaces};
use crate::executor;
use crate::faceset::FaceSet;
use crate::pairing::{self, PairingError, PairingMode, Resolution};
use crate::restoration::{Restore, RestoreError, RestoreOptions};
use crate::selection::IndexSelection;
use crate::swapper::{SwapFace, SwapperError};
use crate::types::Side;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("face analysis failed: {0}")]
    Analyser(#[from] AnalyserError),
    #[error(transparent)]
    Pairing(#[from] PairingError),
    #[error("face swap failed: {0}")]
    Swapper(#[from] SwapperError),
    #[error("restoration failed: {0}")]
    Restore(#[from] RestoreError),
    #[error("restoration requested but no restorer is configured")]
    RestorerUnavailable,
}

/// Inputs of one run.
#[derive(Debug, Clone, Copy)]
pub struct SwapRequest<'a> {
    /// Source images in caller order; per-image pairing follows this order.
    pub sources: &'a [RgbImage],
    pub target: &'a RgbImage,
    pub source_selection: &'a IndexSelection,
    pub target_selection: &'a IndexSelection,
    /// Restoration settings, or `None` to skip restoration.
    pub restore: Option<RestoreOptions>,
}

/// How a run ended when nothing went wrong.
#[derive(Debug)]
pub enum SwapOutcome {
    Swapped { image: RgbImage, resolution: Resolution },
    /// The target has no detectable faces; there is nothing to swap onto.
    NoTargetFaces,
}

/// Wires the three capabilities together for a run.
///
/// Capabilities are borrowed so their loaded models can be reused across runs.
pub struct Pipeline<'a> {
    analyser: &'a mut dyn DetectFaces,
    swapper: &'a mut dyn SwapFace,
    restorer: Option<&'a mut dyn Restore>,
}

impl<'a> Pipeline<'a> {
    pub fn new(analyser: &'a mut dyn DetectFaces, swapper: &'a mut dyn SwapFace) -> Self {
        Self { analyser, swapper, restorer: None }
    }

    pub fn with_restorer(mut self, restorer: &'a mut dyn Restore) -> Self {
        self.restorer = Some(restorer);
        self
    }

    pub fn run(&mut self, request: &SwapRequest<'_>) -> Result<SwapOutcome, PipelineError> {
        let target = FaceSet::detect(&mut *self.analyser, request.target)?;
        tracing::info!(
            faces = target.len(),
            source_images = request.sources.len(),
            source_indexes = %request.source_selection,
            target_indexes = %request.target_selection,
            "target faces detected"
        );

        if target.is_empty() {
            tracing::info!("no target faces found");
            return Ok(SwapOutcome::NoTargetFaces);
        }

        let mode = PairingMode::select(request.sources.len(), target.len())?;
        let sources = self.source_facesets(mode, request.sources)?;
        let counts: Vec<usize> = sources.iter().map(FaceSet::len).collect();

        let resolution = pairing::resolve(
            mode,
            &counts,
            target.len(),
            request.source_selection,
            request.target_selection,
        )?;
        tracing::info!(
            ?mode,
            policy = ?resolution.policy,
            pairs = resolution.pairs.len(),
            "swap pairs resolved"
        );

        let swapped = executor::run(&mut *self.swapper, &resolution.pairs, &sources, &target, request.target)?;

        let image = match request.restore {
            None => swapped,
            Some(options) => {
                let restorer = self.restorer.as_deref_mut().ok_or(PipelineError::RestorerUnavailable)?;
                let options = options.fit_to(swapped.width(), swapped.height());
                restorer.restore(swapped, &options)?
            }
        };

        Ok(SwapOutcome::Swapped { image, resolution })
    }

    /// Detect the source FaceSets `mode` needs; every one must have faces.
    fn source_facesets(&mut self, mode: PairingMode, images: &[RgbImage]) -> Result<Vec<FaceSet>, PipelineError> {
        let used = match mode {
            PairingMode::PerImage => images,
            PairingMode::SingleSource => &images[..1],
        };

        used.iter()
            .enumerate()
            .map(|(i, image)| -> Result<FaceSet, PipelineError> {
                let set = FaceSet::detect(&mut *self.analyser, image)?;
                tracing::info!(image = i, faces = set.len(), "source faces detected");
                Ok(set.require(Side::Source, i)?)
            })
            .collect()
    }
}
