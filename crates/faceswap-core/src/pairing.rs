//! Face index resolution: which source face goes onto which target face.
//!
//! Three arities meet here: the number of source images, the number of faces
//! found in each of them, and the number of faces found in the target. Mode
//! selection is an ordered predicate chain ([`PairingMode::select`]); within a
//! mode the pairing is produced by one of the named [`PairingPolicy`] rules.
//! All positions are left-to-right FaceSet indices, so re-running on the same
//! images yields the same pairs.

use crate::selection::IndexSelection;
use crate::types::Side;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("no faces found in {side} image {image}")]
    NoFacesFound { side: Side, image: usize },
    #[error("{requested} {side} indexes requested but only {available} {side} faces were detected")]
    CountExceedsAvailable { side: Side, requested: usize, available: usize },
    #[error("{side} index {index} is out of range: {available} {side} faces detected (valid: 0..{available})")]
    IndexOutOfRange { side: Side, index: usize, available: usize },
    #[error("source and target index lists differ in length ({source_len} vs {target_len}); give one source index per target index")]
    UnequalIndexLists { source_len: usize, target_len: usize },
    #[error("unsupported face configuration: {source_images} source images for {target_faces} target faces; supply one source image, or one per target face")]
    UnsupportedConfiguration { source_images: usize, target_faces: usize },
}

/// How source faces are drawn for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMode {
    /// One source image per target face; image `i` feeds target face `i`.
    PerImage,
    /// Every source face comes from the single source image.
    SingleSource,
}

impl PairingMode {
    /// Pick the mode for a run, trying each rule in priority order.
    pub fn select(source_images: usize, target_faces: usize) -> Result<Self, PairingError> {
        if source_images > 1 && source_images == target_faces {
            Ok(PairingMode::PerImage)
        } else if source_images == 1 {
            Ok(PairingMode::SingleSource)
        } else {
            Err(PairingError::UnsupportedConfiguration { source_images, target_faces })
        }
    }
}

/// The rule that produced a set of pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Target face `i` takes face `min(i, len - 1)` of source image `i`.
    /// The clamp to the last face is a fallback for source images with fewer
    /// faces than their position, not a pairing rule in its own right.
    OnePerImage,
    /// The single source face is put on every target face.
    BroadcastSingleSource,
    /// Faces are paired by position until the smaller side runs out.
    MinOfTwoCounts,
    /// Caller-supplied index lists, paired element-wise.
    Explicit,
}

/// Put the identity of source face `source_index` (of source image
/// `source_image`) onto target face `target_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapPair {
    pub source_image: usize,
    pub source_index: usize,
    pub target_index: usize,
}

impl SwapPair {
    pub fn new(source_image: usize, source_index: usize, target_index: usize) -> Self {
        Self { source_image, source_index, target_index }
    }
}

/// Ordered pairs for one run, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub policy: PairingPolicy,
    pub pairs: Vec<SwapPair>,
}

/// Resolve pairs for `mode`.
///
/// `source_counts` holds the face count of every source FaceSet the mode
/// uses: one per source image for [`PairingMode::PerImage`], exactly one for
/// [`PairingMode::SingleSource`].
pub fn resolve(
    mode: PairingMode,
    source_counts: &[usize],
    target_faces: usize,
    source_selection: &IndexSelection,
    target_selection: &IndexSelection,
) -> Result<Resolution, PairingError> {
    match mode {
        PairingMode::PerImage => {
            if !source_selection.is_all() || !target_selection.is_all() {
                tracing::info!(
                    source = %source_selection,
                    target = %target_selection,
                    "index selections are ignored when pairing one source image per target face"
                );
            }
            resolve_per_image(source_counts, target_faces)
        }
        PairingMode::SingleSource => {
            let source_faces = match source_counts {
                [count] => *count,
                _ => {
                    return Err(PairingError::UnsupportedConfiguration {
                        source_images: source_counts.len(),
                        target_faces,
                    })
                }
            };
            resolve_single_source(source_faces, target_faces, source_selection, target_selection)
        }
    }
}

/// Target face `i` takes a face from source image `i`.
pub fn resolve_per_image(source_counts: &[usize], target_faces: usize) -> Result<Resolution, PairingError> {
    if source_counts.len() != target_faces {
        return Err(PairingError::UnsupportedConfiguration {
            source_images: source_counts.len(),
            target_faces,
        });
    }

    let pairs = source_counts
        .iter()
        .enumerate()
        .map(|(i, &count)| -> Result<SwapPair, PairingError> {
            if count == 0 {
                return Err(PairingError::NoFacesFound { side: Side::Source, image: i });
            }
            let source_index = clamp_to_last(i, count);
            if source_index != i {
                tracing::debug!(image = i, faces = count, source_index, "clamped to last source face");
            }
            Ok(SwapPair::new(i, source_index, i))
        })
        .collect::<Result<Vec<_>, PairingError>>()?;

    Ok(Resolution { policy: PairingPolicy::OnePerImage, pairs })
}

/// Position `i`, or the last valid index when fewer than `i + 1` faces exist.
fn clamp_to_last(i: usize, count: usize) -> usize {
    i.min(count.saturating_sub(1))
}

/// All source faces come from source image 0.
pub fn resolve_single_source(
    source_faces: usize,
    target_faces: usize,
    source_selection: &IndexSelection,
    target_selection: &IndexSelection,
) -> Result<Resolution, PairingError> {
    if source_faces == 0 {
        return Err(PairingError::NoFacesFound { side: Side::Source, image: 0 });
    }

    if target_selection.is_all() {
        return Ok(resolve_all_targets(source_faces, target_faces));
    }

    let sources = source_selection.expand(source_faces);
    let targets = target_selection.expand(target_faces);

    if sources.len() > source_faces {
        return Err(PairingError::CountExceedsAvailable {
            side: Side::Source,
            requested: sources.len(),
            available: source_faces,
        });
    }
    if targets.len() > target_faces {
        return Err(PairingError::CountExceedsAvailable {
            side: Side::Target,
            requested: targets.len(),
            available: target_faces,
        });
    }
    if sources.len() != targets.len() {
        return Err(PairingError::UnequalIndexLists {
            source_len: sources.len(),
            target_len: targets.len(),
        });
    }

    let pairs = sources
        .iter()
        .zip(targets.iter())
        .map(|(&source_index, &target_index)| -> Result<SwapPair, PairingError> {
            check_bounds(Side::Source, source_index, source_faces)?;
            check_bounds(Side::Target, target_index, target_faces)?;
            Ok(SwapPair::new(0, source_index, target_index))
        })
        .collect::<Result<Vec<_>, PairingError>>()?;

    Ok(Resolution { policy: PairingPolicy::Explicit, pairs })
}

/// Target selection is ALL: broadcast a lone source face, otherwise pair by
/// position up to the smaller count. The source selection plays no part.
fn resolve_all_targets(source_faces: usize, target_faces: usize) -> Resolution {
    if source_faces == 1 {
        tracing::info!(target_faces, "replacing every target face with the single source face");
        return Resolution {
            policy: PairingPolicy::BroadcastSingleSource,
            pairs: (0..target_faces).map(|i| SwapPair::new(0, 0, i)).collect(),
        };
    }

    let n = source_faces.min(target_faces);
    if source_faces != target_faces {
        tracing::info!(
            source_faces,
            target_faces,
            swapping = n,
            "face counts differ, replacing as many as possible from left to right"
        );
    }
    Resolution {
        policy: PairingPolicy::MinOfTwoCounts,
        pairs: (0..n).map(|i| SwapPair::new(0, i, i)).collect(),
    }
}

fn check_bounds(side: Side, index: usize, available: usize) -> Result<(), PairingError> {
    if index >= available {
        return Err(PairingError::IndexOutOfRange { side, index, available });
    }
    Ok(())
}
