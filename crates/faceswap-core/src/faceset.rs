//! Left-to-right ordered face collections.

use crate::analyser::{AnalyserError, DetectFaces};
use crate::pairing::PairingError;
use crate::types::{DetectedFace, Side};
use image::RgbImage;

/// Faces detected in one image, indexed 0..n-1 from left to right.
///
/// Ordering is by bounding-box left edge. The sort is stable, so faces with
/// the same left edge keep the order the detector reported them in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceSet {
    faces: Vec<DetectedFace>,
}

impl FaceSet {
    /// Run `analyser` over `image` and order the result left to right.
    pub fn detect<A: DetectFaces + ?Sized>(analyser: &mut A, image: &RgbImage) -> Result<Self, AnalyserError> {
        let faces = analyser.detect(image)?;
        Ok(Self::from_faces(faces))
    }

    pub fn from_faces(mut faces: Vec<DetectedFace>) -> Self {
        faces.sort_by(|a, b| a.bbox.left().total_cmp(&b.bbox.left()));
        Self { faces }
    }

    /// Fail with `NoFacesFound` when the set is empty.
    pub fn require(self, side: Side, image: usize) -> Result<Self, PairingError> {
        if self.faces.is_empty() {
            return Err(PairingError::NoFacesFound { side, image });
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DetectedFace> {
        self.faces.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectedFace> {
        self.faces.iter()
    }
}

impl std::ops::Index<usize> for FaceSet {
    type Output = DetectedFace;

    fn index(&self, index: usize) -> &DetectedFace {
        &self.faces[index]
    }
}

impl<'a> IntoIterator for &'a FaceSet {
    type Item = &'a DetectedFace;
    type IntoIter = std::slice::Iter<'a, DetectedFace>;

    fn into_iter(self) -> Self::IntoIter {
        self.faces.iter()
    }
}
