//! Applies resolved swap pairs to a working image.

use crate::faceset::FaceSet;
use crate::pairing::SwapPair;
use crate::swapper::{SwapFace, SwapperError};
use image::RgbImage;

/// Apply one pair: look up both faces and hand the working image to the swapper.
///
/// Indices must already have been bounds-checked by the resolver; a pair that
/// still points outside its FaceSet is a programming error and panics.
pub fn apply<S: SwapFace + ?Sized>(
    swapper: &mut S,
    pair: &SwapPair,
    sources: &[FaceSet],
    target: &FaceSet,
    working: RgbImage,
) -> Result<RgbImage, SwapperError> {
    let source_face = &sources[pair.source_image][pair.source_index];
    let target_face = &target[pair.target_index];

    tracing::debug!(
        source_image = pair.source_image,
        source_index = pair.source_index,
        target_index = pair.target_index,
        identity_similarity = source_face.embedding.similarity(&target_face.embedding),
        "swapping face"
    );

    swapper.swap(working, target_face, source_face)
}

/// Fold every pair over a copy of `target_image`, in order.
///
/// The first failure ends the run; there is no partial result.
pub fn run<S: SwapFace + ?Sized>(
    swapper: &mut S,
    pairs: &[SwapPair],
    sources: &[FaceSet],
    target: &FaceSet,
    target_image: &RgbImage,
) -> Result<RgbImage, SwapperError> {
    pairs.iter().try_fold(target_image.clone(), |working, pair| {
        apply(swapper, pair, sources, target, working)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faceset::tests::face_at;
    use crate::types::DetectedFace;
    use image::Rgb;

    /// Writes the source tag into the red channel of the target face's left column.
    struct StampSwapper {
        calls: Vec<(f32, f32)>,
        fail_on_call: Option<usize>,
    }

    impl SwapFace for StampSwapper {
        fn swap(
            &mut self,
            mut image: RgbImage,
            target: &DetectedFace,
            source: &DetectedFace,
        ) -> Result<RgbImage, SwapperError> {
            if self.fail_on_call == Some(self.calls.len()) {
                return Err(SwapperError::InferenceFailed("boom".into()));
            }
            self.calls.push((source.embedding.values[0], target.bbox.x));
            image.put_pixel(target.bbox.x as u32, 0, Rgb([source.embedding.values[0] as u8, 0, 0]));
            Ok(image)
        }
    }

    fn stamp() -> StampSwapper {
        StampSwapper { calls: Vec::new(), fail_on_call: None }
    }

    #[test]
    fn test_run_folds_in_order() {
        let sources = vec![FaceSet::from_faces(vec![face_at(0.0, 11.0), face_at(10.0, 22.0)])];
        let target = FaceSet::from_faces(vec![face_at(1.0, 0.0), face_at(5.0, 0.0)]);
        let image = RgbImage::new(8, 2);
        let pairs = [SwapPair::new(0, 1, 0), SwapPair::new(0, 0, 1)];

        let mut swapper = stamp();
        let out = run(&mut swapper, &pairs, &sources, &target, &image).unwrap();

        assert_eq!(swapper.calls, vec![(22.0, 1.0), (11.0, 5.0)]);
        assert_eq!(out.get_pixel(1, 0).0[0], 22);
        assert_eq!(out.get_pixel(5, 0).0[0], 11);
        // The caller's target image is untouched.
        assert_eq!(image.get_pixel(1, 0).0[0], 0);
    }

    #[test]
    fn test_run_uses_source_image_of_pair() {
        let sources = vec![
            FaceSet::from_faces(vec![face_at(0.0, 1.0)]),
            FaceSet::from_faces(vec![face_at(0.0, 2.0)]),
        ];
        let target = FaceSet::from_faces(vec![face_at(0.0, 0.0), face_at(3.0, 0.0)]);
        let pairs = [SwapPair::new(0, 0, 0), SwapPair::new(1, 0, 1)];

        let mut swapper = stamp();
        run(&mut swapper, &pairs, &sources, &target, &RgbImage::new(4, 1)).unwrap();
        assert_eq!(swapper.calls, vec![(1.0, 0.0), (2.0, 3.0)]);
    }

    #[test]
    fn test_run_no_pairs_returns_copy() {
        let image = RgbImage::from_pixel(3, 3, Rgb([9, 9, 9]));
        let mut swapper = stamp();
        let out = run(&mut swapper, &[], &[], &FaceSet::default(), &image).unwrap();
        assert_eq!(out, image);
        assert!(swapper.calls.is_empty());
    }

    #[test]
    fn test_run_stops_at_first_failure() {
        let sources = vec![FaceSet::from_faces(vec![face_at(0.0, 1.0)])];
        let target = FaceSet::from_faces(vec![face_at(0.0, 0.0), face_at(2.0, 0.0), face_at(4.0, 0.0)]);
        let pairs = [SwapPair::new(0, 0, 0), SwapPair::new(0, 0, 1), SwapPair::new(0, 0, 2)];

        let mut swapper = StampSwapper { calls: Vec::new(), fail_on_call: Some(1) };
        let result = run(&mut swapper, &pairs, &sources, &target, &RgbImage::new(6, 1));
        assert!(matches!(result, Err(SwapperError::InferenceFailed(_))));
        assert_eq!(swapper.calls.len(), 1);
    }
}
