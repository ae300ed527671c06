//! Timbre retrieval: blend each feature frame toward its nearest
//! target-speaker references.

use crate::constants::{RETRIEVAL_DISTANCE_FLOOR, RETRIEVAL_NEIGHBORS};
use crate::index::VoicePrintIndex;
use crate::model::FeatureBatch;

/// `original + rate * (retrieved - original)` per frame, where `retrieved` is
/// the inverse-square-distance weighted mean of the 8 nearest references.
///
/// No index or `rate == 0` returns an exact copy.
#[must_use]
pub fn blend_features(
    features: &FeatureBatch,
    index: Option<&dyn VoicePrintIndex>,
    rate: f32,
) -> FeatureBatch {
    let Some(index) = index else {
        return features.clone();
    };
    if rate == 0.0 || index.is_empty() || index.dim() != features.dim() {
        return features.clone();
    }

    let dim = features.dim();
    let refs = index.reconstruct_all();
    let mut out = features.clone();
    let mut retrieved = vec![0.0f32; dim];

    for t in 0..features.frames() {
        let query = features.frame(t);
        let found = index.search(query, RETRIEVAL_NEIGHBORS);

        let weights: Vec<f32> = found
            .distances
            .iter()
            .map(|&d| {
                let d = d.max(RETRIEVAL_DISTANCE_FLOOR);
                1.0 / (d * d)
            })
            .collect();
        let total: f32 = weights.iter().sum();

        retrieved.fill(0.0);
        for (&w, &i) in weights.iter().zip(&found.indices) {
            let w = w / total;
            let row = &refs[i * dim..(i + 1) * dim];
            for (r, &v) in retrieved.iter_mut().zip(row) {
                *r += w * v;
            }
        }

        for (o, &r) in out.frame_mut(t).iter_mut().zip(&retrieved) {
            *o += rate * (r - *o);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FlatIndex;

    fn batch() -> FeatureBatch {
        FeatureBatch::new(3, 2, vec![0.1, 0.2, -0.3, 0.4, 0.5, -0.6]).expect("batch")
    }

    #[test]
    fn rate_zero_or_no_index_is_identity() {
        let fb = batch();
        let idx = FlatIndex::from_vectors(2, vec![9.0, 9.0]);
        assert_eq!(blend_features(&fb, Some(&idx), 0.0), fb);
        assert_eq!(blend_features(&fb, None, 0.7), fb);
    }

    #[test]
    fn identical_reference_is_fully_weighted() {
        // Every query coincides with a reference: distance 0 is floored, not divided by.
        let fb = FeatureBatch::new(2, 2, vec![1.0, 1.0, 1.0, 1.0]).expect("batch");
        let idx = FlatIndex::from_vectors(2, vec![1.0, 1.0, 5.0, 5.0]);
        let out = blend_features(&fb, Some(&idx), 0.7);
        for &v in out.data() {
            assert!(v.is_finite());
            assert!((v - 1.0).abs() < 1e-6, "got {v}");
        }
    }

    #[test]
    fn full_rate_replaces_with_weighted_mean() {
        let fb = FeatureBatch::new(1, 1, vec![0.0]).expect("batch");
        // Distances 1 and 4 -> weights 1 and 1/16.
        let idx = FlatIndex::from_vectors(1, vec![1.0, -2.0]);
        let out = blend_features(&fb, Some(&idx), 1.0);
        let expect = (1.0 * 1.0 + (1.0 / 16.0) * -2.0) / (1.0 + 1.0 / 16.0);
        assert!((out.data()[0] - expect).abs() < 1e-6);

        let half = blend_features(&fb, Some(&idx), 0.5);
        assert!((half.data()[0] - expect * 0.5).abs() < 1e-6);
    }
}
