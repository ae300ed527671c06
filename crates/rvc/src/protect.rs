use crate::constants::PROTECT_DISABLED_AT;
use crate::model::FeatureBatch;

/// Keep the original features on unvoiced frames.
///
/// Frames with `f0 < 1` take `protect * blended + (1 - protect) * original`;
/// voiced frames keep `blended`. `protect >= 0.5` disables protection.
/// `f0` must have one value per feature frame.
#[must_use]
pub fn protect_unvoiced(
    original: &FeatureBatch,
    blended: &FeatureBatch,
    f0: &[f32],
    protect: f32,
) -> FeatureBatch {
    if protect >= PROTECT_DISABLED_AT {
        return blended.clone();
    }

    let mut out = blended.clone();
    let frames = out.frames().min(original.frames()).min(f0.len());
    for t in 0..frames {
        if f0[t] >= 1.0 {
            continue;
        }
        let w = protect;
        for (o, &orig) in out.frame_mut(t).iter_mut().zip(original.frame(t)) {
            *o = *o * w + orig * (1.0 - w);
        }
    }
    out
}
