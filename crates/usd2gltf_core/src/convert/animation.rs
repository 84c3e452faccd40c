//! Transform animation: sampling xform ops over time and writing glTF
//! animation channels.

use crate::gltf::{Animation, AnimationChannel, AnimationSampler, AnimationTarget, BufferBuilder};
use crate::usd::{Prim, Xformable};

use super::transform::Transform;

/// glTF sampler interpolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationInterpolation {
    Linear,
    Step,
    CubicSpline,
}

impl AnimationInterpolation {
    /// Map the user-facing option, ignoring case. Unknown values log a
    /// warning and fall back to linear.
    pub fn from_option(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "LINEAR" => Self::Linear,
            "STEP" => Self::Step,
            "CUBIC" | "CUBICSPLINE" => Self::CubicSpline,
            other => {
                log::warn!("Unknown interpolation '{}', using LINEAR", other);
                Self::Linear
            }
        }
    }

    pub fn as_gltf(self) -> &'static str {
        match self {
            Self::Linear => "LINEAR",
            Self::Step => "STEP",
            Self::CubicSpline => "CUBICSPLINE",
        }
    }
}

/// Sampled transforms of one node.
#[derive(Debug, Clone)]
pub(crate) struct NodeTrack {
    pub node: usize,
    pub name: String,
    /// Key times in seconds, strictly increasing
    pub times: Vec<f32>,
    pub transforms: Vec<Transform>,
}

/// Sample an animated prim at the union of its op sample times.
///
/// `time_origin` is the time code mapped to zero seconds.
pub(crate) fn sample_track(
    prim: &Prim,
    node: usize,
    time_origin: f64,
    time_codes_per_second: f64,
) -> Option<NodeTrack> {
    let xformable = Xformable::new(prim);
    if !xformable.is_animated() {
        return None;
    }

    let codes = xformable.sample_times();
    let rate = if time_codes_per_second > 0.0 {
        time_codes_per_second
    } else {
        log::warn!("Invalid timeCodesPerSecond {}, using 24", time_codes_per_second);
        24.0
    };

    let mut times = Vec::with_capacity(codes.len());
    let mut transforms: Vec<Transform> = Vec::with_capacity(codes.len());
    for code in codes {
        let seconds = ((code - time_origin) / rate) as f32;
        if times.last().is_some_and(|&last| seconds <= last) {
            continue;
        }
        let mut transform = Transform::from_matrix(xformable.local_transform(code));
        if let Some(previous) = transforms.last() {
            transform.align_rotation(previous.rotation);
        }
        times.push(seconds);
        transforms.push(transform);
    }

    log::debug!("{}: {} transform keys", prim.path(), times.len());
    Some(NodeTrack {
        node,
        name: prim.name().to_string(),
        times,
        transforms,
    })
}

/// Write tracks into glTF animations.
///
/// Each track gets translation, rotation and scale channels sharing one
/// input accessor. With `flatten` every channel goes into one animation
/// named `Animation`, otherwise each track is its own animation.
pub(crate) fn write_animations(
    tracks: &[NodeTrack],
    interpolation: AnimationInterpolation,
    flatten: bool,
    buffer: &mut BufferBuilder,
) -> Vec<Animation> {
    let mut animations: Vec<Animation> = Vec::new();

    for track in tracks {
        if track.times.is_empty() {
            continue;
        }

        let target = if flatten {
            if animations.is_empty() {
                animations.push(Animation {
                    name: Some("Animation".to_string()),
                    channels: Vec::new(),
                    samplers: Vec::new(),
                });
            }
            &mut animations[0]
        } else {
            animations.push(Animation {
                name: Some(track.name.clone()),
                channels: Vec::new(),
                samplers: Vec::new(),
            });
            let last = animations.len() - 1;
            &mut animations[last]
        };

        let input = buffer.add_scalars(&track.times);

        let translations: Vec<[f32; 3]> =
            track.transforms.iter().map(|t| t.translation.to_array()).collect();
        let rotations: Vec<[f32; 4]> =
            track.transforms.iter().map(|t| t.rotation.to_array()).collect();
        let scales: Vec<[f32; 3]> = track.transforms.iter().map(|t| t.scale.to_array()).collect();

        let (translation, rotation, scale) = match interpolation {
            AnimationInterpolation::CubicSpline => (
                buffer.add_vec3(&cubic_spline_outputs(&track.times, &translations), false, None),
                buffer.add_vec4(&cubic_spline_outputs(&track.times, &rotations), None),
                buffer.add_vec3(&cubic_spline_outputs(&track.times, &scales), false, None),
            ),
            _ => (
                buffer.add_vec3(&translations, false, None),
                buffer.add_vec4(&rotations, None),
                buffer.add_vec3(&scales, false, None),
            ),
        };

        for (path, output) in [("translation", translation), ("rotation", rotation), ("scale", scale)] {
            let sampler = target.samplers.len();
            target.samplers.push(AnimationSampler {
                input,
                output,
                interpolation: interpolation.as_gltf().to_string(),
            });
            target.channels.push(AnimationChannel {
                sampler,
                target: AnimationTarget {
                    node: track.node,
                    path: path.to_string(),
                },
            });
        }
    }

    animations
}

/// Expand keyed values into CUBICSPLINE output order:
/// `[in-tangent, value, out-tangent]` per key.
///
/// Tangents are Catmull-Rom derivatives per second, one-sided at the ends.
fn cubic_spline_outputs<const N: usize>(times: &[f32], values: &[[f32; N]]) -> Vec<[f32; N]> {
    let count = values.len().min(times.len());
    let mut out = Vec::with_capacity(count * 3);

    for k in 0..count {
        let tangent = if count < 2 {
            [0.0; N]
        } else {
            let (a, b) = match k {
                0 => (0, 1),
                k if k == count - 1 => (k - 1, k),
                k => (k - 1, k + 1),
            };
            let dt = times[b] - times[a];
            let mut tangent = [0.0; N];
            if dt > 0.0 {
                for i in 0..N {
                    tangent[i] = (values[b][i] - values[a][i]) / dt;
                }
            }
            tangent
        };
        out.push(tangent);
        out.push(values[k]);
        out.push(tangent);
    }
    out
}
