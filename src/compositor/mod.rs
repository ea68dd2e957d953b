//! Per-pixel threshold compositing
//!
//! The exact numeric transform applied to every output pixel, written as a
//! pure function of (source color, parameters). The WGSL fragment shader in
//! `shaders/threshold.wgsl` implements the same formulas term for term; this
//! CPU version is the reference the tests run against.
//!
//! There is no cross-pixel dependency and no hidden state: identical inputs
//! always produce bit-identical output.

/// Everything the transform needs for one frame, already resolved:
/// `threshold` is the effective threshold (user or adaptive mix).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositeParams {
    pub threshold: f32,
    pub smoothness: f32,
    pub two_tone: bool,
    pub chroma: bool,
    pub color1: [f32; 4],
    pub color2: [f32; 4],
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            smoothness: 0.0,
            two_tone: false,
            chroma: false,
            color1: [1.0, 0.82, 1.0, 1.0],
            color2: [0.93, 0.0, 0.0, 1.0],
        }
    }
}

/// Rec. 601 luma weights; alpha does not contribute.
pub fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.30 * r + 0.59 * g + 0.11 * b
}

/// Cubic Hermite smoothstep with a guarded degenerate case.
///
/// When the edges coincide (smoothness 0, or a negative smoothness stored
/// verbatim by the parameter store) the interpolation collapses to a hard
/// step. `x` exactly at the edge resolves to 0, matching the limit of
/// smoothstep as the band width shrinks to zero.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x > edge0 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// RGB → HSV, six-sector decomposition. All channels in [0, 1].
///
/// Saturation is 0 when max == min (achromatic), in which case hue is left
/// at 0 as well. Hue wraps into [0, 1).
pub fn rgb_to_hsv(rgb: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = rgb;
    let max_val = r.max(g).max(b);
    let min_val = r.min(g).min(b);
    let delta = max_val - min_val;

    let mut hsv = [0.0, 0.0, max_val];
    if delta != 0.0 {
        hsv[1] = delta / max_val;

        let del = |c: f32| (((max_val - c) / 6.0) + (delta / 2.0)) / delta;
        let (del_r, del_g, del_b) = (del(r), del(g), del(b));

        let mut h = if r == max_val {
            del_b - del_g
        } else if g == max_val {
            (1.0 / 3.0) + del_r - del_b
        } else {
            (2.0 / 3.0) + del_g - del_r
        };

        if h < 0.0 {
            h += 1.0;
        }
        if h > 1.0 {
            h -= 1.0;
        }
        hsv[0] = h;
    }
    hsv
}

/// HSV → RGB, inverse of [`rgb_to_hsv`].
///
/// Zero saturation short-circuits to value-only grayscale regardless of hue.
pub fn hsv_to_rgb(hsv: [f32; 3]) -> [f32; 3] {
    let [h, s, v] = hsv;
    if s == 0.0 {
        return [v, v, v];
    }

    let var_h = h * 6.0;
    let var_i = var_h.floor();
    let var_1 = v * (1.0 - s);
    let var_2 = v * (1.0 - s * (var_h - var_i));
    let var_3 = v * (1.0 - s * (1.0 - (var_h - var_i)));

    match var_i as i32 {
        0 => [v, var_3, var_1],
        1 => [var_2, v, var_1],
        2 => [var_1, v, var_3],
        3 => [var_1, var_2, v],
        4 => [var_3, var_1, v],
        _ => [v, var_1, var_2],
    }
}

/// The per-pixel transform.
///
/// 1. Luminance of the source color.
/// 2. `f = smoothstep(threshold, threshold + smoothness, luminance)`.
/// 3. Output alpha is `color1`'s alpha when `f <= 0.5`, else `color2`'s.
/// 4. Mode tie-break, in this exact precedence:
///    - two-tone and not chroma: `f * color1 + (1 - f) * color2`, a full
///      RGBA blend that ignores the alpha from step 3;
///    - chroma and not two-tone: source hue/saturation recombined with
///      `f` as the value channel, alpha from step 3;
///    - anything else, including both flags set: grayscale
///      `(f, f, f, alpha)`.
///
/// Both flags set is deliberately the grayscale branch, not an OR.
pub fn composite(src: [f32; 4], params: &CompositeParams) -> [f32; 4] {
    let lum = luminance(src[0], src[1], src[2]);
    let f = smoothstep(params.threshold, params.threshold + params.smoothness, lum);

    let alpha = if f <= 0.5 {
        params.color1[3]
    } else {
        params.color2[3]
    };

    if params.two_tone && !params.chroma {
        let c1 = params.color1;
        let c2 = params.color2;
        [
            f * c1[0] + (1.0 - f) * c2[0],
            f * c1[1] + (1.0 - f) * c2[1],
            f * c1[2] + (1.0 - f) * c2[2],
            f * c1[3] + (1.0 - f) * c2[3],
        ]
    } else if params.chroma && !params.two_tone {
        let hsv = rgb_to_hsv([src[0], src[1], src[2]]);
        let rgb = hsv_to_rgb([hsv[0], hsv[1], f]);
        [rgb[0], rgb[1], rgb[2], alpha]
    } else {
        [f, f, f, alpha]
    }
}
