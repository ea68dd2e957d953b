//! Adaptive threshold estimation
//!
//! Derives a normalized threshold level in [0, 1] from the pixels of a frame.
//! Three interchangeable methods are provided: a gradient/edge-variance
//! estimator (the default, which weights brightness by local contrast), an
//! entropy-split estimator, and Otsu's inter-class variance method. Exactly
//! one method runs per frame when adaptive mode is active.
//!
//! All methods accept a packed RGBA8 buffer and degrade gracefully on
//! degenerate input (zero-size frames, flat images, empty histograms) by
//! returning 0.0 instead of dividing by zero.

/// Selects which estimation algorithm runs each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EstimatorMethod {
    /// Brightness weighted by local edge contrast. Tends to sit slightly
    /// higher than the histogram methods and tracks scene content well.
    #[default]
    Gradient,
    /// Maximize the combined Shannon entropy of the two histogram partitions.
    Entropy,
    /// Maximize the inter-class variance between the two partitions.
    Otsu,
}

impl EstimatorMethod {
    /// Display name for UI and logs.
    pub fn name(self) -> &'static str {
        match self {
            EstimatorMethod::Gradient => "Gradient",
            EstimatorMethod::Entropy => "Entropy",
            EstimatorMethod::Otsu => "Otsu",
        }
    }
}

/// Run the selected method over a packed RGBA8 buffer.
///
/// Returns a threshold in [0, 1]. Input too small or empty yields 0.0.
pub fn estimate(method: EstimatorMethod, rgba: &[u8], width: usize, height: usize) -> f32 {
    match method {
        EstimatorMethod::Gradient => gradient(rgba, width, height),
        EstimatorMethod::Entropy => {
            let hist = histogram(rgba, width, height);
            entropy_split(&hist) as f32 / 256.0
        }
        EstimatorMethod::Otsu => {
            let hist = histogram(rgba, width, height);
            otsu(&hist, width, height) as f32 / 256.0
        }
    }
}

/// Sum of the R, G, B bytes of the pixel starting at `offset` (0..=765).
#[inline]
fn rgb_sum(rgba: &[u8], offset: usize) -> i32 {
    rgba[offset] as i32 + rgba[offset + 1] as i32 + rgba[offset + 2] as i32
}

/// Gradient/edge-variance estimator.
///
/// Samples the frame on a 4-pixel stride in both axes, skipping a 4-pixel
/// border, to bound cost on large frames. For each sampled pixel the
/// horizontal edge magnitude is `|left - right|` and the vertical edge
/// magnitude `|top - bottom|`, each term being the RGB byte sum of that
/// neighbour. The estimate is the average of the sampled brightness values
/// weighted by `max(horizontal, vertical)` edge energy:
///
/// ```text
/// threshold = (sum(edge * center) / (sum(edge) + 1)) / (3 * 256)
/// ```
///
/// The `+ 1` keeps a flat image (zero edge energy everywhere) at 0.0, and
/// `3 * 256` normalizes the 0..=765 RGB sums to [0, 1].
///
/// The vertical term must use an independent bottom-neighbour sum; folding
/// both vertical neighbours into one accumulator would turn the vertical
/// "edge" into raw brightness and drag flat images toward mid-gray.
pub fn gradient(rgba: &[u8], width: usize, height: usize) -> f32 {
    // Too small to sample: the stride-4 interior is empty.
    if width < 9 || height < 9 || rgba.len() < width * height * 4 {
        return 0.0;
    }

    let row_bytes = width * 4;
    let mut sum_edge = 0.0f64;
    let mut sum_edge_weighted = 0.0f64;

    let mut y = 4;
    while y < height - 4 {
        let row = y * row_bytes;
        let mut x = 4;
        while x < width - 4 {
            let p = row + x * 4;

            let left = rgb_sum(rgba, p - 4);
            let mid = rgb_sum(rgba, p);
            let right = rgb_sum(rgba, p + 4);
            let top = rgb_sum(rgba, p - row_bytes);
            let bot = rgb_sum(rgba, p + row_bytes);

            let ex = (left - right).abs();
            let ey = (top - bot).abs();
            let edge = ex.max(ey);

            sum_edge += edge as f64;
            sum_edge_weighted += (edge * mid) as f64;

            x += 4;
        }
        y += 4;
    }

    ((sum_edge_weighted / (sum_edge + 1.0)) / (3.0 * 256.0)) as f32
}

/// Build the 256-bin mean-intensity histogram of a packed RGBA8 buffer.
///
/// Bin index is the integer-truncated mean `(R + G + B) / 3` per pixel.
/// Rebuilt from scratch on every call; nothing persists across frames.
pub fn histogram(rgba: &[u8], width: usize, height: usize) -> [u32; 256] {
    let mut hist = [0u32; 256];
    let pixel_bytes = width * height * 4;
    if rgba.len() < pixel_bytes {
        return hist;
    }
    for pixel in rgba[..pixel_bytes].chunks_exact(4) {
        let k = pixel[0] as usize + pixel[1] as usize + pixel[2] as usize;
        hist[k / 3] += 1;
    }
    hist
}

/// Entropy-split threshold over a 256-bin histogram.
///
/// For every candidate split `t`, the bins 0..=t form the "black"
/// sub-distribution and t+1..=255 the "white" one; each side is renormalized
/// by its own mass and its Shannon entropy computed (an empty side counts as
/// zero entropy). The split maximizing the combined entropy wins; the
/// left-to-right scan with a strict comparison keeps the first maximum, so
/// ties resolve to the lowest `t`. An all-zero histogram yields 0.
pub fn entropy_split(hist: &[u32; 256]) -> usize {
    let total: u64 = hist.iter().map(|&c| c as u64).sum();
    if total == 0 {
        return 0;
    }

    let mut p = [0.0f64; 256];
    for (bin, &count) in hist.iter().enumerate() {
        p[bin] = count as f64 / total as f64;
    }

    // Cumulative mass of the black side per candidate split.
    let mut pt = [0.0f64; 256];
    pt[0] = p[0];
    for t in 1..256 {
        pt[t] = pt[t - 1] + p[t];
    }

    let split_entropy = |t: usize| -> f64 {
        let mut h_black = 0.0;
        if pt[t] > 0.0 {
            for i in 0..=t {
                if p[i] > 0.0 {
                    let q = p[i] / pt[t];
                    h_black -= q * q.ln();
                }
            }
        }
        let white_mass = 1.0 - pt[t];
        let mut h_white = 0.0;
        if white_mass > 0.0 {
            for i in (t + 1)..256 {
                if p[i] > 0.0 {
                    let q = p[i] / white_mass;
                    h_white -= q * q.ln();
                }
            }
        }
        h_black + h_white
    };

    let mut best_t = 0;
    let mut best = split_entropy(0);
    for t in 1..256 {
        let h = split_entropy(t);
        if h > best {
            best = h;
            best_t = t;
        }
    }
    best_t
}

/// Otsu's inter-class variance threshold over a 256-bin histogram.
///
/// Probabilities are taken against `width * height`, the running class
/// weight `omega` and class mean `myu` are accumulated once, and for each
/// candidate `t` in 0..=254 the inter-class variance
/// `(myu[255] * omega[t] - myu[t])^2 / (omega[t] * (1 - omega[t]))`
/// is evaluated where `omega[t]` lies strictly inside (0, 1). The running
/// maximum starts at 0, so a degenerate histogram yields threshold 0.
pub fn otsu(hist: &[u32; 256], width: usize, height: usize) -> usize {
    let total = width * height;
    if total == 0 {
        return 0;
    }

    let mut prob = [0.0f64; 256];
    for (bin, &count) in hist.iter().enumerate() {
        prob[bin] = count as f64 / total as f64;
    }

    let mut omega = [0.0f64; 256];
    let mut myu = [0.0f64; 256];
    omega[0] = prob[0];
    for i in 1..256 {
        omega[i] = omega[i - 1] + prob[i];
        myu[i] = myu[i - 1] + i as f64 * prob[i];
    }

    let mut threshold = 0;
    let mut max_sigma = 0.0f64;
    for t in 0..255 {
        let sigma = if omega[t] != 0.0 && omega[t] != 1.0 {
            let d = myu[255] * omega[t] - myu[t];
            d * d / (omega[t] * (1.0 - omega[t]))
        } else {
            0.0
        };
        if sigma > max_sigma {
            max_sigma = sigma;
            threshold = t;
        }
    }
    threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn solid_frame(width: usize, height: usize, rgb: [u8; 3]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(width * height * 4);
        for _ in 0..width * height {
            buf.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        buf
    }

    #[test]
    fn gradient_in_unit_range_on_random_buffers() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let width = rng.random_range(9..64);
            let height = rng.random_range(9..64);
            let buf: Vec<u8> = (0..width * height * 4).map(|_| rng.random()).collect();
            let t = gradient(&buf, width, height);
            assert!((0.0..=1.0).contains(&t), "gradient {} out of range", t);
        }
    }

    #[test]
    fn gradient_near_zero_on_solid_color() {
        // A flat image has no edge energy at all, so the +1 denominator guard
        // must pin the estimate at 0. A mid-gray result here would mean the
        // vertical-edge term is leaking raw brightness into the edge sum.
        for rgb in [[0, 0, 0], [128, 128, 128], [255, 255, 255], [40, 200, 90]] {
            let buf = solid_frame(32, 32, rgb);
            let t = gradient(&buf, 32, 32);
            assert!(t.abs() < 1e-6, "solid {:?} gave {}", rgb, t);
        }
    }

    #[test]
    fn gradient_sees_vertical_contrast() {
        // Horizontal bands: every row is uniform, so left == right and all
        // edge energy comes from the top/bottom neighbours. The estimate must
        // land near the band brightness, which requires the bottom neighbour
        // to be accumulated independently of the top one.
        let width = 32;
        let height = 32;
        let mut buf = vec![0u8; width * height * 4];
        for y in 0..height {
            let v = ((y * 8) % 256) as u8;
            for x in 0..width {
                let p = (y * width + x) * 4;
                buf[p] = v;
                buf[p + 1] = v;
                buf[p + 2] = v;
                buf[p + 3] = 255;
            }
        }
        let t = gradient(&buf, width, height);
        assert!(t > 0.05, "vertical-only contrast ignored, got {}", t);
        assert!(t <= 1.0);
    }

    #[test]
    fn gradient_degenerate_input_returns_zero() {
        assert_eq!(gradient(&[], 0, 0), 0.0);
        // 8x8 leaves no interior once the 4-pixel border is skipped.
        let buf = solid_frame(8, 8, [200, 200, 200]);
        assert_eq!(gradient(&buf, 8, 8), 0.0);
        // Truncated buffer must not be sampled at all.
        let short = vec![255u8; 16 * 16];
        assert_eq!(gradient(&short, 16, 16), 0.0);
    }

    #[test]
    fn histogram_uses_truncated_mean_intensity() {
        // One pixel with (10, 20, 31): mean 61/3 = 20 truncated.
        let buf = vec![10, 20, 31, 255];
        let hist = histogram(&buf, 1, 1);
        assert_eq!(hist[20], 1);
        assert_eq!(hist.iter().sum::<u32>(), 1);
    }

    #[test]
    fn histogram_counts_every_pixel() {
        let buf = solid_frame(16, 16, [60, 60, 60]);
        let hist = histogram(&buf, 16, 16);
        assert_eq!(hist[60], 256);
    }

    #[test]
    fn entropy_split_stays_in_byte_range() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let mut hist = [0u32; 256];
            for bin in hist.iter_mut() {
                *bin = rng.random_range(0..1000);
            }
            let t = entropy_split(&hist);
            assert!(t < 256);
            let norm = t as f32 / 256.0;
            assert!((0.0..1.0).contains(&norm));
        }
    }

    #[test]
    fn entropy_split_all_black_returns_zero() {
        let mut hist = [0u32; 256];
        hist[0] = 10_000;
        assert_eq!(entropy_split(&hist), 0);
    }

    #[test]
    fn entropy_split_empty_histogram_returns_zero() {
        assert_eq!(entropy_split(&[0u32; 256]), 0);
    }

    #[test]
    fn entropy_split_separates_bimodal_histogram() {
        let mut hist = [0u32; 256];
        hist[50] = 500;
        hist[200] = 500;
        let t = entropy_split(&hist);
        assert!((50..200).contains(&t), "split {} not between the modes", t);
    }

    #[test]
    fn otsu_stays_in_byte_range() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let mut hist = [0u32; 256];
            let mut total = 0u32;
            for bin in hist.iter_mut() {
                *bin = rng.random_range(0..100);
                total += *bin;
            }
            // Feed a plausible pixel count for the probabilities.
            let side = (total as f64).sqrt().ceil() as usize + 1;
            let t = otsu(&hist, side, side);
            assert!(t < 256);
        }
    }

    #[test]
    fn otsu_all_black_returns_zero() {
        let mut hist = [0u32; 256];
        hist[0] = 64 * 64;
        assert_eq!(otsu(&hist, 64, 64), 0);
    }

    #[test]
    fn otsu_zero_area_returns_zero() {
        let hist = [1u32; 256];
        assert_eq!(otsu(&hist, 0, 0), 0);
    }

    #[test]
    fn otsu_separates_bimodal_histogram() {
        let mut hist = [0u32; 256];
        hist[40] = 2048;
        hist[220] = 2048;
        let t = otsu(&hist, 64, 64);
        assert!((40..220).contains(&t), "otsu split {} not between modes", t);
    }

    #[test]
    fn estimate_dispatches_all_methods_in_range() {
        let mut buf = solid_frame(32, 32, [30, 30, 30]);
        // Paint a bright block so the histogram is bimodal.
        for y in 0..16 {
            for x in 0..16 {
                let p = (y * 32 + x) * 4;
                buf[p] = 220;
                buf[p + 1] = 220;
                buf[p + 2] = 220;
            }
        }
        for method in [
            EstimatorMethod::Gradient,
            EstimatorMethod::Entropy,
            EstimatorMethod::Otsu,
        ] {
            let t = estimate(method, &buf, 32, 32);
            assert!((0.0..=1.0).contains(&t), "{} gave {}", method.name(), t);
        }
    }
}
