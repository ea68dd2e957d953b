//! Frame sources for the demo host
//!
//! The effect itself is source-agnostic; it consumes whatever RGBA8 frames
//! land in its input texture. This module provides the two sources the demo
//! ships with: a still image loaded from disk, and a deterministic animated
//! test pattern for running without any assets.

use std::path::Path;

/// One RGBA8 frame, packed rows, plus a monotonic frame number.
pub struct SourceFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
}

enum SourceKind {
    /// A decoded image, re-delivered every frame.
    Still,
    /// Procedural pattern regenerated per frame: a diagonal luminance ramp
    /// with a bright orbiting disc, so the adaptive estimate visibly moves.
    TestPattern,
}

/// Produces the demo's input frames.
pub struct FrameSource {
    kind: SourceKind,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
    frame_number: u64,
}

impl FrameSource {
    /// Load a still image. Any format the `image` crate decodes works; the
    /// pixels are converted to RGBA8 once at load time.
    pub fn from_image<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|e| format!("failed to load {}: {}", path.display(), e))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        log::info!("loaded {} ({}x{})", path.display(), width, height);
        Ok(Self {
            kind: SourceKind::Still,
            width,
            height,
            buffer: img.into_raw(),
            frame_number: 0,
        })
    }

    /// Animated procedural source at the given size.
    pub fn test_pattern(width: u32, height: u32) -> Self {
        Self {
            kind: SourceKind::TestPattern,
            width,
            height,
            buffer: vec![0u8; (width * height * 4) as usize],
            frame_number: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Produce the next frame. Still sources return the same pixels with an
    /// advancing frame number; the test pattern is a pure function of the
    /// frame number, so playback is reproducible.
    pub fn next_frame(&mut self) -> SourceFrame<'_> {
        let frame_number = self.frame_number;
        self.frame_number += 1;

        if let SourceKind::TestPattern = self.kind {
            self.fill_test_pattern(frame_number);
        }

        SourceFrame {
            data: &self.buffer,
            width: self.width,
            height: self.height,
            frame_number,
        }
    }

    fn fill_test_pattern(&mut self, frame_number: u64) {
        let w = self.width as f32;
        let h = self.height as f32;
        let t = frame_number as f32 / 60.0;

        // Disc orbits the center at one revolution per ~6 seconds.
        let angle = t * std::f32::consts::TAU / 6.0;
        let cx = w * 0.5 + angle.cos() * w * 0.3;
        let cy = h * 0.5 + angle.sin() * h * 0.3;
        let radius = w.min(h) * 0.12;

        for y in 0..self.height {
            for x in 0..self.width {
                let fx = x as f32;
                let fy = y as f32;

                // Diagonal ramp that slowly scrolls.
                let ramp = ((fx / w + fy / h) * 0.5 + t * 0.05).fract();
                let base = (ramp * 200.0) as u8;

                let dx = fx - cx;
                let dy = fy - cy;
                let in_disc = dx * dx + dy * dy < radius * radius;

                let i = ((y * self.width + x) * 4) as usize;
                if in_disc {
                    self.buffer[i] = 240;
                    self.buffer[i + 1] = 200;
                    self.buffer[i + 2] = 80;
                } else {
                    self.buffer[i] = base;
                    self.buffer[i + 1] = base;
                    self.buffer[i + 2] = (base as f32 * 1.2).min(255.0) as u8;
                }
                self.buffer[i + 3] = 255;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_has_expected_dimensions() {
        let mut source = FrameSource::test_pattern(64, 48);
        let frame = source.next_frame();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.data.len(), 64 * 48 * 4);
        assert_eq!(frame.frame_number, 0);
    }

    #[test]
    fn frame_numbers_advance() {
        let mut source = FrameSource::test_pattern(8, 8);
        assert_eq!(source.next_frame().frame_number, 0);
        assert_eq!(source.next_frame().frame_number, 1);
        assert_eq!(source.next_frame().frame_number, 2);
    }

    #[test]
    fn test_pattern_is_deterministic() {
        let mut a = FrameSource::test_pattern(32, 32);
        let mut b = FrameSource::test_pattern(32, 32);
        let fa: Vec<u8> = a.next_frame().data.to_vec();
        let fb: Vec<u8> = b.next_frame().data.to_vec();
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_pattern_animates() {
        let mut source = FrameSource::test_pattern(32, 32);
        let first: Vec<u8> = source.next_frame().data.to_vec();
        // Skip ahead far enough for the disc to move a full pixel.
        for _ in 0..29 {
            source.next_frame();
        }
        let later: Vec<u8> = source.next_frame().data.to_vec();
        assert_ne!(first, later);
    }

    #[test]
    fn test_pattern_is_opaque_with_contrast() {
        let mut source = FrameSource::test_pattern(64, 64);
        let frame = source.next_frame();
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        for px in frame.data.chunks_exact(4) {
            assert_eq!(px[3], 255);
            min = min.min(px[0]);
            max = max.max(px[0]);
        }
        // Ramp plus disc spans most of the range.
        assert!(max - min > 100, "pattern too flat: {}..{}", min, max);
    }
}
