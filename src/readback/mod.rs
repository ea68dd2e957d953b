//! GPU-to-CPU pixel readback
//!
//! Copies the current frame's input texture into a CPU-addressable RGBA8
//! buffer so the threshold estimator can see actual pixel data. The copy is
//! split in two so the frame that was just rendered is never stalled:
//!
//! - [`PixelReadback::capture`] encodes a texture-to-buffer copy, submits it,
//!   and requests an asynchronous map. It returns immediately.
//! - [`PixelReadback::resolve`] hands back the captured frame, blocking on
//!   `device.poll` only if the transfer has not finished yet. A resolved
//!   frame is always complete; a failed map is a reported error, never a
//!   torn read.
//!
//! Two staging buffers alternate between frames so a capture can be in
//! flight while the previous one is being consumed.

use crossbeam_channel::{bounded, Receiver};

/// wgpu requires texture-to-buffer copies to have `bytes_per_row` padded to
/// a multiple of this value; the padding is stripped again on resolve.
const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Copy the active pixels out of a padded readback buffer into a packed
/// `width * height * 4` byte vector.
fn strip_row_padding(padded: &[u8], width: u32, height: u32, padded_bytes_per_row: u32) -> Vec<u8> {
    let row_bytes = (width * 4) as usize;
    let mut out = vec![0u8; row_bytes * height as usize];
    for y in 0..height as usize {
        let src_start = y * padded_bytes_per_row as usize;
        let dst_start = y * row_bytes;
        out[dst_start..dst_start + row_bytes]
            .copy_from_slice(&padded[src_start..src_start + row_bytes]);
    }
    out
}

/// A full frame of packed RGBA8 pixels owned by the caller.
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

struct PendingCapture {
    buffer_index: usize,
    map_done: Receiver<Result<(), wgpu::BufferAsyncError>>,
    width: u32,
    height: u32,
}

/// Double-buffered texture readback for one input stream.
pub struct PixelReadback {
    buffers: [wgpu::Buffer; 2],
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    next: usize,
    pending: Option<PendingCapture>,
}

impl PixelReadback {
    /// Create readback buffers for frames of the given size.
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let padded_bytes_per_row = align_to(width * 4, COPY_ALIGNMENT);
        let buffers = [
            Self::make_buffer(device, padded_bytes_per_row, height, 0),
            Self::make_buffer(device, padded_bytes_per_row, height, 1),
        ];
        Self {
            buffers,
            width,
            height,
            padded_bytes_per_row,
            next: 0,
            pending: None,
        }
    }

    fn make_buffer(
        device: &wgpu::Device,
        padded_bytes_per_row: u32,
        height: u32,
        index: usize,
    ) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(if index == 0 {
                "Readback Buffer 0"
            } else {
                "Readback Buffer 1"
            }),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// True if a capture is awaiting [`resolve`](Self::resolve).
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Start copying `texture` (which must carry `COPY_SRC` usage) into a
    /// staging buffer. Returns without waiting for the GPU.
    ///
    /// Buffers are reallocated if the texture size changed since the last
    /// capture. A still-unresolved previous capture is discarded first.
    pub fn capture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
    ) -> Result<(), String> {
        let size = texture.size();
        if size.width == 0 || size.height == 0 {
            return Err("cannot capture a zero-size texture".to_string());
        }

        if self.pending.is_some() {
            // Unconsumed capture, e.g. adaptive mode was toggled off for a
            // frame. Drain it so its buffer can be reused safely.
            log::debug!("discarding unresolved readback capture");
            let _ = self.resolve(device);
        }

        if size.width != self.width || size.height != self.height {
            log::info!(
                "resizing readback buffers: {}x{} -> {}x{}",
                self.width,
                self.height,
                size.width,
                size.height
            );
            self.width = size.width;
            self.height = size.height;
            self.padded_bytes_per_row = align_to(size.width * 4, COPY_ALIGNMENT);
            self.buffers = [
                Self::make_buffer(device, self.padded_bytes_per_row, size.height, 0),
                Self::make_buffer(device, self.padded_bytes_per_row, size.height, 1),
            ];
        }

        let buffer_index = self.next;
        self.next = (self.next + 1) % 2;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffers[buffer_index],
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = bounded(1);
        self.buffers[buffer_index]
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });

        self.pending = Some(PendingCapture {
            buffer_index,
            map_done: receiver,
            width: self.width,
            height: self.height,
        });
        Ok(())
    }

    /// Return the pixels of the last [`capture`](Self::capture).
    ///
    /// If the GPU has not finished the copy this blocks on `device.poll`
    /// rather than returning a partial frame; the stall is the accepted
    /// fallback when the asynchronous path has not completed in time.
    pub fn resolve(&mut self, device: &wgpu::Device) -> Result<CapturedFrame, String> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| "no readback capture pending".to_string())?;

        device.poll(wgpu::Maintain::Wait);

        match pending.map_done.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(format!("readback buffer map failed: {:?}", e)),
            Err(_) => return Err("readback map callback dropped".to_string()),
        }

        let buffer = &self.buffers[pending.buffer_index];
        let data = {
            let mapped = buffer.slice(..).get_mapped_range();
            strip_row_padding(
                &mapped,
                pending.width,
                pending.height,
                self.padded_bytes_per_row,
            )
        };
        buffer.unmap();

        Ok(CapturedFrame {
            data,
            width: pending.width,
            height: pending.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_matches_wgpu_requirements() {
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        // 640 wide RGBA rows: 2560 bytes, already aligned.
        assert_eq!(align_to(640 * 4, 256), 2560);
        // 100 wide RGBA rows: 400 bytes pad up to 512.
        assert_eq!(align_to(100 * 4, 256), 512);
        assert_eq!(align_to(0, 256), 0);
    }

    #[test]
    fn strip_row_padding_packs_rows() {
        // 2x2 RGBA frame padded to 16 bytes per row (alignment stand-in).
        let padded_bpr = 16u32;
        let mut padded = vec![0u8; (padded_bpr * 2) as usize];
        padded[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        padded[16..24].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let packed = strip_row_padding(&padded, 2, 2, padded_bpr);
        assert_eq!(packed, (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn strip_row_padding_no_padding_is_identity() {
        let data: Vec<u8> = (0..32).collect();
        // 2 wide, 4 tall, rows already packed at 8 bytes.
        assert_eq!(strip_row_padding(&data, 2, 4, 8), data);
    }

    // GPU round trip. Needs a real adapter, so it only runs when requested.
    #[test]
    #[ignore = "requires a GPU adapter"]
    fn capture_resolve_round_trip() {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .expect("no GPU adapter");
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor::default(),
            None,
        ))
        .expect("device");

        let width = 100u32; // deliberately not 256-aligned in bytes
        let height = 7u32;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Readback Test Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let pixels: Vec<u8> = (0..width * height * 4).map(|i| (i % 251) as u8).collect();
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let mut readback = PixelReadback::new(&device, width, height);
        readback.capture(&device, &queue, &texture).unwrap();
        let frame = readback.resolve(&device).unwrap();

        assert_eq!(frame.width, width);
        assert_eq!(frame.height, height);
        assert_eq!(frame.data, pixels, "readback differs from upload");

        // A second capture reuses the other staging buffer.
        readback.capture(&device, &queue, &texture).unwrap();
        let again = readback.resolve(&device).unwrap();
        assert_eq!(again.data, pixels);
    }
}
