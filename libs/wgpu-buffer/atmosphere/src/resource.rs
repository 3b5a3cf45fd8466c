// This file is part of Aerosol.
//
// Aerosol is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Aerosol is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Aerosol.  If not, see <http://www.gnu.org/licenses/>.
use gpu::{texture_format_size, Gpu};
use log::{error, trace};
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A decoded pass output: logical size, format, and tightly packed texels.
///
/// A depth of 0 denotes a 2D resource; a positive depth denotes a volume.
/// Only exists once the owning readback has completed, so a consumer can
/// never observe a half-populated table.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub size: (u32, u32, u32),
    pub format: wgpu::TextureFormat,
    pub data: Vec<u8>,
}

impl TextureData {
    pub fn is_volume(&self) -> bool {
        self.size.2 > 0
    }

    pub fn texel_count(&self) -> usize {
        let (width, height, depth) = self.size;
        (width * height * depth.max(1)) as usize
    }

    /// Reinterpret the raw bytes as f32 channel values.
    pub fn texels_f32(&self) -> Vec<f32> {
        debug_assert_eq!(self.format, wgpu::TextureFormat::Rgba32Float);
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// A writable pass target plus the sampled view of it, sized for either a
/// 2D table or a cubic volume.
pub(crate) struct TextureResource {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub extent: wgpu::Extent3d,
    /// Logical size as reported downstream; depth 0 flags a 2D resource.
    pub logical_size: (u32, u32, u32),
    pub format: wgpu::TextureFormat,
}

impl TextureResource {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

    pub fn new_2d(gpu: &Gpu, label: &'static str, width: u32, height: u32) -> Self {
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        Self::new(gpu, label, extent, wgpu::TextureDimension::D2, (width, height, 0))
    }

    pub fn new_3d(gpu: &Gpu, label: &'static str, edge: u32) -> Self {
        let extent = wgpu::Extent3d {
            width: edge,
            height: edge,
            depth_or_array_layers: edge,
        };
        Self::new(
            gpu,
            label,
            extent,
            wgpu::TextureDimension::D3,
            (edge, edge, edge),
        )
    }

    fn new(
        gpu: &Gpu,
        label: &'static str,
        extent: wgpu::Extent3d,
        dimension: wgpu::TextureDimension,
        logical_size: (u32, u32, u32),
    ) -> Self {
        trace!("allocating {} ({:?})", label, logical_size);
        let texture = gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            extent,
            logical_size,
            format: Self::FORMAT,
        }
    }
}

/// One pending GPU-to-host copy: the staging buffer, the strides needed to
/// undo copy-alignment padding, and a readiness flag flipped by the map
/// callback. Consumed exactly once via [TextureReadback::into_texture_data].
pub struct TextureReadback {
    label: String,
    logical_size: (u32, u32, u32),
    format: wgpu::TextureFormat,
    buffer: wgpu::Buffer,
    padded_bytes_per_row: u32,
    unpadded_bytes_per_row: u32,
    total_rows: u32,
    ready: Arc<AtomicBool>,
}

impl TextureReadback {
    /// Record a copy of `resource` into a fresh staging buffer on `encoder`.
    pub(crate) fn enqueue_copy(
        gpu: &Gpu,
        encoder: &mut wgpu::CommandEncoder,
        resource: &TextureResource,
        label: &str,
    ) -> Self {
        let unpadded_bytes_per_row = resource.extent.width * texture_format_size(resource.format);
        let padded_bytes_per_row = Gpu::stride_for_row_size(unpadded_bytes_per_row);
        let total_rows = resource.extent.height * resource.extent.depth_or_array_layers;
        let buffer = gpu.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: u64::from(padded_bytes_per_row) * u64::from(total_rows),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &resource.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: NonZeroU32::new(padded_bytes_per_row),
                    rows_per_image: NonZeroU32::new(resource.extent.height),
                },
            },
            resource.extent,
        );
        Self {
            label: label.to_owned(),
            logical_size: resource.logical_size,
            format: resource.format,
            buffer,
            padded_bytes_per_row,
            unpadded_bytes_per_row,
            total_rows,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the asynchronous map. Call after submitting the commands that
    /// fill the buffer; completion is observed through [Self::is_ready].
    pub(crate) fn begin_map(&self) {
        let ready = self.ready.clone();
        let label = self.label.clone();
        self.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| match result {
                Ok(()) => ready.store(true, Ordering::SeqCst),
                // The flag stays unset; device-loss recovery belongs to the
                // host application, not this loop.
                Err(e) => error!("readback {} failed to map: {:?}", label, e),
            });
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Decode the mapped staging memory into a [TextureData], stripping the
    /// copy-alignment padding, and release the GPU-side buffer.
    pub(crate) fn into_texture_data(self) -> TextureData {
        debug_assert!(self.is_ready());
        let data = {
            let mapping = self.buffer.slice(..).get_mapped_range();
            if self.padded_bytes_per_row == self.unpadded_bytes_per_row {
                mapping.to_vec()
            } else {
                let mut data = Vec::with_capacity(
                    self.unpadded_bytes_per_row as usize * self.total_rows as usize,
                );
                for row in mapping.chunks_exact(self.padded_bytes_per_row as usize) {
                    data.extend_from_slice(&row[..self.unpadded_bytes_per_row as usize]);
                }
                data
            }
        };
        self.buffer.unmap();
        trace!("decoded readback {} ({} bytes)", self.label, data.len());
        TextureData {
            size: self.logical_size,
            format: self.format,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_flagging_follows_depth() {
        let flat = TextureData {
            size: (8, 4, 0),
            format: wgpu::TextureFormat::Rgba32Float,
            data: vec![0; 8 * 4 * 16],
        };
        assert!(!flat.is_volume());
        assert_eq!(flat.texel_count(), 32);

        let volume = TextureData {
            size: (4, 4, 4),
            format: wgpu::TextureFormat::Rgba32Float,
            data: vec![0; 4 * 4 * 4 * 16],
        };
        assert!(volume.is_volume());
        assert_eq!(volume.texel_count(), 64);
    }

    #[test]
    fn texels_round_trip_through_bytes() {
        let texels = [0.0f32, 0.25, -1.5, 42.0];
        let mut data = Vec::new();
        for t in texels {
            data.extend_from_slice(&t.to_ne_bytes());
        }
        let decoded = TextureData {
            size: (1, 1, 0),
            format: wgpu::TextureFormat::Rgba32Float,
            data,
        }
        .texels_f32();
        assert_eq!(decoded, texels);
    }
}
