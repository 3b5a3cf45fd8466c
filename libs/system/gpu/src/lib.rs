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

// Note: re-export for use by dependent crates.
pub use wgpu;

use anyhow::{anyhow, bail, Result};
use futures::executor::block_on;
use log::{info, trace};
use std::{borrow::Cow, mem, sync::Arc};
use zerocopy::AsBytes;

/// A headless device/queue pair. All GPU work in the process goes through
/// one of these; wgpu serializes access internally, so it is shared as a
/// plain `Arc`.
pub struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl Gpu {
    pub fn new() -> Result<Arc<Self>> {
        block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Arc<Self>> {
        let instance = wgpu::Instance::new(wgpu::Backends::PRIMARY);
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable graphics adapter"))?;
        info!("using adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("aerosol-device"),
                    features: wgpu::Features::empty(),
                    // Compute-capable floor; the tables are far smaller than
                    // even downlevel texture limits.
                    limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await?;

        Ok(Arc::new(Self { device, queue }))
    }

    /// Like `new`, but for tests: returns None (and logs why) when the host
    /// has no usable adapter so that GPU tests can skip instead of fail.
    pub fn for_test() -> Option<Arc<Self>> {
        match Self::new() {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                info!("skipping GPU test: {}", e);
                None
            }
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Compile a WGSL module, surfacing validation failures as errors
    /// instead of through the device's uncaptured-error handler.
    pub fn create_shader_module(&self, name: &str, source: &str) -> Result<wgpu::ShaderModule> {
        trace!("compiling shader module {}", name);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            });
        if let Some(error) = block_on(self.device.pop_error_scope()) {
            bail!("shader module {} failed validation: {}", name, error);
        }
        Ok(module)
    }

    pub fn push_data<T: AsBytes>(
        &self,
        label: &'static str,
        data: &T,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        use wgpu::util::DeviceExt;
        let size = mem::size_of::<T>() as wgpu::BufferAddress;
        trace!("uploading {} with {} bytes", label, size);
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data.as_bytes(),
                usage,
            })
    }

    /// Round a row size up to the copy alignment wgpu demands of
    /// texture-to-buffer transfers.
    pub fn stride_for_row_size(size: u32) -> u32 {
        (size + wgpu::COPY_BYTES_PER_ROW_ALIGNMENT - 1) / wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
    }
}

pub fn texture_format_size(texture_format: wgpu::TextureFormat) -> u32 {
    let info = texture_format.describe();
    info.block_size as u32
}
