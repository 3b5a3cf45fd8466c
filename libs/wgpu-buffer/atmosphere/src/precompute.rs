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
use crate::{
    context::PrecomputeContext,
    model::{AtmosphereModel, TextureSettings},
    resource::{TextureData, TextureReadback, TextureResource},
};
use anyhow::Result;
use gpu::Gpu;
use log::{error, trace};
use static_assertions::assert_eq_size;
use std::{collections::HashMap, mem, num::NonZeroU64, sync::Arc};
use task_queue::TaskQueueHandle;
use zerocopy::{AsBytes, FromBytes};

// Note: must match the workgroup sizes declared in the compute shaders.
pub const TRANSMITTANCE_BLOCK_SIZE: u32 = 8;
pub const SCATTERING_BLOCK_SIZE: u32 = 4;

/// Debug capture of the transmittance table as pass 1 left it.
pub const DEBUG_TRANSMITTANCE: &str = "pass1-transmittance";
/// Debug capture of the in-scattered light volume as pass 2 left it.
pub const DEBUG_IN_SCATTERED_LIGHT: &str = "pass2-in-scattered-light";

const TRANSMITTANCE_SHADER: &str = include_str!("../shaders/precompute_transmittance.wgsl");
const IN_SCATTERED_LIGHT_SHADER: &str =
    include_str!("../shaders/precompute_in_scattered_light.wgsl");

#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug)]
struct PassParams {
    width: u32,
    height: u32,
    depth: u32,
    num_steps: u32,
}
assert_eq_size!(PassParams, [u32; 4]);

/// Everything one completed dispatch hands to its continuation.
pub struct PrecomputeResults {
    pub transmittance: TextureData,
    pub in_scattered_light: TextureData,
    /// Empty unless debug capture was requested; keyed by the stable
    /// capture labels.
    pub debug: HashMap<String, TextureData>,
}

/// One dispatch's pipelines, parameter buffers, and output resources.
/// Built on the rendering queue, recorded once, then consumed by `submit`.
pub struct Precompute {
    transmittance_bind_group_layout: wgpu::BindGroupLayout,
    transmittance_pipeline: wgpu::ComputePipeline,
    in_scattered_light_bind_group_layout: wgpu::BindGroupLayout,
    in_scattered_light_pipeline: wgpu::ComputePipeline,

    context_buffer: wgpu::Buffer,
    transmittance_params_buffer: wgpu::Buffer,
    in_scattered_light_params_buffer: wgpu::Buffer,

    transmittance: TextureResource,
    in_scattered_light: TextureResource,
    lut_sampler: wgpu::Sampler,

    settings: TextureSettings,
    capture_debug: bool,
}

impl Precompute {
    pub fn new(
        gpu: &Gpu,
        settings: &TextureSettings,
        ctx: &PrecomputeContext,
        capture_debug: bool,
    ) -> Result<Self> {
        let device = gpu.device();

        fn uniform(binding: u32, min_binding_size: usize) -> wgpu::BindGroupLayoutEntry {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(min_binding_size as u64),
                },
                count: None,
            }
        }
        fn storage_texture(
            binding: u32,
            view_dimension: wgpu::TextureViewDimension,
        ) -> wgpu::BindGroupLayoutEntry {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: TextureResource::FORMAT,
                    view_dimension,
                },
                count: None,
            }
        }
        fn texture2d(binding: u32) -> wgpu::BindGroupLayoutEntry {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    // Rgba32Float is not filterable without an extra device
                    // feature; the table is read with a nearest sampler.
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            }
        }
        fn sampler(binding: u32) -> wgpu::BindGroupLayoutEntry {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            }
        }

        // Pass 1: transmittance
        let transmittance_shader =
            gpu.create_shader_module("precompute_transmittance.wgsl", TRANSMITTANCE_SHADER)?;
        let transmittance_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("atmosphere-precompute-transmittance-bind-group-layout"),
                entries: &[
                    uniform(0, mem::size_of::<PrecomputeContext>()), // ctx
                    uniform(1, mem::size_of::<PassParams>()),        // params
                    storage_texture(2, wgpu::TextureViewDimension::D2), // out transmittance
                ],
            });
        let transmittance_pipeline =
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("atmosphere-precompute-transmittance-pipeline"),
                layout: Some(
                    &device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("atmosphere-precompute-transmittance-pipeline-layout"),
                        push_constant_ranges: &[],
                        bind_group_layouts: &[&transmittance_bind_group_layout],
                    }),
                ),
                module: &transmittance_shader,
                entry_point: "main",
            });

        // Pass 2: in-scattered light
        let in_scattered_light_shader = gpu.create_shader_module(
            "precompute_in_scattered_light.wgsl",
            IN_SCATTERED_LIGHT_SHADER,
        )?;
        let in_scattered_light_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("atmosphere-precompute-in-scattered-light-bind-group-layout"),
                entries: &[
                    uniform(0, mem::size_of::<PrecomputeContext>()), // ctx
                    uniform(1, mem::size_of::<PassParams>()),        // params
                    texture2d(2),                                    // transmittance_lut
                    sampler(3),                                      // transmittance_sampler
                    storage_texture(4, wgpu::TextureViewDimension::D3), // out in-scattered light
                ],
            });
        let in_scattered_light_pipeline =
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("atmosphere-precompute-in-scattered-light-pipeline"),
                layout: Some(
                    &device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("atmosphere-precompute-in-scattered-light-pipeline-layout"),
                        push_constant_ranges: &[],
                        bind_group_layouts: &[&in_scattered_light_bind_group_layout],
                    }),
                ),
                module: &in_scattered_light_shader,
                entry_point: "main",
            });

        let context_buffer =
            gpu.push_data("atmosphere-precompute-context-buffer", ctx, wgpu::BufferUsages::UNIFORM);
        let transmittance_params_buffer = gpu.push_data(
            "atmosphere-transmittance-params-buffer",
            &PassParams {
                width: settings.transmittance_width,
                height: settings.transmittance_height,
                depth: 1,
                num_steps: settings.transmittance_sample_steps,
            },
            wgpu::BufferUsages::UNIFORM,
        );
        let in_scattered_light_params_buffer = gpu.push_data(
            "atmosphere-in-scattered-light-params-buffer",
            &PassParams {
                width: settings.in_scattered_light_size,
                height: settings.in_scattered_light_size,
                depth: settings.in_scattered_light_size,
                num_steps: settings.in_scattered_light_sample_steps,
            },
            wgpu::BufferUsages::UNIFORM,
        );

        let transmittance = TextureResource::new_2d(
            gpu,
            "atmosphere-transmittance-texture",
            settings.transmittance_width,
            settings.transmittance_height,
        );
        let in_scattered_light = TextureResource::new_3d(
            gpu,
            "atmosphere-in-scattered-light-texture",
            settings.in_scattered_light_size,
        );

        let lut_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("atmosphere-transmittance-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            transmittance_bind_group_layout,
            transmittance_pipeline,
            in_scattered_light_bind_group_layout,
            in_scattered_light_pipeline,
            context_buffer,
            transmittance_params_buffer,
            in_scattered_light_params_buffer,
            transmittance,
            in_scattered_light,
            lut_sampler,
            settings: *settings,
            capture_debug,
        })
    }

    fn record_transmittance_pass(&self, gpu: &Gpu, encoder: &mut wgpu::CommandEncoder) {
        let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("atmosphere-precompute-transmittance-bind-group"),
            layout: &self.transmittance_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.context_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.transmittance_params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.transmittance.view),
                },
            ],
        });
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("precompute-transmittance"),
        });
        cpass.set_pipeline(&self.transmittance_pipeline);
        cpass.set_bind_group(0, &bind_group, &[]);
        cpass.dispatch_workgroups(
            workgroup_count(self.settings.transmittance_width, TRANSMITTANCE_BLOCK_SIZE),
            workgroup_count(self.settings.transmittance_height, TRANSMITTANCE_BLOCK_SIZE),
            1,
        );
    }

    /// Pass 2 reads whatever transmittance table it is given; the dispatch
    /// path feeds it pass 1's output, tests may substitute their own.
    fn record_in_scattered_light_pass(
        &self,
        gpu: &Gpu,
        encoder: &mut wgpu::CommandEncoder,
        transmittance_view: &wgpu::TextureView,
    ) {
        let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("atmosphere-precompute-in-scattered-light-bind-group"),
            layout: &self.in_scattered_light_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.context_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.in_scattered_light_params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(transmittance_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.lut_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&self.in_scattered_light.view),
                },
            ],
        });
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("precompute-in-scattered-light"),
        });
        cpass.set_pipeline(&self.in_scattered_light_pipeline);
        cpass.set_bind_group(0, &bind_group, &[]);
        let groups = workgroup_count(self.settings.in_scattered_light_size, SCATTERING_BLOCK_SIZE);
        cpass.dispatch_workgroups(groups, groups, groups);
    }

    /// Record both passes and every readback copy on one command graph,
    /// submit it, and start the asynchronous maps.
    fn submit(self, gpu: &Gpu) -> PendingReadbacks {
        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("atmosphere-precompute-command-encoder"),
            });
        let mut debug = Vec::new();

        self.record_transmittance_pass(gpu, &mut encoder);
        if self.capture_debug {
            debug.push(TextureReadback::enqueue_copy(
                gpu,
                &mut encoder,
                &self.transmittance,
                DEBUG_TRANSMITTANCE,
            ));
        }

        self.record_in_scattered_light_pass(gpu, &mut encoder, &self.transmittance.view);
        if self.capture_debug {
            debug.push(TextureReadback::enqueue_copy(
                gpu,
                &mut encoder,
                &self.in_scattered_light,
                DEBUG_IN_SCATTERED_LIGHT,
            ));
        }

        let transmittance = TextureReadback::enqueue_copy(
            gpu,
            &mut encoder,
            &self.transmittance,
            "transmittance",
        );
        let in_scattered_light = TextureReadback::enqueue_copy(
            gpu,
            &mut encoder,
            &self.in_scattered_light,
            "in-scattered-light",
        );
        gpu.queue().submit(vec![encoder.finish()]);

        let pending = PendingReadbacks {
            transmittance,
            in_scattered_light,
            debug,
        };
        pending.transmittance.begin_map();
        pending.in_scattered_light.begin_map();
        for readback in &pending.debug {
            readback.begin_map();
        }
        pending
    }
}

fn workgroup_count(extent: u32, block_size: u32) -> u32 {
    (extent + block_size - 1) / block_size
}

/// The full required set of copies for one dispatch. Completion is
/// all-or-nothing across every member.
struct PendingReadbacks {
    transmittance: TextureReadback,
    in_scattered_light: TextureReadback,
    debug: Vec<TextureReadback>,
}

impl PendingReadbacks {
    fn all_ready(&self) -> bool {
        self.transmittance.is_ready()
            && self.in_scattered_light.is_ready()
            && self.debug.iter().all(TextureReadback::is_ready)
    }

    fn into_results(self) -> PrecomputeResults {
        PrecomputeResults {
            transmittance: self.transmittance.into_texture_data(),
            in_scattered_light: self.in_scattered_light.into_texture_data(),
            debug: self
                .debug
                .into_iter()
                .map(|readback| (readback.label().to_owned(), readback.into_texture_data()))
                .collect(),
        }
    }
}

type CompletionFn = Box<dyn FnOnce(PrecomputeResults) + Send + 'static>;

/// Precompute the scattering tables for `model` and hand the decoded
/// results to `on_complete` on the `reply_to` queue.
///
/// Safe to call from any thread: the pipeline is always built and submitted
/// on the rendering queue, either inline (when the caller already is that
/// queue) or after a hop. The continuation fires exactly once on success
/// and never if resource construction fails.
pub fn precompute_atmospheric_scattering<F>(
    gpu: Arc<Gpu>,
    render: TaskQueueHandle,
    settings: TextureSettings,
    model: &AtmosphereModel,
    capture_debug: bool,
    reply_to: TaskQueueHandle,
    on_complete: F,
) where
    F: FnOnce(PrecomputeResults) + Send + 'static,
{
    let ctx = PrecomputeContext::new(model);
    let on_complete: CompletionFn = Box::new(on_complete);
    if render.is_current() {
        trace!("atmosphere precompute: requested on rendering queue, running");
        run_on_rendering_queue(gpu, render, settings, ctx, capture_debug, reply_to, on_complete);
    } else {
        trace!("atmosphere precompute: requested, queueing for rendering queue");
        let render_inner = render.clone();
        render.submit(move || {
            run_on_rendering_queue(
                gpu,
                render_inner,
                settings,
                ctx,
                capture_debug,
                reply_to,
                on_complete,
            );
        });
    }
}

fn run_on_rendering_queue(
    gpu: Arc<Gpu>,
    render: TaskQueueHandle,
    settings: TextureSettings,
    ctx: PrecomputeContext,
    capture_debug: bool,
    reply_to: TaskQueueHandle,
    on_complete: CompletionFn,
) {
    debug_assert!(render.is_current());
    trace!("atmosphere precompute: running");
    let precompute = match Precompute::new(&gpu, &settings, &ctx, capture_debug) {
        Ok(precompute) => precompute,
        Err(e) => {
            // Configuration/environment problem: no retry, no callback.
            error!("atmosphere precompute aborted: {:#}", e);
            return;
        }
    };
    trace!("atmosphere precompute: pipeline built");
    let pending = precompute.submit(&gpu);
    trace!("atmosphere precompute: readbacks pending");
    let poll = PollReadbacks {
        gpu,
        render: render.clone(),
        pending,
        reply_to,
        on_complete,
    };
    render.submit(move || poll.poll());
}

/// Cooperative completion polling: each run pumps the device once, then
/// either finishes the dispatch or re-enqueues itself on the rendering
/// queue. The queue thread is never blocked waiting on the GPU.
struct PollReadbacks {
    gpu: Arc<Gpu>,
    render: TaskQueueHandle,
    pending: PendingReadbacks,
    reply_to: TaskQueueHandle,
    on_complete: CompletionFn,
}

impl PollReadbacks {
    fn poll(self) {
        self.gpu.device().poll(wgpu::Maintain::Poll);
        if !self.pending.all_ready() {
            let render = self.render.clone();
            render.submit(move || self.poll());
            return;
        }
        trace!("atmosphere precompute: all readbacks ready");
        let results = self.pending.into_results();
        let on_complete = self.on_complete;
        self.reply_to.submit(move || on_complete(results));
        trace!("atmosphere precompute: completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParticleProfile, PhaseFunction};
    use approx::assert_relative_eq;
    use crossbeam::channel;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };
    use task_queue::TaskQueue;

    fn small_settings() -> TextureSettings {
        TextureSettings {
            transmittance_width: 64,
            transmittance_height: 32,
            in_scattered_light_size: 8,
            transmittance_sample_steps: 64,
            in_scattered_light_sample_steps: 16,
        }
    }

    fn uniform_density_model() -> AtmosphereModel {
        AtmosphereModel {
            atmosphere_scale: 0.2,
            sun_intensity: 1.0,
            hue_shift: 0.0,
            particle_profiles: vec![ParticleProfile {
                phase_function: PhaseFunction::None,
                scattering_coefficients: [5.0, 5.0, 5.0],
                exponent_factor: 0.0,
                linear_fade_in_size: 0.0,
                linear_fade_out_size: 0.0,
            }],
        }
    }

    fn dispatch_and_wait(
        gpu: &Arc<Gpu>,
        settings: TextureSettings,
        model: &AtmosphereModel,
        capture_debug: bool,
    ) -> PrecomputeResults {
        let (render, render_join) = TaskQueue::spawn("render").unwrap();
        let reply = TaskQueue::new("logic");
        let (tx, rx) = channel::bounded(1);
        precompute_atmospheric_scattering(
            gpu.clone(),
            render.clone(),
            settings,
            model,
            capture_debug,
            reply.handle(),
            move |results| {
                tx.send(results).unwrap();
            },
        );
        let deadline = Instant::now() + Duration::from_secs(120);
        let results = loop {
            reply.pump_one(Duration::from_millis(5));
            if let Ok(results) = rx.try_recv() {
                break results;
            }
            assert!(Instant::now() < deadline, "precompute never completed");
        };
        render.shutdown();
        render_join.join().unwrap();
        results
    }

    #[test]
    fn workgroup_counts_cover_the_grid() {
        assert_eq!(workgroup_count(64, TRANSMITTANCE_BLOCK_SIZE), 8);
        assert_eq!(workgroup_count(65, TRANSMITTANCE_BLOCK_SIZE), 9);
        assert_eq!(workgroup_count(1, TRANSMITTANCE_BLOCK_SIZE), 1);
        assert_eq!(workgroup_count(8, SCATTERING_BLOCK_SIZE), 2);
    }

    #[test]
    fn dispatch_produces_expected_sizes_and_fires_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let gpu = match Gpu::for_test() {
            Some(gpu) => gpu,
            None => return,
        };
        let settings = small_settings();
        let model = AtmosphereModel::default();

        let (render, render_join) = TaskQueue::spawn("render").unwrap();
        let reply = TaskQueue::new("logic");
        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel::bounded(1);
        let observed = fired.clone();
        precompute_atmospheric_scattering(
            gpu.clone(),
            render.clone(),
            settings,
            &model,
            false,
            reply.handle(),
            move |results| {
                observed.fetch_add(1, Ordering::SeqCst);
                tx.send(results).unwrap();
            },
        );
        let deadline = Instant::now() + Duration::from_secs(120);
        let results = loop {
            reply.pump_one(Duration::from_millis(5));
            if let Ok(results) = rx.try_recv() {
                break results;
            }
            assert!(Instant::now() < deadline, "precompute never completed");
        };
        // Settle, then confirm nothing fires a second time.
        for _ in 0..10 {
            reply.pump_one(Duration::from_millis(5));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert_eq!(results.transmittance.size, (64, 32, 0));
        assert!(!results.transmittance.is_volume());
        assert_eq!(results.in_scattered_light.size, (8, 8, 8));
        assert!(results.in_scattered_light.is_volume());
        assert!(results.debug.is_empty());
        assert_eq!(results.transmittance.data.len(), 64 * 32 * 16);
        assert_eq!(results.in_scattered_light.data.len(), 8 * 8 * 8 * 16);

        // Alpha is constant 1 in both tables.
        for texels in [
            results.transmittance.texels_f32(),
            results.in_scattered_light.texels_f32(),
        ] {
            for texel in texels.chunks_exact(4) {
                assert_eq!(texel[3], 1.0);
            }
        }

        render.shutdown();
        render_join.join().unwrap();
    }

    #[test]
    fn debug_captures_match_main_outputs() {
        let gpu = match Gpu::for_test() {
            Some(gpu) => gpu,
            None => return,
        };
        let results = dispatch_and_wait(&gpu, small_settings(), &AtmosphereModel::default(), true);
        assert_eq!(results.debug.len(), 2);
        let transmittance_capture = &results.debug[DEBUG_TRANSMITTANCE];
        let in_scattered_capture = &results.debug[DEBUG_IN_SCATTERED_LIGHT];
        // Pass 2 only reads the transmittance table, so the mid-graph
        // capture must equal the final output byte for byte.
        assert_eq!(transmittance_capture.data, results.transmittance.data);
        assert_eq!(transmittance_capture.size, results.transmittance.size);
        assert_eq!(in_scattered_capture.data, results.in_scattered_light.data);
        assert_eq!(in_scattered_capture.size, results.in_scattered_light.size);
    }

    #[test]
    fn dispatch_is_deterministic() {
        let gpu = match Gpu::for_test() {
            Some(gpu) => gpu,
            None => return,
        };
        let model = AtmosphereModel::default();
        let first = dispatch_and_wait(&gpu, small_settings(), &model, false);
        let second = dispatch_and_wait(&gpu, small_settings(), &model, false);
        assert_eq!(first.transmittance.data, second.transmittance.data);
        assert_eq!(first.in_scattered_light.data, second.in_scattered_light.data);
    }

    #[test]
    fn transmittance_decreases_with_sun_zenith_angle() {
        let gpu = match Gpu::for_test() {
            Some(gpu) => gpu,
            None => return,
        };
        let settings = small_settings();
        let results = dispatch_and_wait(&gpu, settings, &uniform_density_model(), false);
        let texels = results.transmittance.texels_f32();
        let width = settings.transmittance_width as usize;
        let height = settings.transmittance_height as usize;

        // Uniform density: the path through the shell lengthens
        // monotonically as the ray tips from zenith toward nadir.
        for x in [0, width / 2] {
            for y in 1..height {
                let above = texels[((y - 1) * width + x) * 4];
                let below = texels[(y * width + x) * 4];
                assert!(
                    below < above,
                    "transmittance not strictly decreasing at x={} y={}: {} >= {}",
                    x,
                    y,
                    below,
                    above
                );
            }
        }

        // From the top of the atmosphere looking straight up the remaining
        // path is a fraction of a texel.
        let top_up = texels[(width - 1) * 4];
        assert_relative_eq!(top_up, 1.0, epsilon = 0.02);
    }

    #[test]
    fn in_scatter_pass_depends_on_transmittance_table() {
        let gpu = match Gpu::for_test() {
            Some(gpu) => gpu,
            None => return,
        };
        let settings = small_settings();
        let ctx = PrecomputeContext::new(&AtmosphereModel::default());

        let run_pass2 = |with_real_transmittance: bool| -> TextureData {
            let precompute = Precompute::new(&gpu, &settings, &ctx, false).unwrap();
            let mut encoder =
                gpu.device()
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("pass2-isolation-command-encoder"),
                    });
            let mock = TextureResource::new_2d(
                &gpu,
                "mock-transmittance-texture",
                settings.transmittance_width,
                settings.transmittance_height,
            );
            if with_real_transmittance {
                precompute.record_transmittance_pass(&gpu, &mut encoder);
                precompute.record_in_scattered_light_pass(
                    &gpu,
                    &mut encoder,
                    &precompute.transmittance.view,
                );
            } else {
                // Fresh textures are zero-initialized: an all-dark table.
                precompute.record_in_scattered_light_pass(&gpu, &mut encoder, &mock.view);
            }
            let readback = TextureReadback::enqueue_copy(
                &gpu,
                &mut encoder,
                &precompute.in_scattered_light,
                "pass2-isolation",
            );
            gpu.queue().submit(vec![encoder.finish()]);
            readback.begin_map();
            let deadline = Instant::now() + Duration::from_secs(120);
            while !readback.is_ready() {
                gpu.device().poll(wgpu::Maintain::Wait);
                assert!(Instant::now() < deadline, "readback never became ready");
            }
            readback.into_texture_data()
        };

        let lit = run_pass2(true);
        let dark = run_pass2(false);
        assert_ne!(lit.data, dark.data);
        assert!(lit
            .texels_f32()
            .chunks_exact(4)
            .any(|texel| texel[..3].iter().any(|&v| v > 0.0)));
        // With zero transmittance no sunlight survives to scatter.
        for texel in dark.texels_f32().chunks_exact(4) {
            assert_eq!(&texel[..3], &[0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn dispatch_from_rendering_queue_runs_inline() {
        let gpu = match Gpu::for_test() {
            Some(gpu) => gpu,
            None => return,
        };
        let (render, render_join) = TaskQueue::spawn("render").unwrap();
        let reply = TaskQueue::new("logic");
        let (tx, rx) = channel::bounded(1);

        let dispatch_gpu = gpu.clone();
        let dispatch_render = render.clone();
        let reply_handle = reply.handle();
        render.submit(move || {
            assert!(dispatch_render.is_current());
            precompute_atmospheric_scattering(
                dispatch_gpu,
                dispatch_render.clone(),
                small_settings(),
                &AtmosphereModel::default(),
                false,
                reply_handle,
                move |results| {
                    tx.send(results).unwrap();
                },
            );
        });

        let deadline = Instant::now() + Duration::from_secs(120);
        let results = loop {
            reply.pump_one(Duration::from_millis(5));
            if let Ok(results) = rx.try_recv() {
                break results;
            }
            assert!(Instant::now() < deadline, "precompute never completed");
        };
        assert_eq!(results.transmittance.size, (64, 32, 0));
        render.shutdown();
        render_join.join().unwrap();
    }
}
