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
use anyhow::{anyhow, Result};
use atmosphere::{
    precompute_atmospheric_scattering, AtmosphereModel, PrecomputeResults, TextureData,
    TextureSettings,
};
use gpu::Gpu;
use image::{ImageBuffer, Rgb};
use log::info;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use structopt::StructOpt;
use task_queue::TaskQueue;

/// Precompute the atmosphere scattering tables and dump them to disk.
#[derive(Debug, StructOpt)]
struct Opt {
    /// Directory to write the tables into
    #[structopt(short, long)]
    output: PathBuf,

    /// Width of the transmittance table
    #[structopt(long, default_value = "256")]
    transmittance_width: u32,

    /// Height of the transmittance table
    #[structopt(long, default_value = "64")]
    transmittance_height: u32,

    /// Edge length of the in-scattered light volume
    #[structopt(long, default_value = "32")]
    in_scattered_light_size: u32,

    /// Integration steps for the transmittance pass
    #[structopt(long, default_value = "40")]
    transmittance_sample_steps: u32,

    /// Integration steps for the in-scattered light pass
    #[structopt(long, default_value = "20")]
    in_scattered_light_sample_steps: u32,

    /// Also capture each pass output and write PNG previews of it
    #[structopt(long)]
    capture_debug: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let gpu = Gpu::new()?;
    let (render, render_join) = TaskQueue::spawn("render")?;
    let logic = TaskQueue::new("logic");

    let settings = TextureSettings {
        transmittance_width: opt.transmittance_width,
        transmittance_height: opt.transmittance_height,
        in_scattered_light_size: opt.in_scattered_light_size,
        transmittance_sample_steps: opt.transmittance_sample_steps,
        in_scattered_light_sample_steps: opt.in_scattered_light_sample_steps,
    };
    let model = AtmosphereModel::default();

    let precompute_start = Instant::now();
    let (tx, rx) = crossbeam::channel::bounded(1);
    precompute_atmospheric_scattering(
        gpu,
        render.clone(),
        settings,
        &model,
        opt.capture_debug,
        logic.handle(),
        move |results| {
            let _ = tx.send(results);
        },
    );
    let results: PrecomputeResults = loop {
        logic.pump_one(Duration::from_millis(5));
        if let Ok(results) = rx.try_recv() {
            break results;
        }
    };
    println!("Precompute time: {:?}", precompute_start.elapsed());

    fs::create_dir_all(&opt.output)?;
    write_table(&opt.output, "transmittance", &results.transmittance)?;
    write_table(&opt.output, "in_scattered_light", &results.in_scattered_light)?;
    for (name, data) in &results.debug {
        write_previews(&opt.output, name, data)?;
    }

    render.shutdown();
    let _ = render_join.join();
    Ok(())
}

fn write_table(output: &Path, name: &str, data: &TextureData) -> Result<()> {
    let mut path = output.to_owned();
    path.push(format!("{}.wgpu.bin", name));
    fs::write(&path, &data.data)?;
    let (width, height, depth) = data.size;
    info!(
        "wrote {} ({}x{}x{}, {} bytes)",
        path.display(),
        width,
        height,
        depth,
        data.data.len()
    );
    Ok(())
}

/// One PNG per depth layer, channels clamped to [0, 1].
fn write_previews(output: &Path, name: &str, data: &TextureData) -> Result<()> {
    let texels = data.texels_f32();
    let (width, height, depth) = data.size;
    let layer_texels = (width * height) as usize;
    for layer in 0..depth.max(1) as usize {
        let mut pixels = Vec::with_capacity(layer_texels * 3);
        for texel in texels[layer * layer_texels * 4..(layer + 1) * layer_texels * 4].chunks_exact(4)
        {
            for channel in &texel[..3] {
                let value = if channel.is_nan() { 0.0 } else { *channel };
                pixels.push((value.clamp(0.0, 1.0) * 255.0) as u8);
            }
        }
        let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("preview pixel buffer does not match {}x{}", width, height))?;
        let mut path = output.to_owned();
        path.push(format!("{}-layer{:02}.png", name, layer));
        image.save(&path)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}
