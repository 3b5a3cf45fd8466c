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
use crate::model::{AtmosphereModel, PhaseFunction};
use static_assertions::{assert_eq_align, assert_eq_size};
use zerocopy::{AsBytes, FromBytes};

/// The uniform layout is fixed, so the profile list is capped.
pub const MAX_PARTICLE_PROFILES: usize = 5;

/// One fixed uniform slot of [PrecomputeContext].
// Note: layout must match the ParticleProfile struct in both compute
// shaders: vec3 + packed u32, then three scalars and a pad, 32 bytes.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default)]
pub(crate) struct ParticleProfileSlot {
    pub scattering_coefficients: [f32; 3],
    pub phase_function: u32,
    pub exponent_factor: f32,
    pub linear_fade_in_size: f32,
    pub linear_fade_out_size: f32,
    pub pad0: f32,
}
assert_eq_size!(ParticleProfileSlot, [f32; 8]);
assert_eq_align!(ParticleProfileSlot, [f32; 4]);

/// GPU-uploadable projection of an [AtmosphereModel]: a count plus exactly
/// five positional profile slots. Slots at index >= `num_particle_profiles`
/// stay zeroed and the shaders never read them.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default)]
pub struct PrecomputeContext {
    pub(crate) atmosphere_scale: f32,
    pub(crate) num_particle_profiles: u32,
    pub(crate) pad0: [f32; 2],
    pub(crate) particle_profiles: [ParticleProfileSlot; MAX_PARTICLE_PROFILES],
}
assert_eq_size!(PrecomputeContext, [f32; 44]);
assert_eq_align!(PrecomputeContext, [f32; 4]);

fn phase_function_code(phase_function: PhaseFunction) -> u32 {
    match phase_function {
        PhaseFunction::None => 0,
        PhaseFunction::Rayleigh => 1,
    }
}

impl PrecomputeContext {
    /// Flatten a model into the fixed uniform layout.
    ///
    /// Panics if the model carries more than [MAX_PARTICLE_PROFILES]
    /// profiles; that is a caller bug, not a runtime condition.
    pub fn new(model: &AtmosphereModel) -> Self {
        assert!(
            model.particle_profiles.len() <= MAX_PARTICLE_PROFILES,
            "atmosphere model has {} particle profiles; the precompute layout holds at most {}",
            model.particle_profiles.len(),
            MAX_PARTICLE_PROFILES
        );
        let mut ctx = Self {
            atmosphere_scale: model.atmosphere_scale,
            num_particle_profiles: model.particle_profiles.len() as u32,
            ..Default::default()
        };
        for (slot, profile) in ctx
            .particle_profiles
            .iter_mut()
            .zip(&model.particle_profiles)
        {
            slot.scattering_coefficients = profile.scattering_coefficients;
            slot.phase_function = phase_function_code(profile.phase_function);
            slot.exponent_factor = profile.exponent_factor;
            slot.linear_fade_in_size = profile.linear_fade_in_size;
            slot.linear_fade_out_size = profile.linear_fade_out_size;
        }
        ctx
    }

    pub fn atmosphere_scale(&self) -> f32 {
        self.atmosphere_scale
    }

    pub fn num_particle_profiles(&self) -> u32 {
        self.num_particle_profiles
    }
}
