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

/// Angular distribution of scattered light for a particle type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhaseFunction {
    /// No angular weighting; light scatters evenly in all directions.
    None,
    /// Rayleigh scattering, for particles much smaller than the wavelength.
    Rayleigh,
}

impl Default for PhaseFunction {
    fn default() -> Self {
        Self::None
    }
}

/// One scattering-participating species in the atmosphere.
#[derive(Clone, Debug, Default)]
pub struct ParticleProfile {
    /// The phase function to apply for this particle profile.
    pub phase_function: PhaseFunction,
    /// Per-wavelength scattering coefficients at maximum density, in units
    /// of inverse planet radii.
    pub scattering_coefficients: [f32; 3],
    /// The factor f in the density formula exp(-h * f), where h is the
    /// normalized height within the atmosphere.
    pub exponent_factor: f32,
    /// The part of the atmosphere over which density should fade in at the
    /// inner boundary. Zero disables the ramp.
    pub linear_fade_in_size: f32,
    /// The part of the atmosphere over which density should fade out at the
    /// outer boundary. Zero disables the ramp.
    pub linear_fade_out_size: f32,
}

/// User-level description of an atmosphere.
///
/// `sun_intensity` and `hue_shift` are shading-time parameters; they travel
/// with the model so that material binding can pick them up, but the
/// precompute passes do not consume them.
#[derive(Clone, Debug)]
pub struct AtmosphereModel {
    /// The atmosphere's height relative to the planet radius. A value of 1
    /// makes the atmosphere as high as the planet radius.
    pub atmosphere_scale: f32,
    /// The strength of sunlight.
    pub sun_intensity: f32,
    /// The amount of hue shift to apply at shading time. A value of 1
    /// equals a shift of 360 degrees.
    pub hue_shift: f32,
    /// The particle profiles that make up the atmosphere. At most
    /// [MAX_PARTICLE_PROFILES](crate::MAX_PARTICLE_PROFILES) entries.
    pub particle_profiles: Vec<ParticleProfile>,
}

impl Default for AtmosphereModel {
    /// A stylized Earth-like atmosphere: a single Rayleigh layer with a
    /// blue-heavy coefficient spread.
    fn default() -> Self {
        Self {
            atmosphere_scale: 0.2,
            sun_intensity: 1.0,
            hue_shift: 0.0,
            particle_profiles: vec![ParticleProfile {
                phase_function: PhaseFunction::Rayleigh,
                scattering_coefficients: [1.47, 3.48, 6.0],
                exponent_factor: 12.0,
                linear_fade_in_size: 0.0,
                linear_fade_out_size: 0.0,
            }],
        }
    }
}

/// Size and quality configuration for one precompute dispatch.
#[derive(Clone, Copy, Debug)]
pub struct TextureSettings {
    pub transmittance_width: u32,
    pub transmittance_height: u32,
    /// Edge length of the cubic in-scattered light volume.
    pub in_scattered_light_size: u32,
    /// Integration step count for the transmittance pass.
    pub transmittance_sample_steps: u32,
    /// Integration step count for the in-scattered light pass.
    pub in_scattered_light_sample_steps: u32,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            transmittance_width: 256,
            transmittance_height: 64,
            in_scattered_light_size: 32,
            transmittance_sample_steps: 40,
            in_scattered_light_sample_steps: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_within_the_profile_cap() {
        let model = AtmosphereModel::default();
        assert!(model.particle_profiles.len() <= crate::MAX_PARTICLE_PROFILES);
        assert_eq!(
            model.particle_profiles[0].phase_function,
            PhaseFunction::Rayleigh
        );
    }
}
