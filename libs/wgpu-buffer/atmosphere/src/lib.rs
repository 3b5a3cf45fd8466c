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

//! Precomputed atmospheric scattering tables.
//!
//! Two compute passes run on one GPU command graph: the first integrates
//! per-species optical depth into a 2D transmittance table over height and
//! sun angle; the second marches view rays through the atmosphere, reusing
//! that table, to fill a 3D in-scattered light volume over height, view
//! angle, and sun angle. Results come back asynchronously as plain byte
//! buffers; building renderable texture objects out of them is the
//! caller's concern.

mod context;
mod model;
mod precompute;
mod resource;

pub use crate::{
    context::{PrecomputeContext, MAX_PARTICLE_PROFILES},
    model::{AtmosphereModel, ParticleProfile, PhaseFunction, TextureSettings},
    precompute::{
        precompute_atmospheric_scattering, PrecomputeResults, DEBUG_IN_SCATTERED_LIGHT,
        DEBUG_TRANSMITTANCE,
    },
    resource::TextureData,
};
