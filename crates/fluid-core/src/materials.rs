use crate::params::{lattice_mass, SimulationParams};

/// Coherent set of fluid parameters for a kind of liquid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluidPreset {
    pub rest_density: f32,
    pub viscosity: f32,
    /// Cohesion coefficient; 0 disables surface tension.
    pub surface_tension: f32,
    /// cm
    pub particle_radius: f32,
    pub compliance: f32,
    pub adhesion: bool,
    pub stack_pressure_scale: f32,
    pub friction: f32,
    pub restitution: f32,
}

impl FluidPreset {
    /// Water: low viscosity, no adhesion.
    pub const WATER: Self = Self {
        rest_density: 1000.0,
        viscosity: 0.01,
        surface_tension: 0.0,
        particle_radius: 5.0,
        compliance: 1.0e-8,
        adhesion: false,
        stack_pressure_scale: 0.0,
        friction: 0.1,
        restitution: 0.1,
    };

    /// Slime: sticky, cohesive, drips off characters.
    pub const SLIME: Self = Self {
        rest_density: 1100.0,
        viscosity: 0.2,
        surface_tension: 0.05,
        particle_radius: 5.0,
        compliance: 1.0e-7,
        adhesion: true,
        stack_pressure_scale: 0.2,
        friction: 0.5,
        restitution: 0.0,
    };

    /// Honey: dense and very viscous.
    pub const HONEY: Self = Self {
        rest_density: 1400.0,
        viscosity: 0.5,
        surface_tension: 0.02,
        particle_radius: 5.0,
        compliance: 1.0e-8,
        adhesion: true,
        stack_pressure_scale: 0.1,
        friction: 0.4,
        restitution: 0.0,
    };

    /// Apply this preset to simulation parameters. Particle mass follows the
    /// rest density so a packed lattice sits at rest.
    pub fn apply_to(&self, params: &mut SimulationParams) {
        params.rest_density = self.rest_density;
        params.viscosity = self.viscosity;
        params.particle_radius = self.particle_radius;
        params.particle_mass = lattice_mass(self.rest_density, self.particle_radius * 2.0);
        params.compliance = self.compliance;
        params.surface_tension.enabled = self.surface_tension > 0.0;
        params.surface_tension.coefficient = self.surface_tension;
        params.adhesion.enabled = self.adhesion;
        params.adhesion.stack_pressure_scale = self.stack_pressure_scale;
        params.bounds.friction = self.friction;
        params.bounds.restitution = self.restitution;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fluid_presets_valid() {
        for (name, preset) in [
            ("water", FluidPreset::WATER),
            ("slime", FluidPreset::SLIME),
            ("honey", FluidPreset::HONEY),
        ] {
            assert!(preset.rest_density > 0.0, "{} density must be positive", name);
            assert!(preset.viscosity >= 0.0, "{} viscosity must be non-negative", name);
            assert!(preset.particle_radius > 0.0, "{} radius must be positive", name);
            assert!(
                preset.restitution >= 0.0 && preset.restitution <= 1.0,
                "{} restitution must be in [0,1]",
                name
            );
        }
    }

    #[test]
    fn test_apply_preset_keeps_params_valid() {
        let mut params = SimulationParams::default();
        FluidPreset::HONEY.apply_to(&mut params);
        assert_eq!(params.rest_density, 1400.0);
        assert!(params.adhesion.enabled);
        assert!((params.particle_mass - 1.4).abs() < 1e-5);
        assert!(params.validate().is_ok());
    }
}
