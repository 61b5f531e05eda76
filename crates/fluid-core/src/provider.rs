use std::collections::HashMap;
use std::sync::Arc;

use crate::params::SimulationParams;

/// Per-emitter data a host component can supply.
///
/// Every method answers `None` for "no opinion"; [`ProviderDispatch`] turns
/// that into the configured default.
pub trait FluidDataProvider: Send + Sync {
    /// kg per particle.
    fn particle_mass(&self) -> Option<f32>;
    /// cm, for render and query collaborators.
    fn particle_radius(&self) -> Option<f32>;
    /// Live particle cap for the emitter.
    fn source_max(&self) -> Option<u32>;
}

/// Values used when no provider is registered or a provider has no answer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProviderDefaults {
    pub particle_mass: f32,
    pub particle_radius: f32,
    pub source_max: Option<u32>,
}

impl ProviderDefaults {
    pub fn from_params(params: &SimulationParams) -> Self {
        Self {
            particle_mass: params.particle_mass,
            particle_radius: params.particle_radius,
            source_max: None,
        }
    }
}

/// Resolves per-source data against explicit defaults.
pub struct ProviderDispatch {
    defaults: ProviderDefaults,
    providers: HashMap<i32, Arc<dyn FluidDataProvider>>,
}

impl ProviderDispatch {
    pub fn new(defaults: ProviderDefaults) -> Self {
        Self {
            defaults,
            providers: HashMap::new(),
        }
    }

    pub fn defaults(&self) -> &ProviderDefaults {
        &self.defaults
    }

    pub fn set_defaults(&mut self, defaults: ProviderDefaults) {
        self.defaults = defaults;
    }

    pub fn register(&mut self, source_id: i32, provider: Arc<dyn FluidDataProvider>) {
        self.providers.insert(source_id, provider);
    }

    pub fn unregister(&mut self, source_id: i32) -> bool {
        self.providers.remove(&source_id).is_some()
    }

    fn provider(&self, source_id: i32) -> Option<&dyn FluidDataProvider> {
        self.providers.get(&source_id).map(|p| p.as_ref())
    }

    /// Provider mass when it is a positive finite number, default otherwise.
    pub fn particle_mass(&self, source_id: i32) -> f32 {
        self.provider(source_id)
            .and_then(|p| p.particle_mass())
            .filter(|m| m.is_finite() && *m > 0.0)
            .unwrap_or(self.defaults.particle_mass)
    }

    pub fn particle_radius(&self, source_id: i32) -> f32 {
        self.provider(source_id)
            .and_then(|p| p.particle_radius())
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(self.defaults.particle_radius)
    }

    pub fn source_max(&self, source_id: i32) -> Option<u32> {
        self.provider(source_id)
            .and_then(|p| p.source_max())
            .or(self.defaults.source_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HeavyEmitter;

    impl FluidDataProvider for HeavyEmitter {
        fn particle_mass(&self) -> Option<f32> {
            Some(3.0)
        }
        fn particle_radius(&self) -> Option<f32> {
            None
        }
        fn source_max(&self) -> Option<u32> {
            Some(128)
        }
    }

    #[test]
    fn test_dispatch_falls_back_to_defaults() {
        let params = SimulationParams::default();
        let mut dispatch = ProviderDispatch::new(ProviderDefaults::from_params(&params));
        dispatch.register(4, Arc::new(HeavyEmitter));

        assert_eq!(dispatch.particle_mass(4), 3.0);
        assert_eq!(dispatch.particle_radius(4), params.particle_radius);
        assert_eq!(dispatch.source_max(4), Some(128));

        assert_eq!(dispatch.particle_mass(9), params.particle_mass);
        assert_eq!(dispatch.source_max(9), None);
    }
}
