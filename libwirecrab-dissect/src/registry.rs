use std::collections::HashMap;
use std::sync::Arc;

use multimap::MultiMap;

use crate::dissector::{Dissector, MatchContext};
use crate::error::DissectError;
use crate::layer::Layer;

/// Shorthand definition for a shared dissector
pub type SafeDissector = Arc<dyn Dissector>;
/// Unique identifier for a dissector instance
pub type DissectorID = usize;

/// Dissectors, grouped by layer
///
/// Registration order is priority order: the first dissector that matches wins.
#[derive(Default)]
pub struct DissectorRegistry {
    dissectors_all: Vec<SafeDissector>,

    dissectors: MultiMap<Layer, SafeDissector>,
    layers: HashMap<&'static str, Layer>,
}

impl DissectorRegistry {
    pub fn new() -> Self {
        DissectorRegistry::default()
    }

    /// Return the count of different dissectors
    ///
    /// A dissector can be registered for several layers, but it will count as one.
    pub fn num_dissectors(&self) -> usize {
        self.dissectors_all.len()
    }

    /// Add a dissector to the registry, and return the identifier
    pub fn add_dissector(&mut self, dissector: SafeDissector) -> DissectorID {
        let id = self.dissectors_all.len();
        self.dissectors_all.push(dissector);
        id
    }

    /// Register the identified dissector for `layer`
    pub fn register_layer(&mut self, layer: Layer, id: DissectorID) -> Result<(), DissectError> {
        let dissector = self
            .dissectors_all
            .get(id)
            .ok_or(DissectError::InvalidDissectorId(id))?
            .clone();
        trace!("registering dissector {} for layer={}", dissector.name(), layer);
        self.layers.entry(dissector.name()).or_insert(layer);
        self.dissectors.insert(layer, dissector);
        Ok(())
    }

    /// Add a dissector and register it for `layer`
    pub fn register(&mut self, layer: Layer, dissector: SafeDissector) {
        let id = self.add_dissector(dissector);
        // id was just allocated, this cannot fail
        let _ = self.register_layer(layer, id);
    }

    /// Get dissectors registered for `layer`, in priority order
    pub fn get_dissectors_for_layer(&self, layer: Layer) -> Option<&Vec<SafeDissector>> {
        self.dissectors.get_vec(&layer)
    }

    /// Return the first dissector of `layer` matching `payload`
    pub fn find_match(
        &self,
        layer: Layer,
        payload: &[u8],
        ctx: &MatchContext,
    ) -> Option<&SafeDissector> {
        self.get_dissectors_for_layer(layer)?
            .iter()
            .find(|d| d.matches(payload, ctx))
    }

    /// Layer at which the named dissector was first registered
    pub fn layer_of(&self, name: &str) -> Option<Layer> {
        self.layers.get(name).copied()
    }

    /// Return an iterator on all known dissectors, in registration order
    ///
    /// Known dissectors are dissectors present in the registry (registered or not for layers)
    pub fn iter_dissectors(&self) -> impl Iterator<Item = &SafeDissector> {
        self.dissectors_all.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissector::Dissection;

    struct Fixed(&'static str, u8);

    impl Dissector for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        fn matches(&self, payload: &[u8], _ctx: &MatchContext) -> bool {
            payload.first() == Some(&self.1)
        }
        fn parse<'a>(&self, _payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
            Ok(Dissection::new())
        }
    }

    #[test]
    fn registry_first_match_wins() {
        let mut registry = DissectorRegistry::new();
        registry.register(Layer::Network, Arc::new(Fixed("first", 1)));
        registry.register(Layer::Network, Arc::new(Fixed("second", 1)));
        registry.register(Layer::Transport, Arc::new(Fixed("other", 2)));
        let ctx = MatchContext::default();
        let d = registry.find_match(Layer::Network, &[1], &ctx).expect("match");
        assert_eq!(d.name(), "first");
        assert!(registry.find_match(Layer::Network, &[2], &ctx).is_none());
        assert!(registry.find_match(Layer::Datalink, &[1], &ctx).is_none());
        assert_eq!(registry.layer_of("other"), Some(Layer::Transport));
        assert_eq!(registry.layer_of("missing"), None);
        assert_eq!(registry.num_dissectors(), 3);
    }

    #[test]
    fn registry_invalid_id() {
        let mut registry = DissectorRegistry::new();
        let id = registry.add_dissector(Arc::new(Fixed("a", 0)));
        assert!(registry.register_layer(Layer::Datalink, id).is_ok());
        assert_eq!(
            registry.register_layer(Layer::Datalink, 7),
            Err(DissectError::InvalidDissectorId(7))
        );
        // a dissector may be registered at several layers, but counts once
        assert!(registry.register_layer(Layer::Network, id).is_ok());
        assert_eq!(registry.num_dissectors(), 1);
        assert_eq!(registry.layer_of("a"), Some(Layer::Datalink));
    }
}
