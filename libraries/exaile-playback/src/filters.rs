//! Audio filter chain
//!
//! Plugins register [`AudioFilterProvider`]s; every stream builds its own
//! chain from them, ordered by index, whenever its pipeline passes through
//! the null state.

use exaile_core::media::{FilterElement, MediaFramework, MediaResult};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Highest filter index
pub const MAX_FILTER_INDEX: u32 = 100;

/// Supplies one element of the audio filter chain
#[cfg_attr(test, mockall::automock)]
pub trait AudioFilterProvider: Send + Sync {
    /// Unique provider name
    fn name(&self) -> String;

    /// Position in the chain, 0-100; lower runs first
    fn index(&self) -> u32;

    /// Build this provider's element
    fn create(
        &self,
        framework: &dyn MediaFramework,
        name: &str,
    ) -> MediaResult<Box<dyn FilterElement>>;
}

/// Registered filter providers, shared by all streams
#[derive(Clone, Default)]
pub struct AudioFilters {
    providers: Arc<RwLock<Vec<Arc<dyn AudioFilterProvider>>>>,
}

impl AudioFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider; takes effect at each stream's next track start
    pub fn register(&self, provider: Arc<dyn AudioFilterProvider>) {
        debug!("Registering audio filter {}", provider.name());
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        providers.len() != before
    }

    pub fn len(&self) -> usize {
        self.providers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a fresh chain of elements in index order
    ///
    /// Providers sharing an index are moved to the next free slot, in
    /// registration order. A provider that fails to build is skipped.
    pub fn build(&self, framework: &dyn MediaFramework, prefix: &str) -> Vec<Box<dyn FilterElement>> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut slots: BTreeMap<u32, Box<dyn FilterElement>> = BTreeMap::new();
        let mut taken: BTreeMap<u32, String> = BTreeMap::new();
        let mut shared: BTreeMap<u32, Vec<String>> = BTreeMap::new();

        for provider in providers {
            let name = provider.name();
            let wanted = provider.index().min(MAX_FILTER_INDEX);
            let mut index = wanted;

            if let Some(owner) = taken.get(&wanted) {
                shared
                    .entry(wanted)
                    .or_insert_with(|| vec![owner.clone()])
                    .push(name.clone());
                while taken.contains_key(&index) {
                    index += 1;
                }
            }

            match provider.create(framework, &format!("{}-{}", prefix, name)) {
                Ok(element) => {
                    taken.insert(index, name);
                    slots.insert(index, element);
                }
                Err(e) => warn!("Could not create {} element for {}: {}", name, prefix, e),
            }
        }

        for (index, names) in shared {
            warn!(
                "Audio plugins {:?} are sharing index {} (may have unpredictable output!)",
                names, index
            );
        }

        slots.into_values().collect()
    }
}

/// Provider for a single stock framework element
pub struct ElementFilter {
    name: String,
    factory: String,
    index: u32,
}

impl ElementFilter {
    pub fn new(name: impl Into<String>, factory: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            factory: factory.into(),
            index,
        }
    }
}

impl AudioFilterProvider for ElementFilter {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn create(
        &self,
        framework: &dyn MediaFramework,
        name: &str,
    ) -> MediaResult<Box<dyn FilterElement>> {
        framework.make_filter(&self.factory, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exaile_core::media::MediaError;
    use exaile_media_sim::SimFramework;

    fn factories(chain: &[Box<dyn FilterElement>]) -> Vec<String> {
        chain.iter().map(|e| e.factory_name().to_string()).collect()
    }

    #[test]
    fn test_chain_ordered_by_index() {
        let sim = SimFramework::new();
        let filters = AudioFilters::new();
        filters.register(Arc::new(ElementFilter::new("eq", "equalizer-10bands", 50)));
        filters.register(Arc::new(ElementFilter::new("vol", "volume", 10)));

        let chain = filters.build(&*sim, "stream");
        assert_eq!(factories(&chain), vec!["volume", "equalizer-10bands"]);
        assert_eq!(chain[0].name(), "stream-vol");
    }

    #[test]
    fn test_duplicate_index_is_bumped() {
        let sim = SimFramework::new();
        let filters = AudioFilters::new();
        filters.register(Arc::new(ElementFilter::new("a", "volume", 20)));
        filters.register(Arc::new(ElementFilter::new("b", "identity", 20)));
        filters.register(Arc::new(ElementFilter::new("c", "queue", 21)));

        let chain = filters.build(&*sim, "s");
        assert_eq!(factories(&chain), vec!["volume", "identity", "queue"]);
    }

    #[test]
    fn test_failing_provider_is_skipped() {
        let sim = SimFramework::new();
        let filters = AudioFilters::new();

        let mut broken = MockAudioFilterProvider::new();
        broken.expect_name().return_const("broken".to_string());
        broken.expect_index().return_const(5_u32);
        broken
            .expect_create()
            .times(1)
            .returning(|_, _| Err(MediaError::ElementNotFound("lv2".into())));

        filters.register(Arc::new(broken));
        filters.register(Arc::new(ElementFilter::new("vol", "volume", 10)));

        assert_eq!(factories(&filters.build(&*sim, "s")), vec!["volume"]);
    }

    #[test]
    fn test_unregister() {
        let filters = AudioFilters::new();
        filters.register(Arc::new(ElementFilter::new("vol", "volume", 10)));
        assert_eq!(filters.len(), 1);
        assert!(filters.unregister("vol"));
        assert!(!filters.unregister("vol"));
        assert!(filters.is_empty());
    }
}
