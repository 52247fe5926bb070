use std::collections::BTreeMap;
use std::sync::Arc;

use medley_contracts::MediaAdapter;

/// Flat registry of provider adapters, keyed by upper-case name.
///
/// Populated once at orchestrator construction; an adapter missing for a
/// configured pair is skipped gracefully with an error event, never a
/// panic.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<String, Arc<dyn MediaAdapter>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(adapters: impl IntoIterator<Item = Arc<dyn MediaAdapter>>) -> ProviderRegistry {
        let mut out = ProviderRegistry::default();
        for adapter in adapters {
            out.register(adapter);
        }
        out
    }

    pub fn register(&mut self, adapter: Arc<dyn MediaAdapter>) {
        let name = adapter.name().trim().to_ascii_uppercase();
        self.adapters.insert(name, adapter);
    }

    /// Look up an adapter by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn MediaAdapter>> {
        self.adapters.get(&name.trim().to_ascii_uppercase())
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn MediaAdapter>)> {
        self.adapters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
