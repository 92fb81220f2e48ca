//! Bundled analysis modules

pub mod latency_tokens;

use std::sync::Arc;

use tracing::warn;

use crate::registry::ModuleRegistry;

pub use latency_tokens::LatencyTokensSummary;

/// Install every bundled module, overwriting same-id entries
pub fn register_builtin_modules(registry: &ModuleRegistry) {
    if let Err(e) = registry.replace(latency_tokens::definition(), Arc::new(LatencyTokensSummary)) {
        warn!(error = %e, "Failed to register bundled module");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_idempotently() {
        let registry = ModuleRegistry::new();
        register_builtin_modules(&registry);
        register_builtin_modules(&registry);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(latency_tokens::MODULE_ID));
    }
}
