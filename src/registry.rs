//! Module registry
//!
//! Maps `module_id` to its definition and handler. Entries are shared as
//! `Arc` snapshots: an invocation that already looked a module up keeps
//! running against that snapshot even if the module is replaced or
//! unregistered meanwhile. Mutations take a write lock, so registering
//! while scheduled work is in flight is safe.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{AnalysisError, Result};
use crate::handler::AnalysisHandler;
use crate::schema::ModuleDefinition;

static MODULE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap());

/// A definition paired with its handler
pub struct RegisteredModule {
    pub definition: ModuleDefinition,
    pub handler: Arc<dyn AnalysisHandler>,
}

impl std::fmt::Debug for RegisteredModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredModule")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    modules: HashMap<String, Arc<RegisteredModule>>,
    /// Registration order for catalog listing
    order: Vec<String>,
}

/// Registry of analysis modules
#[derive(Default)]
pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the bundled modules
    pub fn with_builtin_modules() -> Self {
        let registry = Self::new();
        crate::modules::register_builtin_modules(&registry);
        registry
    }

    /// Insert a new module; fails if the id is taken
    pub fn register(
        &self,
        definition: ModuleDefinition,
        handler: Arc<dyn AnalysisHandler>,
    ) -> Result<()> {
        validate_module_id(&definition.module_id)?;
        let mut state = self.state.write();
        if state.modules.contains_key(&definition.module_id) {
            return Err(AnalysisError::DuplicateModule {
                module_id: definition.module_id,
            });
        }

        info!(module_id = %definition.module_id, "Registered analysis module");
        let module_id = definition.module_id.clone();
        state.order.push(module_id.clone());
        state
            .modules
            .insert(module_id, Arc::new(RegisteredModule { definition, handler }));
        Ok(())
    }

    /// Insert or overwrite a module. An existing entry keeps its catalog position.
    pub fn replace(
        &self,
        definition: ModuleDefinition,
        handler: Arc<dyn AnalysisHandler>,
    ) -> Result<()> {
        validate_module_id(&definition.module_id)?;
        let mut state = self.state.write();
        let module_id = definition.module_id.clone();
        let entry = Arc::new(RegisteredModule { definition, handler });

        if state.modules.insert(module_id.clone(), entry).is_some() {
            info!(module_id = %module_id, "Replaced analysis module");
        } else {
            info!(module_id = %module_id, "Registered analysis module");
            state.order.push(module_id);
        }
        Ok(())
    }

    /// Remove a module; fails if it is not registered
    pub fn unregister(&self, module_id: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.modules.remove(module_id).is_none() {
            return Err(AnalysisError::UnknownModule {
                module_id: module_id.to_string(),
            });
        }
        state.order.retain(|id| id != module_id);
        info!(module_id, "Unregistered analysis module");
        Ok(())
    }

    /// Look up a module's definition and handler
    pub fn get(&self, module_id: &str) -> Result<Arc<RegisteredModule>> {
        let state = self.state.read();
        let found = state.modules.get(module_id).cloned();
        debug!(module_id, found = found.is_some(), "Registry lookup");
        found.ok_or_else(|| AnalysisError::UnknownModule {
            module_id: module_id.to_string(),
        })
    }

    /// All definitions in registration order (handlers are never exposed here)
    pub fn list(&self) -> Vec<ModuleDefinition> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.modules.get(id))
            .map(|module| module.definition.clone())
            .collect()
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.state.read().modules.contains_key(module_id)
    }

    pub fn len(&self) -> usize {
        self.state.read().modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_module_id(module_id: &str) -> Result<()> {
    if MODULE_ID_PATTERN.is_match(module_id) {
        Ok(())
    } else {
        Err(AnalysisError::InvalidModuleId {
            module_id: module_id.to_string(),
        })
    }
}
