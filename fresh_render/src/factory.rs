/// RenderContextFactory - backend registry and API selection

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::RenderConfig;
use crate::context::RenderContext;
use crate::error::{Error, Result};
use crate::graphics_api::{ApiSet, GraphicsApi};
use crate::{engine_debug, engine_error, engine_info};

const SOURCE: &str = "fresh::factory";

// ============================================================================
// Backend registry
// ============================================================================

/// Constructor a backend crate installs with [`register_backend`]
///
/// Builds an uninitialized context; `initialize` is called by the host.
pub type BackendConstructor = Arc<dyn Fn(&RenderConfig) -> Result<Box<dyn RenderContext>> + Send + Sync>;

/// Registry of linked-in backends
pub struct BackendRegistry {
    backends: FxHashMap<GraphicsApi, BackendConstructor>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: FxHashMap::default(),
        }
    }

    fn register(&mut self, api: GraphicsApi, constructor: BackendConstructor) -> bool {
        self.backends.insert(api, constructor).is_some()
    }

    fn get(&self, api: GraphicsApi) -> Option<BackendConstructor> {
        self.backends.get(&api).cloned()
    }
}

static BACKEND_REGISTRY: Mutex<Option<BackendRegistry>> = Mutex::new(None);

/// Lock the global registry, creating it on first access
///
/// A panic inside a constructor never happens under the lock, so a
/// poisoned registry still holds consistent data.
fn registry() -> MutexGuard<'static, Option<BackendRegistry>> {
    let mut guard = BACKEND_REGISTRY
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.is_none() {
        *guard = Some(BackendRegistry::new());
    }
    guard
}

/// Install (or replace) the constructor for `api`
///
/// `Auto` is not a backend and is ignored.
pub fn register_backend<F>(api: GraphicsApi, constructor: F)
where
    F: Fn(&RenderConfig) -> Result<Box<dyn RenderContext>> + Send + Sync + 'static,
{
    if api == GraphicsApi::Auto {
        engine_error!(SOURCE, "Cannot register a backend for GraphicsApi::Auto");
        return;
    }
    let replaced = registry()
        .as_mut()
        .map(|r| r.register(api, Arc::new(constructor)))
        .unwrap_or(false);
    if replaced {
        engine_debug!(SOURCE, "{} backend re-registered", api);
    } else {
        engine_debug!(SOURCE, "{} backend registered", api);
    }
}

/// Remove the constructor for `api`; returns whether one was registered
pub fn unregister_backend(api: GraphicsApi) -> bool {
    registry()
        .as_mut()
        .map(|r| r.backends.remove(&api).is_some())
        .unwrap_or(false)
}

pub fn is_backend_registered(api: GraphicsApi) -> bool {
    registry()
        .as_ref()
        .map(|r| r.backends.contains_key(&api))
        .unwrap_or(false)
}

fn registered_constructor(api: GraphicsApi) -> Option<BackendConstructor> {
    registry().as_ref().and_then(|r| r.get(api))
}

// ============================================================================
// Factory
// ============================================================================

/// Creates render contexts for a requested graphics API
pub struct RenderContextFactory;

impl RenderContextFactory {
    /// Create an uninitialized context for `api`
    ///
    /// `Auto` resolves through [`crate::graphics_api::select_best_graphics_api`].
    /// The request is refused, without running any constructor, when the API
    /// cannot exist on this platform or its backend is not registered.
    pub fn create(api: GraphicsApi, config: &RenderConfig) -> Result<Box<dyn RenderContext>> {
        let resolved = api.resolve();
        if api == GraphicsApi::Auto {
            engine_debug!(SOURCE, "Auto resolved to {}", resolved);
        }

        if !resolved.is_supported_on_platform() {
            engine_error!(SOURCE, "{} is not available on this platform", resolved);
            return Err(Error::ApiUnavailable(resolved));
        }

        // Clone the constructor out so the registry is unlocked while it runs
        let constructor = match registered_constructor(resolved) {
            Some(constructor) => constructor,
            None => {
                engine_error!(SOURCE, "No {} backend registered in this build", resolved);
                return Err(Error::ApiUnavailable(resolved));
            }
        };

        let context = constructor(config)?;
        engine_info!(SOURCE, "Created {} render context", context.api());
        Ok(context)
    }

    /// Create a context for `config.preferred_api`
    pub fn create_best(config: &RenderConfig) -> Result<Box<dyn RenderContext>> {
        Self::create(config.preferred_api, config)
    }

    /// APIs that are both possible on this platform and registered
    pub fn available_apis() -> ApiSet {
        GraphicsApi::CONCRETE
            .into_iter()
            .filter(|&api| Self::is_api_available(api))
            .fold(ApiSet::empty(), |set, api| set | api.flag())
    }

    pub fn is_api_available(api: GraphicsApi) -> bool {
        let resolved = api.resolve();
        resolved.is_supported_on_platform() && is_backend_registered(resolved)
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
