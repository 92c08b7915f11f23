//! Loading backend artifacts as plugin handles.
//!
//! # Responsibilities
//! - Open a freshly built artifact as a native library
//! - Check its manifest against the host before touching any Rust type
//! - Validate that it exports `register_routes`
//! - Keep loaded handles alive for as long as routes built from them exist
//!
//! # Design Decisions
//! - Handles are keyed by build generation, never by path
//! - A missing export is a `ContractViolation`; the live table is untouched
//! - Panics are caught on the plugin's side and cross the boundary as values
//! - `LoadedModule` drops its registration entry before its library

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use abi_stable::library::RawLibrary;
use thiserror::Error;

use crate::build::BuildArtifact;
use crate::routing::registrar::{
    run_registration, PluginManifest, PluginManifestFn, RegisterRoutesFn, RouteRegistrar,
    PLUGIN_MANIFEST_SYMBOL, REGISTER_ROUTES_SYMBOL,
};

/// Errors produced while turning an artifact into routes.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The artifact could not be opened as a library.
    #[error("failed to open {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },

    /// The artifact loaded but does not export the registration entry point.
    #[error("contract violation: {} does not export `{symbol}`", .path.display())]
    ContractViolation { path: PathBuf, symbol: &'static str },

    /// The artifact was built against a different hotroute or toolchain.
    #[error("incompatible plugin {}: {reason}", .path.display())]
    Incompatible { path: PathBuf, reason: String },

    /// `register_routes` panicked (for example, on a duplicate route).
    #[error("route registration for generation {generation} panicked: {message}")]
    RegistrationPanicked { generation: u64, message: String },
}

/// Registration entry; `Err` carries the message of a caught panic.
type RegisterRoutes = Box<dyn Fn(&mut RouteRegistrar) -> Result<(), String> + Send + Sync>;

/// A validated backend generation.
pub struct LoadedModule {
    generation: u64,
    path: PathBuf,
    register: RegisterRoutes,
    // Must stay the last field: the library is unmapped after `register` drops.
    _library: Option<RawLibrary>,
}

impl LoadedModule {
    /// An in-process module (no native library behind it).
    pub fn new<F>(generation: u64, path: impl Into<PathBuf>, register: F) -> Self
    where
        F: Fn(&mut RouteRegistrar) + Send + Sync + 'static,
    {
        Self {
            generation,
            path: path.into(),
            register: Box::new(move |registrar: &mut RouteRegistrar| {
                match run_registration(registrar, &register).into_option() {
                    Some(message) => Err(String::from(message)),
                    None => Ok(()),
                }
            }),
            _library: None,
        }
    }

    fn from_library(artifact: &BuildArtifact, library: RawLibrary, register: RegisterRoutesFn) -> Self {
        Self {
            generation: artifact.token(),
            path: artifact.path().to_path_buf(),
            register: Box::new(move |registrar: &mut RouteRegistrar| {
                match register(registrar).into_option() {
                    Some(message) => Err(String::from(message)),
                    None => Ok(()),
                }
            }),
            _library: Some(library),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Invoke the module's `register_routes`. `Err` holds the message of a
    /// panic raised during registration.
    pub fn register(&self, registrar: &mut RouteRegistrar) -> Result<(), String> {
        (self.register)(registrar)
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("generation", &self.generation)
            .field("path", &self.path)
            .field("native", &self._library.is_some())
            .finish()
    }
}

/// Turns a build artifact into a loaded module.
pub trait ModuleLoader: Send + Sync + 'static {
    fn load(&self, artifact: &BuildArtifact) -> Result<LoadedModule, LoadError>;
}

/// Loads artifacts as native dynamic libraries.
///
/// The plugin shares Rust types (`Router`, `Handle`) with the host, so it
/// must be built with the same toolchain and `hotroute` version; the
/// exported manifest is checked before registration runs. Its other
/// dependencies (axum, tokio) should resolve to the host's versions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl DylibLoader {
    fn symbol<T: Copy>(library: &RawLibrary, artifact: &BuildArtifact, name: &'static str) -> Result<T, LoadError> {
        let symbol = format!("{}\0", name);
        // SAFETY: both symbols are declared by `export_routes!` with exactly
        // the requested signature; the pointer is copied out and stored next
        // to the library that keeps it valid.
        match unsafe { library.get::<T>(symbol.as_bytes()) } {
            Ok(symbol) => Ok(*symbol),
            Err(_) => Err(LoadError::ContractViolation {
                path: artifact.path().to_path_buf(),
                symbol: name,
            }),
        }
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, artifact: &BuildArtifact) -> Result<LoadedModule, LoadError> {
        let library = RawLibrary::load_at(artifact.path()).map_err(|e| LoadError::Open {
            path: artifact.path().to_path_buf(),
            message: e.to_string(),
        })?;

        let register: RegisterRoutesFn = Self::symbol(&library, artifact, REGISTER_ROUTES_SYMBOL)?;
        let manifest: PluginManifestFn = Self::symbol(&library, artifact, PLUGIN_MANIFEST_SYMBOL)?;

        if let Some(reason) = manifest().incompatibility(&PluginManifest::current()) {
            return Err(LoadError::Incompatible {
                path: artifact.path().to_path_buf(),
                reason,
            });
        }

        Ok(LoadedModule::from_library(artifact, library, register))
    }
}

/// Loaded plugin handles keyed by build generation.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Mutex<BTreeMap<u64, Arc<LoadedModule>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, returning the shared handle.
    pub fn insert(&self, module: LoadedModule) -> Arc<LoadedModule> {
        let module = Arc::new(module);
        self.lock().insert(module.generation(), module.clone());
        module
    }

    pub fn get(&self, generation: u64) -> Option<Arc<LoadedModule>> {
        self.lock().get(&generation).cloned()
    }

    /// Remove a handle that never went live.
    pub fn remove(&self, generation: u64) -> Option<Arc<LoadedModule>> {
        self.lock().remove(&generation)
    }

    /// Generations currently held, oldest first.
    pub fn generations(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }

    /// Drop all but the newest `keep` handles. Routes still serving requests
    /// keep their own reference, so a library is only unmapped once idle.
    pub fn retain_newest(&self, keep: usize) -> Vec<u64> {
        let mut modules = self.lock();
        let excess = modules.len().saturating_sub(keep);
        let stale: Vec<u64> = modules.keys().take(excess).copied().collect();
        for generation in &stale {
            modules.remove(generation);
        }
        stale
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Arc<LoadedModule>>> {
        self.modules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
