//! Purpose: Own every running engine instance and serialize all lifecycle changes.
//! Exports: `InstanceManager`, `launch`, `SERVER_STARTED`, `SERVER_STOPPED`, `ALREADY_STARTED`.
//! Role: Single-instance slot and handle-keyed registry behind one exclusive lock.
//! Invariants: A registered entry always holds an engine that started and is not yet closed.
//! Invariants: Entries are inserted only after a successful start and removed before close.
//! Invariants: The lock is held across engine build/start/close calls; operations never interleave.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use crate::core::error::{Error, ErrorKind};
use crate::engine::{Engine, EngineBuilder};

pub const SERVER_STARTED: &str = "Server started";
pub const SERVER_STOPPED: &str = "Server stopped";
pub const ALREADY_STARTED: &str = "Xray server already started";

/// Parse, build, instantiate and start. A start failure closes the engine first.
pub fn launch<B: EngineBuilder>(builder: &B, config: &str) -> Result<B::Engine, Error> {
    let model = builder.parse_config(config)?;
    let runnable = builder.build_model(model)?;
    let mut engine = builder.instantiate(runnable)?;
    if let Err(err) = engine.start() {
        engine.close();
        return Err(err);
    }
    Ok(engine)
}

struct Registry<E> {
    primary: Option<E>,
    named: HashMap<String, E>,
}

pub struct InstanceManager<B: EngineBuilder> {
    builder: B,
    registry: Mutex<Registry<B::Engine>>,
}

impl<B: EngineBuilder> InstanceManager<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder,
            registry: Mutex::new(Registry {
                primary: None,
                named: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<B::Engine>> {
        self.registry
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn start_server(&self, config: &str) -> Result<(), Error> {
        let mut registry = self.lock();
        if registry.primary.is_some() {
            return Err(already_started());
        }
        let engine = launch(&self.builder, config).inspect_err(|err| {
            warn!(error = %err, "server start failed");
        })?;
        registry.primary = Some(engine);
        info!("server started");
        Ok(())
    }

    /// Returns whether an engine was actually closed; stopping an empty slot is a no-op.
    pub fn stop_server(&self) -> bool {
        let mut registry = self.lock();
        match registry.primary.take() {
            Some(mut engine) => {
                engine.close();
                info!("server stopped");
                true
            }
            None => false,
        }
    }

    /// Read-only: a slot holding an engine that stopped on its own still reports false
    /// but is not cleared here.
    pub fn is_server_started(&self) -> bool {
        self.lock()
            .primary
            .as_ref()
            .is_some_and(|engine| engine.is_running())
    }

    pub fn start(&self, handle: &str, config: &str) -> Result<(), Error> {
        let mut registry = self.lock();
        if registry.named.contains_key(handle) {
            return Err(already_started());
        }
        let engine = launch(&self.builder, config).inspect_err(|err| {
            warn!(handle, error = %err, "instance start failed");
        })?;
        registry.named.insert(handle.to_string(), engine);
        info!(handle, "instance started");
        Ok(())
    }

    /// Returns whether an engine was actually closed; unknown handles are a no-op.
    pub fn stop(&self, handle: &str) -> bool {
        let mut registry = self.lock();
        match registry.named.remove(handle) {
            Some(mut engine) => {
                engine.close();
                info!(handle, "instance stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self, handle: &str) -> bool {
        self.lock()
            .named
            .get(handle)
            .is_some_and(|engine| engine.is_running())
    }

    /// Registered engines, counting the single-instance slot.
    pub fn instance_count(&self) -> usize {
        let registry = self.lock();
        registry.named.len() + usize::from(registry.primary.is_some())
    }

    /// Launches an unregistered engine, runs `f` against it, then closes it, all under
    /// the registry lock. The engine is closed whatever `f` returns.
    pub fn run_transient<T>(
        &self,
        config: &str,
        f: impl FnOnce(&B::Engine) -> T,
    ) -> Result<T, Error> {
        let _registry = self.lock();
        let mut engine = launch(&self.builder, config).inspect_err(|err| {
            warn!(error = %err, "transient start failed");
        })?;
        let output = f(&engine);
        engine.close();
        Ok(output)
    }

    /// Best-effort teardown of every registered engine, for process exit.
    pub fn shutdown(&self) {
        let mut registry = self.lock();
        if let Some(mut engine) = registry.primary.take() {
            engine.close();
        }
        for (handle, mut engine) in registry.named.drain() {
            engine.close();
            info!(handle = %handle, "instance stopped at shutdown");
        }
    }
}

fn already_started() -> Error {
    Error::new(ErrorKind::AlreadyStarted).with_message(ALREADY_STARTED)
}
