//! Purpose: The bundled proxy engine and the capability traits the lifecycle manager uses.
//! Exports: `Engine`, `EngineBuilder`, `CoreEngine`, `Instance`, config model, registry,
//! `version`.
//! Role: Turns config text into a running set of listeners and outbounds.
//! Invariants: Build stages fail with their own kind: parse, build, init, start.
//! Invariants: The lifecycle manager depends only on `EngineBuilder`, never on protocols.
mod config;
mod dispatch;
mod inbound;
mod instance;
mod outbound;
mod plan;
mod registry;

pub use config::{
    EngineConfig, InboundConfig, OutboundConfig, RoutingConfig, RoutingRule, parse_config,
};
pub use dispatch::{
    BoxFuture, Destination, Dispatcher, DomainMatcher, Host, InboundHandler, OutboundHandler,
    PortRange, Route, Session,
};
pub use instance::Instance;
pub use plan::{InboundPlan, OutboundPlan, RunnableConfig, build_config};
pub use registry::{InboundCtor, OutboundCtor, ProtocolRegistry, global_registry};

use crate::core::error::Error;

/// A started-or-startable engine owned by exactly one holder.
pub trait Engine: Send {
    fn start(&mut self) -> Result<(), Error>;
    /// Releases listeners and workers. Safe to call more than once.
    fn close(&mut self);
    fn is_running(&self) -> bool;
}

/// The three construction stages in order: parse text, build the model, instantiate.
pub trait EngineBuilder: Send + Sync {
    type Model;
    type Runnable;
    type Engine: Engine;

    fn parse_config(&self, text: &str) -> Result<Self::Model, Error>;
    fn build_model(&self, model: Self::Model) -> Result<Self::Runnable, Error>;
    fn instantiate(&self, runnable: Self::Runnable) -> Result<Self::Engine, Error>;
}

/// Builder for the bundled engine, resolving protocols through a registry.
#[derive(Clone, Copy)]
pub struct CoreEngine {
    registry: &'static ProtocolRegistry,
}

impl CoreEngine {
    pub fn new() -> Self {
        Self {
            registry: global_registry(),
        }
    }
}

impl Default for CoreEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder for CoreEngine {
    type Model = EngineConfig;
    type Runnable = RunnableConfig;
    type Engine = Instance;

    fn parse_config(&self, text: &str) -> Result<EngineConfig, Error> {
        parse_config(text)
    }

    fn build_model(&self, model: EngineConfig) -> Result<RunnableConfig, Error> {
        build_config(model, self.registry)
    }

    fn instantiate(&self, runnable: RunnableConfig) -> Result<Instance, Error> {
        Instance::new(runnable)
    }
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
