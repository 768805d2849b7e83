//! Purpose: Name-to-constructor tables for inbound and outbound protocols.
//! Exports: `ProtocolRegistry`, `InboundCtor`, `OutboundCtor`, `global_registry`.
//! Role: Static plugin registry; the build step resolves protocol names only through it.
//! Invariants: The global registry is populated once, before any config is built.
//! Invariants: Constructors validate protocol `settings` and fail with `EngineInit`.
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use super::config::{InboundConfig, OutboundConfig};
use super::dispatch::{InboundHandler, OutboundHandler};
use super::{inbound, outbound};
use crate::core::error::Error;

pub type InboundCtor = fn(&InboundConfig) -> Result<Arc<dyn InboundHandler>, Error>;
pub type OutboundCtor = fn(&OutboundConfig) -> Result<Arc<dyn OutboundHandler>, Error>;

#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    inbounds: BTreeMap<&'static str, InboundCtor>,
    outbounds: BTreeMap<&'static str, OutboundCtor>,
}

impl ProtocolRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_inbound("http", inbound::http::new);
        registry.register_inbound("socks", inbound::socks::new);
        registry.register_outbound("freedom", outbound::freedom);
        registry.register_outbound("blackhole", outbound::blackhole);
        registry
    }

    pub fn register_inbound(&mut self, protocol: &'static str, ctor: InboundCtor) {
        self.inbounds.insert(protocol, ctor);
    }

    pub fn register_outbound(&mut self, protocol: &'static str, ctor: OutboundCtor) {
        self.outbounds.insert(protocol, ctor);
    }

    pub fn inbound(&self, protocol: &str) -> Option<InboundCtor> {
        self.inbounds.get(protocol).copied()
    }

    pub fn outbound(&self, protocol: &str) -> Option<OutboundCtor> {
        self.outbounds.get(protocol).copied()
    }

    pub fn inbound_protocols(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inbounds.keys().copied()
    }

    pub fn outbound_protocols(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.outbounds.keys().copied()
    }
}

pub fn global_registry() -> &'static ProtocolRegistry {
    static REGISTRY: OnceLock<ProtocolRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ProtocolRegistry::with_builtins)
}

#[cfg(test)]
mod tests {
    use super::{ProtocolRegistry, global_registry};

    #[test]
    fn builtins_are_registered() {
        let registry = global_registry();
        assert_eq!(registry.inbound_protocols().collect::<Vec<_>>(), ["http", "socks"]);
        assert_eq!(
            registry.outbound_protocols().collect::<Vec<_>>(),
            ["blackhole", "freedom"]
        );
        assert!(registry.inbound("vmess").is_none());
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = ProtocolRegistry::empty();
        assert!(registry.inbound("http").is_none());
        assert!(registry.outbound("freedom").is_none());
    }
}
