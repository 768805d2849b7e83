//! Purpose: Compile a parsed `EngineConfig` into a runnable plan.
//! Exports: `RunnableConfig`, `InboundPlan`, `OutboundPlan`, `build_config`.
//! Role: Second stage of the build pipeline; all semantic checks live here.
//! Invariants: Every protocol in the plan resolved through the registry.
//! Invariants: Rule outbound references are indices into `outbounds`, never dangling.
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde_json::Value;

use super::config::{EngineConfig, InboundConfig, OutboundConfig, RoutingRule};
use super::dispatch::{DomainMatcher, PortRange, Route};
use super::registry::{InboundCtor, OutboundCtor, ProtocolRegistry};
use crate::core::error::{Error, ErrorKind};

pub struct InboundPlan {
    pub tag: Option<String>,
    pub listen: SocketAddr,
    pub ctor: InboundCtor,
    pub config: InboundConfig,
}

pub struct OutboundPlan {
    pub tag: Option<String>,
    pub ctor: OutboundCtor,
    pub config: OutboundConfig,
}

pub struct RunnableConfig {
    pub inbounds: Vec<InboundPlan>,
    pub outbounds: Vec<OutboundPlan>,
    pub rules: Vec<Route>,
}

pub fn build_config(
    config: EngineConfig,
    registry: &ProtocolRegistry,
) -> Result<RunnableConfig, Error> {
    let mut tags = HashSet::new();

    let mut inbounds = Vec::with_capacity(config.inbounds.len());
    for inbound in config.inbounds {
        let ctor = registry.inbound(&inbound.protocol).ok_or_else(|| {
            build_error(format!("unknown inbound protocol: {}", inbound.protocol))
        })?;
        claim_tag(&mut tags, inbound.tag.as_deref())?;
        let listen = listen_addr(inbound.listen.as_deref(), inbound.port)?;
        inbounds.push(InboundPlan {
            tag: inbound.tag.clone(),
            listen,
            ctor,
            config: inbound,
        });
    }

    let mut outbounds = Vec::with_capacity(config.outbounds.len());
    for outbound in config.outbounds {
        let ctor = registry.outbound(&outbound.protocol).ok_or_else(|| {
            build_error(format!("unknown outbound protocol: {}", outbound.protocol))
        })?;
        claim_tag(&mut tags, outbound.tag.as_deref())?;
        outbounds.push(OutboundPlan {
            tag: outbound.tag.clone(),
            ctor,
            config: outbound,
        });
    }

    let rules = config
        .routing
        .map(|routing| routing.rules)
        .unwrap_or_default()
        .iter()
        .map(|rule| compile_rule(rule, &outbounds))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RunnableConfig {
        inbounds,
        outbounds,
        rules,
    })
}

fn build_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::ConfigBuild).with_message(message)
}

fn claim_tag(tags: &mut HashSet<String>, tag: Option<&str>) -> Result<(), Error> {
    if let Some(tag) = tag {
        if !tags.insert(tag.to_string()) {
            return Err(build_error(format!("duplicate tag: {tag}")));
        }
    }
    Ok(())
}

fn listen_addr(listen: Option<&str>, port: u16) -> Result<SocketAddr, Error> {
    let ip = match listen {
        None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        Some(raw) => raw
            .parse::<IpAddr>()
            .map_err(|err| build_error(format!("invalid listen address {raw}")).with_source(err))?,
    };
    Ok(SocketAddr::new(ip, port))
}

fn compile_rule(rule: &RoutingRule, outbounds: &[OutboundPlan]) -> Result<Route, Error> {
    let outbound = outbounds
        .iter()
        .position(|plan| plan.tag.as_deref() == Some(rule.outbound_tag.as_str()))
        .ok_or_else(|| build_error(format!("unknown outbound tag: {}", rule.outbound_tag)))?;

    let domains = rule
        .domain
        .iter()
        .map(|raw| {
            DomainMatcher::parse(raw)
                .ok_or_else(|| build_error(format!("unsupported domain matcher: {raw}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ports = match &rule.port {
        None => Vec::new(),
        Some(value) => parse_port_list(value)?,
    };

    if rule.inbound_tag.is_empty() && domains.is_empty() && ports.is_empty() {
        return Err(build_error(format!(
            "routing rule for {} has no effective fields",
            rule.outbound_tag
        )));
    }

    Ok(Route {
        inbound_tags: rule.inbound_tag.clone(),
        domains,
        ports,
        outbound,
    })
}

fn parse_port_list(value: &Value) -> Result<Vec<PortRange>, Error> {
    match value {
        Value::Number(number) => {
            let port = number
                .as_u64()
                .and_then(|port| u16::try_from(port).ok())
                .ok_or_else(|| build_error(format!("invalid rule port: {number}")))?;
            Ok(vec![PortRange { from: port, to: port }])
        }
        Value::String(list) => list.split(',').map(parse_port_range).collect(),
        other => Err(build_error(format!("invalid rule port: {other}"))),
    }
}

fn parse_port_range(raw: &str) -> Result<PortRange, Error> {
    let raw = raw.trim();
    let parse = |text: &str| {
        text.trim()
            .parse::<u16>()
            .map_err(|err| build_error(format!("invalid rule port: {raw}")).with_source(err))
    };
    let range = match raw.split_once('-') {
        Some((from, to)) => PortRange {
            from: parse(from)?,
            to: parse(to)?,
        },
        None => {
            let port = parse(raw)?;
            PortRange { from: port, to: port }
        }
    };
    if range.from > range.to {
        return Err(build_error(format!("invalid rule port range: {raw}")));
    }
    Ok(range)
}
