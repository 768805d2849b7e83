//! Purpose: Route inbound connections to outbound handlers.
//! Exports: `Destination`, `Host`, `Session`, `InboundHandler`, `OutboundHandler`, `Dispatcher`,
//! `Route`, `DomainMatcher`, `PortRange`.
//! Role: Runtime side of routing; built once per instance from the compiled plan.
//! Invariants: The first matching rule wins; with no match the first outbound is used.
//! Invariants: Domain matchers only ever match domain destinations, never IP literals.
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::TcpStream;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub host: Host,
    pub port: u16,
}

impl Destination {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    /// Parses `host:port`, `[v6]:port`, or a bare host with `default_port`.
    pub fn parse_authority(authority: &str, default_port: u16) -> io::Result<Self> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid authority: {authority}"),
            )
        };
        if authority.is_empty() {
            return Err(invalid());
        }
        if let Ok(addr) = authority.parse::<SocketAddr>() {
            return Ok(Self::new(Host::Ip(addr.ip()), addr.port()));
        }
        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => default_port,
                None => return Err(invalid()),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
                None => (authority, default_port),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let host = match host.parse::<IpAddr>() {
            Ok(ip) => Host::Ip(ip),
            Err(_) => Host::Domain(host.to_ascii_lowercase()),
        };
        Ok(Self::new(host, port))
    }

    pub fn domain(&self) -> Option<&str> {
        match &self.host {
            Host::Domain(domain) => Some(domain),
            Host::Ip(_) => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]:{}", self.port),
            Host::Ip(ip) => write!(f, "{ip}:{}", self.port),
            Host::Domain(domain) => write!(f, "{domain}:{}", self.port),
        }
    }
}

/// Per-connection context handed to an inbound handler.
#[derive(Clone)]
pub struct Session {
    pub inbound_tag: Option<String>,
    pub peer: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
}

impl Session {
    pub async fn dial(&self, dest: &Destination) -> io::Result<TcpStream> {
        self.dispatcher.dial(self.inbound_tag.as_deref(), dest).await
    }
}

pub trait InboundHandler: Send + Sync {
    fn serve(
        self: Arc<Self>,
        stream: TcpStream,
        session: Session,
    ) -> BoxFuture<'static, io::Result<()>>;
}

pub trait OutboundHandler: Send + Sync {
    fn dial<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, io::Result<TcpStream>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainMatcher {
    Full(String),
    Suffix(String),
    Keyword(String),
}

impl DomainMatcher {
    /// Returns `None` for matcher prefixes the engine does not implement.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once(':') {
            Some(("full", value)) => Some(Self::Full(value.to_ascii_lowercase())),
            Some(("domain", value)) => Some(Self::Suffix(value.to_ascii_lowercase())),
            Some(("keyword", value)) => Some(Self::Keyword(value.to_ascii_lowercase())),
            Some(_) => None,
            None if raw.is_empty() => None,
            None => Some(Self::Keyword(raw.to_ascii_lowercase())),
        }
    }

    pub fn matches(&self, domain: &str) -> bool {
        match self {
            Self::Full(value) => domain == value,
            Self::Suffix(value) => {
                domain == value
                    || domain
                        .strip_suffix(value.as_str())
                        .is_some_and(|head| head.ends_with('.'))
            }
            Self::Keyword(value) => domain.contains(value.as_str()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub inbound_tags: Vec<String>,
    pub domains: Vec<DomainMatcher>,
    pub ports: Vec<PortRange>,
    pub outbound: usize,
}

impl Route {
    fn matches(&self, inbound_tag: Option<&str>, dest: &Destination) -> bool {
        if !self.inbound_tags.is_empty()
            && !inbound_tag.is_some_and(|tag| self.inbound_tags.iter().any(|t| t == tag))
        {
            return false;
        }
        if !self.domains.is_empty() {
            let Some(domain) = dest.domain() else {
                return false;
            };
            if !self.domains.iter().any(|matcher| matcher.matches(domain)) {
                return false;
            }
        }
        if !self.ports.is_empty() && !self.ports.iter().any(|range| range.contains(dest.port)) {
            return false;
        }
        true
    }
}

pub struct Dispatcher {
    outbounds: Vec<(Option<String>, Arc<dyn OutboundHandler>)>,
    routes: Vec<Route>,
}

impl Dispatcher {
    pub fn new(
        outbounds: Vec<(Option<String>, Arc<dyn OutboundHandler>)>,
        routes: Vec<Route>,
    ) -> Self {
        Self { outbounds, routes }
    }

    /// Index of the outbound selected for this connection, if any exists.
    pub fn select(&self, inbound_tag: Option<&str>, dest: &Destination) -> Option<usize> {
        self.routes
            .iter()
            .find(|route| route.matches(inbound_tag, dest))
            .map(|route| route.outbound)
            .or(if self.outbounds.is_empty() { None } else { Some(0) })
    }

    pub async fn dial(
        &self,
        inbound_tag: Option<&str>,
        dest: &Destination,
    ) -> io::Result<TcpStream> {
        let index = self.select(inbound_tag, dest).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no outbound configured")
        })?;
        let (tag, outbound) = &self.outbounds[index];
        tracing::debug!(
            dest = %dest,
            inbound = inbound_tag.unwrap_or("-"),
            outbound = tag.as_deref().unwrap_or("-"),
            "dispatch"
        );
        outbound.dial(dest).await
    }
}
