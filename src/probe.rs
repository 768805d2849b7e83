//! Purpose: HTTP HEAD connectivity probe with latency measurement.
//! Exports: `ProxyEndpoint`, `probe`, `probe_port`, `probe_endpoint`, `DEFAULT_PROBE_URL`,
//! `PING_RESPONSE_ERROR`.
//! Role: Health check used directly by `ping` and through a transient instance by `test_config`.
//! Invariants: Every probe uses a fresh agent with no idle connection reuse.
//! Invariants: Only HTTP 204 is success; any other status maps to `PingError`.
//! Invariants: Transport failures of every cause map to `PingTimeout` with the error text.
//! Invariants: A 204 that arrives is a success however long the origin took to answer;
//! only connect and a stalled TLS handshake are bounded.
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::response::Response;

pub const DEFAULT_PROBE_URL: &str = "https://www.gstatic.com/generate_204";
pub const PING_RESPONSE_ERROR: &str = "Ping response error";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
// ureq 2 has no handshake-only timeout; the socket read bound doubles as one, so it is kept
// well past any realistic response delay.
const STALL_TIMEOUT: Duration = Duration::from_secs(60);
const LOCAL_PROXY_HOST: &str = "127.0.0.1";

/// An HTTP proxy all probe traffic is sent through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyEndpoint {
    host: String,
    port: u16,
}

impl ProxyEndpoint {
    /// The loopback endpoint an instance's local http inbound listens on.
    pub fn local(port: i32) -> Result<Self, Error> {
        let port = u16::try_from(port).map_err(|_| {
            Error::new(ErrorKind::PingError).with_message(format!("invalid proxy port: {port}"))
        })?;
        Ok(Self {
            host: LOCAL_PROXY_HOST.to_string(),
            port,
        })
    }

    /// Parses `host:port`; IPv6 hosts use brackets.
    pub fn parse(authority: &str) -> Result<Self, Error> {
        let invalid = || {
            Error::new(ErrorKind::PingError)
                .with_message(format!("invalid proxy endpoint: {authority}"))
        };
        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Probes `target`, through `proxy` when given, and classifies the outcome.
pub fn probe(target: &str, proxy: Option<&ProxyEndpoint>) -> Response {
    let agent = match build_agent(proxy) {
        Ok(agent) => agent,
        Err(err) => return Response::from(&err),
    };

    let started = Instant::now();
    let outcome = agent.head(target).call();
    let elapsed = started.elapsed();

    let response = match outcome {
        Ok(resp) if resp.status() == 204 => Response::success(elapsed.as_millis().to_string()),
        Ok(resp) => {
            debug!(url = target, status = resp.status(), "probe got unexpected status");
            Response::from(&Error::new(ErrorKind::PingError).with_message(PING_RESPONSE_ERROR))
        }
        Err(ureq::Error::Status(code, _)) => {
            debug!(url = target, status = code, "probe got error status");
            Response::from(&Error::new(ErrorKind::PingError).with_message(PING_RESPONSE_ERROR))
        }
        Err(ureq::Error::Transport(err)) => {
            Response::from(&Error::new(ErrorKind::PingTimeout).with_message(err.to_string()))
        }
    };
    debug!(
        url = target,
        proxy = ?proxy,
        code = response.code(),
        "probe finished"
    );
    response
}

/// Port `0` probes directly; any other port goes through the local proxy on that port.
pub fn probe_port(port: i32, target: &str) -> Response {
    if port == 0 {
        return probe(target, None);
    }
    match ProxyEndpoint::local(port) {
        Ok(endpoint) => probe(target, Some(&endpoint)),
        Err(err) => Response::from(&err),
    }
}

/// Probes through an arbitrary `host:port` HTTP proxy; an empty endpoint probes directly.
pub fn probe_endpoint(endpoint: &str, target: &str) -> Response {
    if endpoint.is_empty() {
        return probe(target, None);
    }
    match ProxyEndpoint::parse(endpoint) {
        Ok(endpoint) => probe(target, Some(&endpoint)),
        Err(err) => Response::from(&err),
    }
}

fn build_agent(proxy: Option<&ProxyEndpoint>) -> Result<ureq::Agent, Error> {
    let mut builder = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(STALL_TIMEOUT)
        .max_idle_connections(0)
        .max_idle_connections_per_host(0)
        .redirects(0);
    if let Some(endpoint) = proxy {
        let proxy = ureq::Proxy::new(endpoint.url()).map_err(|err| {
            Error::new(ErrorKind::PingError)
                .with_message(format!("invalid proxy endpoint: {endpoint}"))
                .with_source(err)
        })?;
        builder = builder.proxy(proxy);
    }
    Ok(builder.build())
}
