//! Purpose: HTTP proxy inbound (CONNECT tunnels and absolute-form forwarding).
//! Exports: `new`, `HttpInbound`.
//! Role: Lets plain HTTP clients, including the connectivity probe, route through an instance.
//! Invariants: Forwarded requests are rewritten to origin-form with `Connection: close`.
//! Invariants: Request heads larger than `MAX_HEAD_BYTES` are rejected.
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, copy_bidirectional};
use tokio::net::TcpStream;
use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::engine::config::{InboundConfig, parse_settings};
use crate::engine::dispatch::{BoxFuture, Destination, InboundHandler, Session};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpSettings {
    /// Seconds allowed for the client to send its request head.
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

pub struct HttpInbound {
    head_timeout: Duration,
}

pub fn new(config: &InboundConfig) -> Result<Arc<dyn InboundHandler>, Error> {
    let settings: HttpSettings = parse_settings(&config.settings, "http inbound")?;
    if settings.timeout == 0 {
        return Err(
            Error::new(ErrorKind::EngineInit).with_message("http inbound timeout must be positive")
        );
    }
    Ok(Arc::new(HttpInbound {
        head_timeout: Duration::from_secs(settings.timeout),
    }))
}

impl InboundHandler for HttpInbound {
    fn serve(
        self: Arc<Self>,
        stream: TcpStream,
        session: Session,
    ) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move { self.handle(stream, session).await })
    }
}

impl HttpInbound {
    async fn handle(&self, mut client: TcpStream, session: Session) -> io::Result<()> {
        let (head, rest) = tokio::time::timeout(self.head_timeout, read_head(&mut client))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request head timed out"))??;
        let request = match RequestHead::parse(&head) {
            Ok(request) => request,
            Err(err) => {
                client.write_all(BAD_REQUEST).await?;
                return Err(err);
            }
        };

        if request.method.eq_ignore_ascii_case("CONNECT") {
            let dest = match Destination::parse_authority(&request.target, 443) {
                Ok(dest) => dest,
                Err(err) => {
                    client.write_all(BAD_REQUEST).await?;
                    return Err(err);
                }
            };
            let mut upstream = match session.dial(&dest).await {
                Ok(upstream) => upstream,
                Err(err) => {
                    client.write_all(BAD_GATEWAY).await?;
                    return Err(err);
                }
            };
            client.write_all(CONNECT_ESTABLISHED).await?;
            if !rest.is_empty() {
                upstream.write_all(&rest).await?;
            }
            copy_bidirectional(&mut client, &mut upstream).await?;
            return Ok(());
        }

        let (dest, forwarded) = match request.to_origin_form() {
            Ok(parts) => parts,
            Err(err) => {
                client.write_all(BAD_REQUEST).await?;
                return Err(err);
            }
        };
        let mut upstream = match session.dial(&dest).await {
            Ok(upstream) => upstream,
            Err(err) => {
                client.write_all(BAD_GATEWAY).await?;
                return Err(err);
            }
        };
        upstream.write_all(forwarded.as_bytes()).await?;
        if !rest.is_empty() {
            upstream.write_all(&rest).await?;
        }
        copy_bidirectional(&mut client, &mut upstream).await?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct RequestHead {
    method: String,
    target: String,
    version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn parse(head: &[u8]) -> io::Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mut lines = text.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid_data("malformed request line"));
        };
        if !version.starts_with("HTTP/") {
            return Err(invalid_data("malformed http version"));
        }

        let mut headers = Vec::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| invalid_data("malformed header line"))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    fn to_origin_form(&self) -> io::Result<(Destination, String)> {
        let url = Url::parse(&self.target)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        if url.scheme() != "http" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported proxy scheme: {}", url.scheme()),
            ));
        }
        let host = url.host_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "request target has no host")
        })?;
        let port = url.port_or_known_default().unwrap_or(80);
        let dest = Destination::parse_authority(&format!("{host}:{port}"), 80)?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let mut out = format!("{} {} {}\r\n", self.method, path, self.version);
        let mut has_host = false;
        for (name, value) in &self.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            has_host |= name.eq_ignore_ascii_case("host");
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        if !has_host {
            out.push_str("Host: ");
            out.push_str(host);
            if url.port().is_some() {
                out.push_str(&format!(":{port}"));
            }
            out.push_str("\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");
        Ok((dest, out))
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    ["connection", "proxy-connection", "proxy-authorization", "keep-alive"]
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Reads up to the blank line ending the head; returns the head and any bytes after it.
async fn read_head<R>(reader: &mut R) -> io::Result<(Vec<u8>, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request head",
            ));
        }
        let scan_from = buf.len().saturating_sub(3);
        buf.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buf[scan_from..].windows(4).position(|window| window == b"\r\n\r\n") {
            let rest = buf.split_off(scan_from + pos + 4);
            return Ok((buf, rest));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(invalid_data("request head too large"));
        }
    }
}
