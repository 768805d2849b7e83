//! Purpose: SOCKS5 inbound supporting CONNECT with `noauth` or username/password auth.
//! Exports: `new`, `SocksInbound`.
//! Role: Local SOCKS entry point for applications routed through an instance.
//! Invariants: Only SOCKS version 5 and the CONNECT command are served.
//! Invariants: Password auth follows RFC 1929; failed auth closes the connection.
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, copy_bidirectional};
use tokio::net::TcpStream;

use crate::core::error::{Error, ErrorKind};
use crate::engine::config::{InboundConfig, parse_settings};
use crate::engine::dispatch::{BoxFuture, Destination, Host, InboundHandler, Session};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_PASSWORD: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_CONNECTION_REFUSED: u8 = 0x05;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocksSettings {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
    user: String,
    pass: String,
}

pub struct SocksInbound {
    accounts: Option<HashMap<String, String>>,
}

pub fn new(config: &InboundConfig) -> Result<Arc<dyn InboundHandler>, Error> {
    let settings: SocksSettings = parse_settings(&config.settings, "socks inbound")?;
    let accounts = match settings.auth.as_deref().unwrap_or("noauth") {
        "noauth" => None,
        "password" => {
            if settings.accounts.is_empty() {
                return Err(Error::new(ErrorKind::EngineInit)
                    .with_message("socks password auth requires at least one account"));
            }
            Some(
                settings
                    .accounts
                    .into_iter()
                    .map(|account| (account.user, account.pass))
                    .collect(),
            )
        }
        other => {
            return Err(Error::new(ErrorKind::EngineInit)
                .with_message(format!("unsupported socks auth: {other}")));
        }
    };
    Ok(Arc::new(SocksInbound { accounts }))
}

impl InboundHandler for SocksInbound {
    fn serve(
        self: Arc<Self>,
        stream: TcpStream,
        session: Session,
    ) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move { self.handle(stream, session).await })
    }
}

impl SocksInbound {
    async fn handle(&self, mut client: TcpStream, session: Session) -> io::Result<()> {
        self.negotiate(&mut client).await?;

        let mut header = [0u8; 3];
        client.read_exact(&mut header).await?;
        if header[0] != VERSION {
            return Err(invalid_data("unexpected socks version in request"));
        }
        let dest = match read_destination(&mut client).await {
            Ok(dest) => dest,
            Err(err) => {
                write_reply(&mut client, REPLY_ADDRESS_NOT_SUPPORTED).await?;
                return Err(err);
            }
        };
        if header[1] != CMD_CONNECT {
            write_reply(&mut client, REPLY_COMMAND_NOT_SUPPORTED).await?;
            return Err(invalid_data("only the socks CONNECT command is supported"));
        }

        let mut upstream = match session.dial(&dest).await {
            Ok(upstream) => upstream,
            Err(err) => {
                let reply = if err.kind() == io::ErrorKind::ConnectionRefused {
                    REPLY_CONNECTION_REFUSED
                } else {
                    REPLY_HOST_UNREACHABLE
                };
                write_reply(&mut client, reply).await?;
                return Err(err);
            }
        };
        write_reply(&mut client, REPLY_SUCCEEDED).await?;
        copy_bidirectional(&mut client, &mut upstream).await?;
        Ok(())
    }

    async fn negotiate(&self, client: &mut TcpStream) -> io::Result<()> {
        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await?;
        if greeting[0] != VERSION {
            return Err(invalid_data("unsupported socks version"));
        }
        let mut methods = vec![0u8; usize::from(greeting[1])];
        client.read_exact(&mut methods).await?;

        let wanted = if self.accounts.is_some() {
            METHOD_PASSWORD
        } else {
            METHOD_NO_AUTH
        };
        if !methods.contains(&wanted) {
            client.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
            return Err(invalid_data("no acceptable socks auth method"));
        }
        client.write_all(&[VERSION, wanted]).await?;

        if let Some(accounts) = &self.accounts {
            let mut version = [0u8; 1];
            client.read_exact(&mut version).await?;
            let user = read_short_string(client).await?;
            let pass = read_short_string(client).await?;
            let granted = accounts.get(&user).is_some_and(|expected| *expected == pass);
            client.write_all(&[0x01, if granted { 0x00 } else { 0x01 }]).await?;
            if !granted {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "socks authentication failed",
                ));
            }
        }
        Ok(())
    }
}

async fn read_destination<R>(reader: &mut R) -> io::Result<Destination>
where
    R: AsyncRead + Unpin,
{
    let atyp = reader.read_u8().await?;
    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            reader.read_exact(&mut octets).await?;
            Host::Ip(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            reader.read_exact(&mut octets).await?;
            Host::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        ATYP_DOMAIN => {
            let domain = read_short_string(reader).await?;
            if domain.is_empty() {
                return Err(invalid_data("empty socks domain"));
            }
            Host::Domain(domain.to_ascii_lowercase())
        }
        other => return Err(invalid_data(&format!("unknown socks address type {other}"))),
    };
    let port = reader.read_u16().await?;
    Ok(Destination::new(host, port))
}

async fn read_short_string<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u8().await?;
    let mut bytes = vec![0u8; usize::from(len)];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

async fn write_reply(client: &mut TcpStream, reply: u8) -> io::Result<()> {
    client
        .write_all(&[VERSION, reply, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

#[cfg(test)]
mod tests {
    use super::{new, read_destination};
    use crate::core::error::ErrorKind;
    use crate::engine::config::InboundConfig;
    use crate::engine::dispatch::{Destination, Host};
    use serde_json::json;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    fn config(settings: Option<serde_json::Value>) -> InboundConfig {
        InboundConfig {
            tag: None,
            protocol: "socks".to_string(),
            listen: None,
            port: 0,
            settings,
        }
    }

    #[test]
    fn reads_each_address_type() {
        let mut v4: &[u8] = &[0x01, 10, 0, 0, 1, 0x01, 0xbb];
        assert_eq!(
            block_on(read_destination(&mut v4)).expect("v4").to_string(),
            "10.0.0.1:443"
        );

        let mut domain: &[u8] = &[0x03, 4, b'A', b'.', b'i', b'o', 0x00, 0x50];
        assert_eq!(
            block_on(read_destination(&mut domain)).expect("domain"),
            Destination::new(Host::Domain("a.io".to_string()), 80)
        );

        let mut v6 = vec![0x04];
        v6.extend_from_slice(&[0; 15]);
        v6.push(1);
        v6.extend_from_slice(&[0x1f, 0x90]);
        let mut v6: &[u8] = &v6;
        assert_eq!(
            block_on(read_destination(&mut v6)).expect("v6").to_string(),
            "[::1]:8080"
        );

        let mut unknown: &[u8] = &[0x09, 0, 0];
        assert!(block_on(read_destination(&mut unknown)).is_err());
    }

    #[test]
    fn settings_validation() {
        assert!(new(&config(None)).is_ok());
        assert!(new(&config(Some(json!({"auth": "noauth", "udp": true})))).is_ok());
        let password = json!({"auth": "password", "accounts": [{"user": "u", "pass": "p"}]});
        assert!(new(&config(Some(password))).is_ok());

        for settings in [
            json!({"auth": "password"}),
            json!({"auth": "gssapi"}),
            json!({"accounts": "nope"}),
        ] {
            let err = new(&config(Some(settings))).err().expect("invalid settings");
            assert_eq!(err.kind(), ErrorKind::EngineInit);
        }
    }
}
