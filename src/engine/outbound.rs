// Builtin outbounds: `freedom` dials the destination directly, `blackhole` refuses.
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpStream;

use super::config::{OutboundConfig, parse_settings};
use super::dispatch::{BoxFuture, Destination, Host, OutboundHandler};
use crate::core::error::{Error, ErrorKind};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FreedomSettings {
    #[serde(default)]
    redirect: Option<String>,
}

pub struct Freedom {
    redirect: Option<Destination>,
}

pub fn freedom(config: &OutboundConfig) -> Result<Arc<dyn OutboundHandler>, Error> {
    let settings: FreedomSettings = parse_settings(&config.settings, "freedom outbound")?;
    let redirect = settings
        .redirect
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            Destination::parse_authority(raw, 0).map_err(|err| {
                Error::new(ErrorKind::EngineInit)
                    .with_message("invalid freedom redirect")
                    .with_source(err)
            })
        })
        .transpose()?;
    Ok(Arc::new(Freedom { redirect }))
}

impl OutboundHandler for Freedom {
    fn dial<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, io::Result<TcpStream>> {
        Box::pin(async move {
            let target = self.redirect.as_ref().unwrap_or(dest);
            let connect = async {
                match &target.host {
                    Host::Ip(ip) => TcpStream::connect((*ip, target.port)).await,
                    Host::Domain(domain) => {
                        TcpStream::connect((domain.as_str(), target.port)).await
                    }
                }
            };
            let stream = tokio::time::timeout(DIAL_TIMEOUT, connect)
                .await
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, format!("dial {target} timed out"))
                })??;
            let _ = stream.set_nodelay(true);
            Ok(stream)
        })
    }
}

pub struct Blackhole;

pub fn blackhole(config: &OutboundConfig) -> Result<Arc<dyn OutboundHandler>, Error> {
    let _: serde_json::Value = parse_settings(&config.settings, "blackhole outbound")?;
    Ok(Arc::new(Blackhole))
}

impl OutboundHandler for Blackhole {
    fn dial<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, io::Result<TcpStream>> {
        Box::pin(async move {
            Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{dest} blocked by blackhole outbound"),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{blackhole, freedom};
    use crate::core::error::ErrorKind;
    use crate::engine::config::OutboundConfig;
    use serde_json::json;

    fn config(protocol: &str, settings: Option<serde_json::Value>) -> OutboundConfig {
        OutboundConfig {
            tag: None,
            protocol: protocol.to_string(),
            settings,
        }
    }

    #[test]
    fn freedom_accepts_redirect_and_rejects_bad_settings() {
        assert!(freedom(&config("freedom", None)).is_ok());
        assert!(freedom(&config("freedom", Some(json!({"redirect": "127.0.0.1:53"})))).is_ok());

        let err = freedom(&config("freedom", Some(json!({"redirect": "nowhere:port"}))))
            .err()
            .expect("bad redirect");
        assert_eq!(err.kind(), ErrorKind::EngineInit);

        let err = freedom(&config("freedom", Some(json!({"redirect": 5}))))
            .err()
            .expect("bad type");
        assert_eq!(err.kind(), ErrorKind::EngineInit);
    }

    #[test]
    fn blackhole_refuses_connections() {
        let handler = blackhole(&config("blackhole", None)).expect("blackhole");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let dest = crate::engine::dispatch::Destination::parse_authority("example.test:80", 80)
            .expect("dest");
        let err = runtime
            .block_on(handler.dial(&dest))
            .err()
            .expect("refused");
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionRefused);
    }
}
