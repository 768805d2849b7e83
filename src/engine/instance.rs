//! Purpose: A runnable engine instance: handlers, dispatcher, and its own tokio runtime.
//! Exports: `Instance`.
//! Role: Final two stages of the build pipeline (instantiate, start) plus teardown.
//! Invariants: `start` either binds every inbound or leaves nothing listening.
//! Invariants: `close` is idempotent and also runs on drop; a closed instance cannot restart.
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::Engine;
use super::dispatch::{Dispatcher, InboundHandler, Session};
use super::plan::RunnableConfig;
use crate::core::error::{Error, ErrorKind};

const WORKER_THREADS: usize = 2;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct BoundInbound {
    tag: Option<String>,
    listen: SocketAddr,
    handler: Arc<dyn InboundHandler>,
}

pub struct Instance {
    inbounds: Vec<BoundInbound>,
    dispatcher: Arc<Dispatcher>,
    runtime: Option<Runtime>,
    running: Arc<AtomicBool>,
    local_addrs: Vec<SocketAddr>,
}

impl Instance {
    pub fn new(config: RunnableConfig) -> Result<Self, Error> {
        let mut inbounds = Vec::with_capacity(config.inbounds.len());
        for plan in &config.inbounds {
            inbounds.push(BoundInbound {
                tag: plan.tag.clone(),
                listen: plan.listen,
                handler: (plan.ctor)(&plan.config)?,
            });
        }

        let mut outbounds = Vec::with_capacity(config.outbounds.len());
        for plan in &config.outbounds {
            outbounds.push((plan.tag.clone(), (plan.ctor)(&plan.config)?));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("xray-engine")
            .enable_all()
            .build()
            .map_err(|err| {
                Error::new(ErrorKind::EngineInit)
                    .with_message("failed to create engine runtime")
                    .with_source(err)
            })?;

        Ok(Self {
            inbounds,
            dispatcher: Arc::new(Dispatcher::new(outbounds, config.rules)),
            runtime: Some(runtime),
            running: Arc::new(AtomicBool::new(false)),
            local_addrs: Vec::new(),
        })
    }

    /// Addresses the inbounds actually bound, in config order. Empty until started.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    fn bind_all(&self) -> Result<Vec<std::net::TcpListener>, Error> {
        self.inbounds
            .iter()
            .map(|inbound| {
                let listener = std::net::TcpListener::bind(inbound.listen).map_err(|err| {
                    Error::new(ErrorKind::EngineStart)
                        .with_message(format!("failed to listen on {}", inbound.listen))
                        .with_source(err)
                })?;
                listener.set_nonblocking(true).map_err(|err| {
                    Error::new(ErrorKind::EngineStart)
                        .with_message("failed to configure listener")
                        .with_source(err)
                })?;
                Ok(listener)
            })
            .collect()
    }
}

impl Engine for Instance {
    fn start(&mut self) -> Result<(), Error> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(Error::new(ErrorKind::EngineStart).with_message("instance is closed"));
        };

        let listeners = self.bind_all()?;
        let _guard = runtime.enter();
        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut accepted = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let listener = TcpListener::from_std(listener).map_err(|err| {
                Error::new(ErrorKind::EngineStart)
                    .with_message("failed to register listener")
                    .with_source(err)
            })?;
            let addr = listener.local_addr().map_err(|err| {
                Error::new(ErrorKind::EngineStart)
                    .with_message("failed to read listener address")
                    .with_source(err)
            })?;
            local_addrs.push(addr);
            accepted.push(listener);
        }

        for (listener, inbound) in accepted.into_iter().zip(&self.inbounds) {
            runtime.spawn(accept_loop(
                listener,
                inbound.tag.clone(),
                Arc::clone(&inbound.handler),
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.running),
            ));
        }

        self.local_addrs = local_addrs;
        self.running.store(true, Ordering::SeqCst);
        info!(inbounds = self.local_addrs.len(), "engine started");
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            self.local_addrs.clear();
            info!("engine closed");
        }
    }

    fn is_running(&self) -> bool {
        self.runtime.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tag: Option<String>,
    handler: Arc<dyn InboundHandler>,
    dispatcher: Arc<Dispatcher>,
    running: Arc<AtomicBool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                let session = Session {
                    inbound_tag: tag.clone(),
                    peer,
                    dispatcher: Arc::clone(&dispatcher),
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(err) = handler.serve(stream, session).await {
                        debug!(peer = %peer, error = %err, "inbound connection ended with error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Instance;
    use crate::core::error::ErrorKind;
    use crate::engine::Engine;
    use crate::engine::config::parse_config;
    use crate::engine::plan::build_config;
    use crate::engine::registry::global_registry;

    fn instance(text: &str) -> Instance {
        let plan =
            build_config(parse_config(text).expect("parse"), global_registry()).expect("build");
        Instance::new(plan).expect("instance")
    }

    #[test]
    fn start_binds_and_close_releases() {
        let mut engine = instance(
            r#"{"inbounds": [{"protocol": "http", "listen": "127.0.0.1", "port": 0}],
                "outbounds": [{"protocol": "freedom"}]}"#,
        );
        assert!(!engine.is_running());
        assert!(engine.local_addrs().is_empty());

        engine.start().expect("start");
        assert!(engine.is_running());
        let addr = engine.local_addrs()[0];
        assert_ne!(addr.port(), 0);
        assert!(std::net::TcpStream::connect(addr).is_ok());

        engine.close();
        assert!(!engine.is_running());
        engine.close();
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[test]
    fn bind_conflict_is_a_start_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = taken.local_addr().expect("addr").port();
        let mut engine = instance(&format!(
            r#"{{"inbounds": [{{"protocol": "socks", "listen": "127.0.0.1", "port": {port}}}]}}"#
        ));
        let err = engine.start().expect_err("port in use");
        assert_eq!(err.kind(), ErrorKind::EngineStart);
        assert!(!engine.is_running());
    }

    #[test]
    fn closed_instance_cannot_restart() {
        let mut engine = instance("{}");
        engine.start().expect("start");
        engine.close();
        let err = engine.start().expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::EngineStart);
    }

    #[test]
    fn invalid_settings_fail_instantiation() {
        let text = r#"{"inbounds": [
            {"protocol": "socks", "port": 0, "settings": {"auth": "password"}}
        ]}"#;
        let plan = build_config(parse_config(text).expect("parse"), global_registry())
            .expect("build");
        let err = Instance::new(plan).err().expect("init error");
        assert_eq!(err.kind(), ErrorKind::EngineInit);
    }
}
