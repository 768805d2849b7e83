//! Purpose: `xray-bridge` CLI entry point over the host API.
//! Role: Binary crate root; parses args, runs one operation, prints its response line.
//! Invariants: Every command prints exactly one `code|message` line per operation on stdout.
//! Invariants: Process exit code is 0 on success, otherwise the response code capped to 255.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;

use xray_bridge::api::{
    self, CertificateOptions, DEFAULT_PROBE_URL, Error, ErrorKind, KeyAlgorithm, Response,
    to_response_code,
};
use xray_bridge::logging;

const RUN_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(
    name = "xray-bridge",
    version,
    about = "Start, stop and health-check local proxy engine instances",
    after_help = r#"EXAMPLES
  $ xray-bridge run --config config.json
  $ xray-bridge test-config --config config.json --port 10809
  $ xray-bridge ping --port 10809
  $ xray-bridge keygen x25519
  $ xray-bridge mlkem768
  $ xray-bridge cert --domain example.com --expire-hours 720

Every command prints one `code|message` line; code 0 means success."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = logging::DEFAULT_DIRECTIVE,
        help = "Log filter used when RUST_LOG is unset (e.g. info, debug)"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Start an instance and keep it running until SIGINT/SIGTERM")]
    Run {
        #[arg(long, short, value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
    #[command(about = "Probe a URL directly, or through a local proxy port")]
    Ping {
        #[arg(
            long,
            default_value_t = 0,
            allow_negative_numbers = true,
            conflicts_with = "proxy",
            help = "Local proxy port; 0 probes directly"
        )]
        port: i32,
        #[arg(long, help = "HTTP proxy as host:port, instead of a local port")]
        proxy: Option<String>,
        #[arg(long, default_value = DEFAULT_PROBE_URL)]
        url: String,
    },
    #[command(about = "Start a throwaway instance, probe through it, then close it")]
    TestConfig {
        #[arg(long, short, value_hint = ValueHint::FilePath)]
        config: PathBuf,
        #[arg(
            long,
            allow_negative_numbers = true,
            help = "Port of the config's local http inbound"
        )]
        port: i32,
        #[arg(long, default_value = DEFAULT_PROBE_URL)]
        url: String,
    },
    #[command(about = "Generate an X25519 key pair: private|public|hash")]
    Keygen {
        #[arg(value_enum)]
        algorithm: KeyKind,
        #[arg(long, default_value = "", help = "Base64 private key to derive from")]
        seed: String,
    },
    #[command(about = "Generate an ML-DSA-65 key: seed|verify_key")]
    Mldsa65 {
        #[arg(long, default_value = "", help = "Base64url 32-byte seed to derive from")]
        seed: String,
    },
    #[command(about = "Generate an ML-KEM-768 key: seed|client|hash")]
    Mlkem768 {
        #[arg(long, default_value = "", help = "Base64url 64-byte seed to derive from")]
        seed: String,
    },
    #[command(about = "Generate VLESS encryption pairs for X25519 and ML-KEM-768 auth")]
    VlessEnc,
    #[command(about = "Generate a UUID (random, or v5 from a short name)")]
    Uuid {
        #[arg(default_value = "")]
        input: String,
    },
    #[command(about = "Generate a self-signed certificate: cert_pem|key_pem")]
    Cert {
        #[arg(long = "domain", help = "DNS name or IP address (repeatable)")]
        domains: Vec<String>,
        #[arg(long)]
        common_name: Option<String>,
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        ca: bool,
        #[arg(long, help = "Validity in hours (default: 90 days)")]
        expire_hours: Option<u32>,
    },
    #[command(about = "Chained SHA-256 of a PEM certificate chain (text or file path)")]
    CertHash {
        #[arg(value_hint = ValueHint::FilePath)]
        input: String,
    },
    #[command(about = "Print the engine version")]
    Version,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KeyKind {
    X25519,
    Wg,
}

impl From<KeyKind> for KeyAlgorithm {
    fn from(kind: KeyKind) -> Self {
        match kind {
            KeyKind::X25519 => KeyAlgorithm::X25519,
            KeyKind::Wg => KeyAlgorithm::X25519Wg,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let exit_code = match err.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => 0,
                _ => to_response_code(ErrorKind::Usage),
            };
            std::process::exit(exit_code);
        }
    };
    logging::init_tracing(&cli.log_level);

    let response = run(cli.command);
    api::shutdown();
    std::process::exit(exit_code(&response));
}

fn run(command: Command) -> Response {
    match command {
        Command::Run { config } => match read_config(&config) {
            Ok(text) => run_until_signalled(&text),
            Err(err) => emit(Response::from(&err)),
        },
        Command::Ping { port, proxy, url } => match proxy {
            Some(endpoint) => emit(api::ping_via(&endpoint, &url)),
            None => emit(api::ping(port, &url)),
        },
        Command::TestConfig { config, port, url } => match read_config(&config) {
            Ok(text) => emit(api::test_config(&text, port, &url)),
            Err(err) => emit(Response::from(&err)),
        },
        Command::Keygen { algorithm, seed } => emit(api::generate_key(algorithm.into(), &seed)),
        Command::Mldsa65 { seed } => emit(api::generate_mldsa65(&seed)),
        Command::Mlkem768 { seed } => emit(api::generate_mlkem768(&seed)),
        Command::VlessEnc => emit(api::generate_vless_encryption()),
        Command::Uuid { input } => emit(api::generate_uuid(&input)),
        Command::Cert {
            domains,
            common_name,
            organization,
            ca,
            expire_hours,
        } => emit(api::generate_certificate(&CertificateOptions {
            domains,
            common_name,
            organization,
            is_ca: ca,
            expire_hours,
        })),
        Command::CertHash { input } => emit(api::cert_chain_hash(&input)),
        Command::Version => {
            println!("{}", api::engine_version());
            Response::success(api::engine_version())
        }
    }
}

fn run_until_signalled(config: &str) -> Response {
    let started = emit(api::start_server(config));
    if !started.is_success() {
        return started;
    }

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
            api::stop_server();
            return emit(Response::from(
                &Error::new(ErrorKind::Usage)
                    .with_message("failed to install signal handler")
                    .with_source(err),
            ));
        }
    }

    while !stop.load(Ordering::Relaxed) && api::is_server_started() {
        std::thread::sleep(RUN_POLL_INTERVAL);
    }
    if !stop.load(Ordering::Relaxed) {
        info!("engine stopped running; shutting down");
    }
    emit(api::stop_server())
}

fn read_config(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("failed to read config file {}", path.display()))
            .with_source(err)
    })
}

fn emit(response: Response) -> Response {
    println!("{response}");
    response
}

fn exit_code(response: &Response) -> i32 {
    if response.is_success() {
        0
    } else {
        response.code().clamp(1, 255)
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, KeyKind, exit_code};
    use clap::{CommandFactory, Parser};
    use xray_bridge::api::Response;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes_follow_response_codes() {
        assert_eq!(exit_code(&Response::success("ok")), 0);
        assert_eq!(exit_code(&Response::new(101, "Ping response error")), 101);
        assert_eq!(exit_code(&Response::new(203, "bad pem")), 203);
        assert_eq!(exit_code(&Response::new(-1, "undecodable")), 1);
        assert_eq!(exit_code(&Response::new(4000, "huge")), 255);
    }

    #[test]
    fn parses_keygen_and_ping() {
        let cli =
            Cli::try_parse_from(["xray-bridge", "keygen", "wg", "--seed", "abc"]).expect("keygen");
        assert!(matches!(
            cli.command,
            Command::Keygen { algorithm: KeyKind::Wg, ref seed } if seed == "abc"
        ));

        let cli = Cli::try_parse_from(["xray-bridge", "ping"]).expect("ping");
        match cli.command {
            Command::Ping { port, proxy, url } => {
                assert_eq!(port, 0);
                assert!(proxy.is_none());
                assert_eq!(url, "https://www.gstatic.com/generate_204");
            }
            _ => panic!("expected ping"),
        }

        let cli = Cli::try_parse_from(["xray-bridge", "ping", "--proxy", "10.0.0.1:3128"])
            .expect("ping via proxy");
        assert!(matches!(
            cli.command,
            Command::Ping { proxy: Some(ref endpoint), .. } if endpoint == "10.0.0.1:3128"
        ));
        assert!(
            Cli::try_parse_from(["xray-bridge", "ping", "--port", "1080", "--proxy", "a:1"])
                .is_err()
        );
    }
}
