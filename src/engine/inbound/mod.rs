// Builtin inbound protocols.
pub mod http;
pub mod socks;
