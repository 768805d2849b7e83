//! Purpose: Native control surface for local proxy engine instances.
//! Exports: `api` (host operations), `abi` (C exports), engine, lifecycle, probe and key helpers.
//! Role: Library behind `libxray_bridge` and the `xray-bridge` CLI.
//! Invariants: Every host-visible outcome is a `code|message` response.
//! Invariants: Lifecycle state lives only in `api::manager()`; nothing persists across restarts.
pub mod abi;
pub mod api;
pub mod core;
pub mod engine;
pub mod keygen;
pub mod lifecycle;
pub mod logging;
pub mod probe;
