//! opshub-mcp: MCP client/server core for AI-assisted operations platforms
//!
//! This library is the Model Context Protocol engine of an operations
//! platform: it discovers and invokes tools on external MCP servers,
//! and simultaneously serves the platform's own tool registry to MCP
//! clients over stdio.
//!
//! # Architecture
//!
//! ```text
//! outbound:  caller ─▶ registry ─▶ bridge ─▶ pool ─▶ client ─▶ session
//!                                                               │
//!                                                          transport ─▶ spawned server
//!
//! inbound:   remote client ─▶ stdio ─▶ server loop ─▶ router ─▶ registry
//! ```
//!
//! Remote tool catalogues are imported into the local [`registry`]
//! under the reserved `mcp:<server>:<tool>` namespace, so callers see
//! one unified catalogue regardless of where a tool runs.
//!
//! # Modules
//!
//! - [`bridge`] — imports remote catalogues into the registry
//! - [`client`] — per-server client façade and the connection pool
//! - [`config`] — configuration loading and validation
//! - [`protocol`] — JSON-RPC 2.0 framing and MCP wire types
//! - [`registry`] — the process-local tool registry
//! - [`server`] — the serving side: request loop and method router
//! - [`session`] — request/response correlation over one transport
//! - [`transport`] — newline-framed stdio to spawned subprocesses

pub mod bridge;
pub mod client;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
