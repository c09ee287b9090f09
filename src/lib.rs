//! copilot-bridge: Microsoft Security Copilot and Sentinel as MCP tools
//!
//! A single MCP server exposing four tools:
//! - `run_sentinel_query`: KQL query against a Log Analytics workspace
//! - `get_skillsets`: list Security Copilot skillsets and their skills
//! - `upload_plugin`: create or update a skillset from YAML
//! - `run_prompt`: session → prompt → evaluation → poll, as one call

pub mod auth;
pub mod config;
pub mod context;
pub mod copilot;
pub mod core;
mod http;
pub mod mcp;
pub mod selftest;
pub mod sentinel;

pub use context::BridgeContext;
pub use crate::core::{BridgeError, ErrorKind, Result};
pub use mcp::BridgeServer;
