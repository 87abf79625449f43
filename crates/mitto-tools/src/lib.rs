// SPDX-License-Identifier: Apache-2.0
//! Generic tool abstraction shared by everything that exposes callable
//! tools: the meta-tool server and any future built-in tool.
//!
//! This crate defines only the shape (`Tool`, `ToolCall`, `ToolOutput`,
//! `ToolRegistry`) — concrete, session-aware implementations live in
//! `mitto-toolserver`, which depends on `mitto-core`.

pub mod registry;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolOutput};
