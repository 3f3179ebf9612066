//! Command modules for the toolpin CLI.
//!
//! ## Toolchain Commands
//!
//! - [`install`] - Resolve and install the project's toolchain
//! - [`use_path`] - Use an existing executable
//! - [`current`] - Show the active toolchain
//! - [`list`] - List installed toolchains
//! - [`uninstall`] - Remove an installed toolchain
//!
//! ## Diagnostics
//!
//! - [`resolve`] - Show the version requirement and its source
//! - [`verify`] - Check a minisign signature

pub mod current;
pub mod install;
pub mod list;
pub mod resolve;
pub mod uninstall;
pub mod use_path;
pub mod verify;
