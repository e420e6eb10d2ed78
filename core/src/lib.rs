//! VDO Operations Core
//!
//! Shared library for the RPC-V operations backend: identity/token caching,
//! third-party API clients (vCenter, vCloud Director, Zamboni, CMS, Encore,
//! Watchman, Azure, GOSS), AWS-backed state stores, and the task handlers
//! that stitch them together.

pub mod aws;
pub mod clients;
pub mod config;
pub mod http;
pub mod secrets;
pub mod store;
pub mod tasks;
pub mod vsphere;
