//! Clients for the third-party services the backend automates.

pub mod azure;
pub mod cms;
pub mod encore;
pub mod goss;
pub mod identity;
pub mod janus;
pub mod vcenter;
pub mod vcloud;
pub mod watchman;
pub mod zamboni;
