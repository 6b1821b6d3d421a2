//! Install and deploy: the write side of the shared local cache.
//!
//! Both operations run under the same exclusive sync context the resolvers
//! use, so concurrent resolutions of the coordinates being written either
//! wait or observe the completed installation.

pub mod deployer;
pub mod error;
pub mod installer;

pub use deployer::Deployer;
pub use error::{DeployError, InstallError};
pub use installer::Installer;
