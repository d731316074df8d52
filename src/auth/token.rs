//! Credential bundles and the secrets they carry.

pub mod bundle;
pub mod secret;
