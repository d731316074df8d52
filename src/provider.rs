//! Platform-facing descriptor data.
//!
//! `descriptor` exposes validated metadata ([`ProviderDescriptor`]) covering the token,
//! location-token, installed-locations, and custom-menu endpoints plus the API version header
//! value every call carries.

pub mod descriptor;

pub use descriptor::*;
