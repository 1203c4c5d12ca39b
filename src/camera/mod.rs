// Camera domain: discovery, format negotiation, and platform backends.

pub mod backend;
pub mod commands;
pub mod dummy;
pub mod error;
pub mod negotiate;
pub mod platform;
pub mod types;
