//! addontrace CLI - traces software added to container images outside of
//! package managers.

pub mod commands;
