//! Core domain types for Stencil.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the validation server.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod failure;
pub mod settings;

pub use diagnostic::{Diagnostic, Position, Range, Severity, Stage};
pub use failure::{DescriptorKind, DescriptorPos, Failure, FailureLocation, SourcePos};
pub use settings::{
    CacheSettings, CacheSettingsError, LayoutError, PackageLayout, SessionSettings, SourceKind,
};
