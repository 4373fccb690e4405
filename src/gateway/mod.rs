//! Gateway composition: builder and request orchestration

mod builder;
mod orchestrator;

pub use builder::{Atelier, AtelierBuilder};
pub use orchestrator::{Gateway, ProviderListing};
