//! Core rendering abstractions for PDF generation.
//!
//! This crate provides the contract every rendering backend implements:
//! - `Renderer` trait: content + options in, PDF file out
//! - `RenderError`, which classifies failures for the retry policy
//! - `with_timeout` for the hard wall-clock limit on every render
//! - `OutputDir` for collision-free per-invocation output paths
//! - `PageSetup` and HTML helpers shared by the adapters

mod error;
pub mod html;
mod output;
mod page;
mod timeout;
mod traits;

pub use error::RenderError;
pub use output::{OutputDir, RenderedPdf};
pub use page::PageSetup;
pub use timeout::with_timeout;
pub use traits::{Renderer, SharedRenderer};
