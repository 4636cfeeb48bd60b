//! Browser-based rendering backend.
//!
//! Proposal content is assembled into a standalone HTML document and printed
//! to PDF by a headless browser. One browser process is started and kept
//! running; its tabs are leased from a bounded [`PagePool`] and reused
//! across renders.

mod cdp;
mod chromium;
mod engine;
mod pool;
mod renderer;

pub use chromium::{ChromiumEngine, ChromiumPage};
pub use engine::BrowserEngine;
pub use pool::{PageLease, PagePool};
pub use renderer::BrowserRenderer;
