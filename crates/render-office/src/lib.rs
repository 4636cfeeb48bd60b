//! Office-suite rendering backend.
//!
//! Proposal content is first written out as a word-processing document by a
//! [`DocumentBuilder`], then converted with the office suite's headless
//! command line (`soffice --convert-to pdf`). Fast and text-oriented; charts
//! and diagrams are reduced to captions.

mod builder;
mod docx;
mod renderer;

pub use builder::DocumentBuilder;
pub use docx::DocxBuilder;
pub use renderer::OfficeRenderer;
