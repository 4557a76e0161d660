//! Report synthesis and rendering.

pub mod generator;
pub mod synthesizer;

pub use generator::{generate_json_report, generate_markdown_report};
pub use synthesizer::ReportSynthesizer;
