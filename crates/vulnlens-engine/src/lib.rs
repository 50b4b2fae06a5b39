//! VulnLens analysis engine.
//!
//! Flags potentially unsafe constructs in Python, PHP, JavaScript and Java
//! snippets by combining a lexical pattern scan with a per-language random
//! forest over CodeBERT embeddings.
//!
//! # Example
//! ```rust,no_run
//! use vulnlens_engine::{Engine, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::from_settings(&Settings::load()?).await?;
//!     let result = engine.analyze("python", "import os\nos.system(cmd)").await?;
//!     for m in &result.matches {
//!         println!("{}: {}", m.category, m.line);
//!     }
//!     println!("verdict: {:?}", result.prediction);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;

pub use config::Settings;
pub use engine::{Engine, EngineBuilder};
