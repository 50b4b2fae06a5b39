//! Lexical side of VulnLens: language profiles and the line tagger.
//!
//! A [`LanguageProfile`] bundles the comment rules used to normalize a
//! snippet with the ordered pattern table used to tag it. Tables ship as TOML
//! under `patterns/` and are compiled in; [`ProfileSet::load`] can replace any
//! of them from a directory at runtime.
//!
//! ```rust
//! use vulnlens_common::Language;
//! use vulnlens_rules::ProfileSet;
//!
//! let profiles = ProfileSet::builtin().unwrap();
//! let python = profiles.get(Language::Python).unwrap();
//! let matches = python.scan("import os\nos.system(cmd)  # run it");
//! assert_eq!(matches[0].category, "Command Injection");
//! ```

pub mod normalize;
pub mod profile;
pub mod tagger;

pub use normalize::{CommentRules, Normalizer};
pub use profile::{LanguageProfile, ProfileSet};
pub use tagger::{tag, PatternRule, PatternTable};
