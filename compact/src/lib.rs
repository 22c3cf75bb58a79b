//! Offline block rewriter.
//!
//! [`Compactor::write_series`] merge-sorts the series of N block readers,
//! runs them through a pipeline of [`Modifier`]s (deletion being the
//! canonical one), and writes a new immutable block (symbols, index,
//! chunks, tombstones), recording every modification in an append-only
//! [`ChangeLog`]. A dry-run mode produces the stats and the change log
//! without any disk output.

mod changelog;
mod compactor;
pub mod config;
mod error;
mod modifiers;

pub use changelog::{ChangeLog, ChangeLogger, ProgressLogger, SeriesProgressLogger};
pub use compactor::{Compactor, compacted_meta};
pub use config::{RewriteConfig, load_config};
pub use error::{Error, Result};
pub use modifiers::{DeletionModifier, DeletionRequest, Modifier};
