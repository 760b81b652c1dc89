//! Atomic types of the sem/SIR toolchain.
//!
//! Three closed string vocabularies (normalized builtin types, semantic
//! operator ids, Stage-4 intrinsic node kinds), the numeric zABI error
//! taxonomy, and the flag bitsets shared by the runtime and the frontend.
//! Every vocabulary is a fixed bijection between a small enum and its
//! canonical spelling; unknown words are always an error, never a fallback.

#![warn(missing_docs)]
#![deny(unused_must_use)]

#[macro_use]
mod macros;

mod flags;
mod intrinsic;
mod op;
mod types;
mod zabi;

pub use flags::{CapFlags, FileOpenFlags, HandleFlags};
pub use intrinsic::Intrinsic;
pub use op::OpId;
pub use types::TypeId;
pub use zabi::{ZiError, ABI_VERSION};

/// A word that is not part of a closed vocabulary.
///
/// Carried by `FromStr` impls of the vocabulary enums so diagnostics can
/// name both the offending word and the vocabulary it failed against.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {vocab} word: {word:?}")]
pub struct UnknownWord {
    /// The rejected input.
    pub word: String,
    /// Name of the vocabulary that rejected it.
    pub vocab: &'static str,
}
