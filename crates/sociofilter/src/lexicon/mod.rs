//! Local denylist matching.
//!
//! The lexicon is the fast path of the pipeline: a fixed list of terms that
//! are always considered explicit and are masked without asking the remote
//! classifier.
//!
//! - **Whole words only**: terms match case-insensitively between word
//!   boundaries, so `explicit` masks "Explicit!" but not "inexplicit".
//! - **Equal-length masks**: every matched character becomes one mask
//!   character, so layout is preserved and masking is idempotent.
//! - **List order wins**: terms are applied in order; a span already masked
//!   by an earlier term cannot match a later one.
//!
//! # Example
//!
//! ```
//! use sociofilter::lexicon::Lexicon;
//!
//! let lexicon = Lexicon::builtin();
//! assert_eq!(lexicon.mask("this is an explicit test"), "this is an ******** test");
//! ```

mod matcher;
mod terms;

pub use matcher::{mask_terms, Lexicon, LexiconTerm, DEFAULT_MASK};
pub use terms::{builtin_terms, extended_terms};
