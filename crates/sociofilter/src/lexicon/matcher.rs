//! Denylist matcher.
//!
//! Each term is compiled once into its own case-insensitive, word-bounded
//! regex. Matching is O(terms × content length), which is fine for the small
//! fixed lists the pipeline uses.

use regex::{Captures, Regex};
use tracing::{trace, warn};

use super::terms::{builtin_terms, extended_terms};
use crate::error::{Error, Result};

/// Character used to mask matched terms.
pub const DEFAULT_MASK: char = '*';

/// A compiled denylist term.
#[derive(Debug, Clone)]
pub struct LexiconTerm {
    /// The term as configured.
    term: String,
    /// Word-bounded, case-insensitive regex for the term.
    regex: Regex,
}

impl LexiconTerm {
    /// Compile a term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] if the term is blank.
    pub fn new(term: &str) -> Result<Self> {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidTerm {
                term: term.to_string(),
                message: "term is blank".to_string(),
            });
        }

        let pattern = format!(r"(?i)\b{}\b", regex::escape(trimmed));
        let regex = Regex::new(&pattern).map_err(|e| Error::InvalidTerm {
            term: term.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            term: trimmed.to_string(),
            regex,
        })
    }

    /// The term text.
    #[must_use]
    pub fn term(&self) -> &str {
        &self.term
    }

    /// Check if the term occurs in the content as a whole word.
    #[must_use]
    pub fn matches(&self, content: &str) -> bool {
        self.regex.is_match(content)
    }

    /// Replace every occurrence with an equal-length run of `mask`.
    #[must_use]
    pub fn mask(&self, content: &str, mask: char) -> String {
        self.regex
            .replace_all(content, |caps: &Captures<'_>| {
                std::iter::repeat(mask)
                    .take(caps[0].chars().count())
                    .collect::<String>()
            })
            .into_owned()
    }
}

/// An ordered denylist.
#[derive(Debug, Clone)]
pub struct Lexicon {
    terms: Vec<LexiconTerm>,
    mask: char,
}

impl Lexicon {
    /// Build a lexicon from terms, rejecting any invalid one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTerm`] for the first term that fails to compile.
    pub fn new<I, S>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| LexiconTerm::new(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            terms,
            mask: DEFAULT_MASK,
        })
    }

    /// Build a lexicon, skipping (and logging) terms that fail to compile.
    #[must_use]
    pub fn lenient<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .filter_map(|t| match LexiconTerm::new(t.as_ref()) {
                Ok(term) => Some(term),
                Err(e) => {
                    warn!(term = %t.as_ref(), error = %e, "Skipping invalid denylist term");
                    None
                }
            })
            .collect();
        Self {
            terms,
            mask: DEFAULT_MASK,
        }
    }

    /// The base denylist.
    #[must_use]
    pub fn builtin() -> Self {
        Self::lenient(builtin_terms())
    }

    /// The extended denylist used when no remote classifier is configured.
    #[must_use]
    pub fn extended() -> Self {
        Self::lenient(extended_terms())
    }

    /// Use a different mask character.
    #[must_use]
    pub fn with_mask(mut self, mask: char) -> Self {
        self.mask = mask;
        self
    }

    /// Append terms after the existing ones, skipping invalid terms.
    #[must_use]
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.terms.extend(Self::lenient(terms).terms);
        self
    }

    /// The mask character.
    #[must_use]
    pub fn mask_char(&self) -> char {
        self.mask
    }

    /// Number of terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the lexicon has no terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterate over the term texts in order.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(LexiconTerm::term)
    }

    /// Mask every denylisted word in `content`.
    ///
    /// The result equals the input iff no term matched.
    #[must_use]
    pub fn mask(&self, content: &str) -> String {
        let mut result = content.to_string();
        for term in &self.terms {
            if term.matches(&result) {
                result = term.mask(&result, self.mask);
                trace!(term = %term.term, "Masked denylist term");
            }
        }
        result
    }

    /// Terms that occur in `content`, in list order.
    #[must_use]
    pub fn matched_terms(&self, content: &str) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|t| t.matches(content))
            .map(LexiconTerm::term)
            .collect()
    }

    /// Whether no term occurs in `content`.
    #[must_use]
    pub fn is_clean(&self, content: &str) -> bool {
        !self.terms.iter().any(|t| t.matches(content))
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Mask ad-hoc terms, such as those named by a remote verdict.
///
/// Blank or invalid terms are ignored.
#[must_use]
pub fn mask_terms<S: AsRef<str>>(content: &str, terms: &[S], mask: char) -> String {
    Lexicon::lenient(terms).with_mask(mask).mask(content)
}
