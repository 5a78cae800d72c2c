//! Built-in denylist terms.
//!
//! Two lists ship with the crate: the base list applied to every text unit
//! and the extended list used as a local stand-in for the remote classifier
//! when no endpoint is configured.

/// Terms that are always masked locally.
#[must_use]
pub fn builtin_terms() -> Vec<&'static str> {
    vec!["explicit", "offensive", "profane", "vulgar", "obscene"]
}

/// Terms masked when the remote classifier is unavailable by configuration.
///
/// Includes every built-in term.
#[must_use]
pub fn extended_terms() -> Vec<&'static str> {
    let mut terms = builtin_terms();
    terms.extend([
        // Adult
        "adult", "nsfw", "xxx", "porn", "sex",
        // Violence
        "violence", "gore", "blood", "kill", "murder",
        // Hate
        "hate", "racist", "bigot", "slur",
    ]);
    terms
}
