//! Query tokenization
//!
//! Lowercased alphanumeric runs; everything else is a separator. This is
//! deliberately the same shape lexical matchers use, so token counts
//! agree between the weight-profile selection here and the matcher's own
//! view of the query.

/// Split `text` into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
