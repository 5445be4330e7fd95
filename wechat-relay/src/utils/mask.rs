//! Identifier masking for logs, reports and the status page.

/// Mask an identifier, keeping the first and last four characters.
///
/// Identifiers of eight characters or fewer are masked entirely.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}
