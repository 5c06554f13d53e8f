//! Output filename derivation.
//!
//! The same sanitizer is used everywhere a filename is derived, so a name
//! computed at report time matches the file written at fetch time.

/// Characters stripped from filename components. Invalid on Windows,
/// problematic in shells elsewhere.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of a single sanitized component, leaving room for the
/// other component and the extension within common path limits.
const MAX_COMPONENT_LEN: usize = 200;

/// Sanitizes one filename component.
///
/// Decodes the HTML entity `&amp;`, strips invalid characters, collapses
/// whitespace runs to a single space, trims, and truncates to 200
/// characters.
pub fn sanitize_component(raw: &str) -> String {
    let decoded = raw.replace("&amp;", "&");

    let mut collapsed = String::with_capacity(decoded.len());
    let mut prev_space = false;
    for ch in decoded.chars() {
        if INVALID_CHARS.contains(&ch) {
            continue;
        }
        if ch.is_whitespace() {
            if !prev_space {
                collapsed.push(' ');
            }
            prev_space = true;
        } else {
            collapsed.push(ch);
            prev_space = false;
        }
    }

    let trimmed = collapsed.trim();
    if trimmed.chars().count() > MAX_COMPONENT_LEN {
        trimmed
            .chars()
            .take(MAX_COMPONENT_LEN)
            .collect::<String>()
            .trim_end()
            .to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derives the artifact filename: `"{Group} - {Entry}.webp"`.
pub fn artifact_filename(group_display: &str, entry_display: &str) -> String {
    format!(
        "{} - {}.webp",
        sanitize_component(group_display),
        sanitize_component(entry_display)
    )
}
