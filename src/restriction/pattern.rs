//! Glob matching over qualified names and signatures.
//!
//! Patterns use `*` as the only wildcard; it matches any (possibly empty) sequence of
//! characters, including `.` and parameter-list punctuation. Every other character matches
//! itself.

/// Returns `true` if `pattern` matches the whole of `text`.
///
/// # Examples
///
/// ```rust
/// use livescope::restriction::pattern_matches;
///
/// assert!(pattern_matches("com.app.Service.process(int)", "com.app.Service.process(*)"));
/// assert!(pattern_matches("com.app.Service.process(int)", "com.app.*"));
/// assert!(!pattern_matches("com.app.Service.run()", "com.app.Service.process(*)"));
/// ```
#[must_use]
pub fn pattern_matches(text: &str, pattern: &str) -> bool {
    glob(text, pattern, false)
}

/// Returns `true` if `text` could be extended to a string that `pattern` matches.
///
/// Scope analyzers use this to skip units early: a unit named `com.app.Service` can only
/// contain members matching `com.app.Service.process(*)` if its name is such a prefix.
///
/// # Examples
///
/// ```rust
/// use livescope::restriction::pattern_prefix_matches;
///
/// assert!(pattern_prefix_matches("com.app.Service", "com.app.Service.process(*)"));
/// assert!(pattern_prefix_matches("com.app.Other", "com.app.*"));
/// assert!(!pattern_prefix_matches("com.app.ServiceImpl", "com.app.Service.process(*)"));
/// ```
#[must_use]
pub fn pattern_prefix_matches(text: &str, pattern: &str) -> bool {
    glob(text, pattern, true)
}

/// Number of literal (non-wildcard) characters in a pattern.
#[must_use]
pub fn specificity(pattern: &str) -> usize {
    pattern.chars().filter(|c| *c != '*').count()
}

fn glob(text: &str, pattern: &str, prefix: bool) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    // Position of the last star and the text index it currently absorbs up to
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    prefix || pattern[p..].iter().all(|c| *c == '*')
}
