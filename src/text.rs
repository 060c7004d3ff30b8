use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Removes accents by decomposing to NFD and dropping combining marks.
/// "Ingeniería" becomes "Ingenieria", "Pérez Ñúñez" becomes "Perez Nunez".
pub fn strip_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Identity key for a student: trimmed, lower-cased email.
pub fn normalize_email(s: &str) -> String {
    s.trim().to_lowercase()
}
