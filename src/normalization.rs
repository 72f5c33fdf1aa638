use serde::{Deserialize, Deserializer};

/// Normalizes a display name by stripping surrounding whitespace and
/// composing it into Unicode Normalization Form C.
///
/// ```
/// use prorec::normalization::normalize_name;
/// assert_eq!(normalize_name(" Cafe\u{301} "), "Caf\u{e9}");
/// assert_eq!(normalize_name("  Standup  "), "Standup");
/// ```
pub fn normalize_name(name: impl AsRef<str>) -> String {
    use unicode_normalization::UnicodeNormalization;

    name.as_ref().trim().nfc().collect()
}

/// Deserializes a `String` after running it through `normalize_name`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(normalize_name(s))
}
