//! Loose version equality used by the decision pipeline

/// Prefixes removed before comparing, longest first
const VERSION_PREFIXES: &[&str] = &["version", "ver", "v"];

/// Lowercases, strips a leading `version`/`ver`/`v` marker and treats `+`
/// like `_`.
///
/// Examples:
/// - "V1.2.3" -> "1.2.3"
/// - "version 2.0" -> "2.0"
/// - "1.0+build" -> "1.0_build"
pub fn normalize_version(version: &str) -> String {
    let lower = version.trim().to_lowercase();
    let stripped = VERSION_PREFIXES
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix))
        .map(str::trim_start)
        .unwrap_or(&lower);

    stripped.replace('+', "_").trim().to_string()
}

/// True when both versions agree after [`normalize_version`]
pub fn versions_match(a: &str, b: &str) -> bool {
    normalize_version(a) == normalize_version(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.3", "1.2.3")]
    #[case("v1.2.3", "1.2.3")]
    #[case("V1.2.3", "1.2.3")]
    #[case("version 2.0", "2.0")]
    #[case("Ver3", "3")]
    #[case("1.0+build", "1.0_build")]
    #[case("  2.0-RC1 ", "2.0-rc1")]
    #[case("", "")]
    fn normalize_version_returns_expected(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_version(input), expected);
    }

    #[rstest]
    #[case("v1.0", "1.0", true)]
    #[case("1.0-Beta", "1.0-beta", true)]
    #[case("1.0", "1.0.0", false)]
    #[case("2.0", "v1.9", false)]
    fn versions_match_returns_expected(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        assert_eq!(versions_match(a, b), expected);
    }
}
