use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Maximum length of an RFC 1123 label, e.g. a volume name.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Length in bytes of generated database passwords, before encoding.
pub const PASSWORD_LENGTH: usize = 24;

/// Turns an arbitrary object name into a valid RFC 1123 label.
///
/// The name is lower-cased, every character outside `[a-z0-9-]` is replaced
/// by `-`, the result is cut to [`MAX_LABEL_LENGTH`] characters and leading
/// or trailing `-` are removed. Volume names are derived with this
/// transform, so it must stay stable across releases.
pub fn to_rfc1123_label(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LENGTH)
        .collect();

    sanitized.trim_matches('-').to_owned()
}

/// Generates a random password of [`PASSWORD_LENGTH`] bytes, base64 encoded.
pub fn generate_password() -> String {
    let bytes: [u8; PASSWORD_LENGTH] = rand::random();
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("app-config1", "app-config1")]
    #[case("My.App_Config", "my-app-config")]
    #[case("--leading-and-trailing--", "leading-and-trailing")]
    #[case("UPPER", "upper")]
    fn rfc1123_label(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(to_rfc1123_label(input), expected);
    }

    #[test]
    fn rfc1123_label_is_truncated_before_trimming() {
        assert_eq!(to_rfc1123_label(&"a".repeat(70)), "a".repeat(63));

        let dotted = format!("{}.b", "a".repeat(62));
        assert_eq!(to_rfc1123_label(&dotted), "a".repeat(62));
    }

    #[test]
    fn password_has_expected_length() {
        let password = generate_password();
        let decoded = STANDARD
            .decode(&password)
            .expect("password is valid base64");

        assert_eq!(decoded.len(), PASSWORD_LENGTH);
        assert_ne!(password, generate_password());
    }
}
