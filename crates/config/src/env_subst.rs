/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            // `${}` or an unterminated placeholder: emit literally.
            _ => {
                result.push_str("${");
                rest = after;
            },
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "WARELAY_HOOK" => Some("https://hooks.example.com".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("url = \"${WARELAY_HOOK}/wa\"", lookup),
            "url = \"https://hooks.example.com/wa\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(substitute_env_with("${NOPE_XYZ}", lookup), "${NOPE_XYZ}");
    }

    #[test]
    fn empty_value_is_substituted() {
        assert_eq!(substitute_env_with("a${EMPTY}b", lookup), "ab");
    }

    #[test]
    fn malformed_placeholders_are_literal() {
        assert_eq!(substitute_env_with("x ${} y", lookup), "x ${} y");
        assert_eq!(substitute_env_with("tail ${OPEN", lookup), "tail ${OPEN");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
