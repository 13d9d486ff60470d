//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset or empty
//! - `$$` - escape sequence for literal `$`

use regex::Regex;
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # Escape sequence $$
        |
        \$\{                           # Opening ${
            ([A-Za-z_][A-Za-z0-9_]*)   # Variable name (capture group 1)
            (?:
                :-                     # Default value separator
                ([^}]*)                # Default value (capture group 2)
            )?
        \}                             # Closing }
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # Unbraced $VAR (capture group 3)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Any errors encountered during interpolation.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
///
/// All errors are accumulated so the user sees every missing variable at once.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let full_match = caps.get(0).unwrap().as_str();

            if full_match == "$$" {
                return "$".to_string();
            }

            let var_name = caps
                .get(1)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(value) => {
                    // Env values flow into YAML; a newline would change the document shape
                    if value.contains('\n') || value.contains('\r') {
                        errors.push(format!(
                            "environment variable '{}' contains newlines, which is not allowed",
                            var_name
                        ));
                        return full_match.to_string();
                    }

                    if value.is_empty() {
                        if let Some(default) = default_value {
                            return default.to_string();
                        }
                    }

                    value
                }
                Err(_) => {
                    if let Some(default) = default_value {
                        default.to_string()
                    } else {
                        errors.push(format!("environment variable '{}' is not set", var_name));
                        full_match.to_string()
                    }
                }
            }
        })
        .to_string();

    InterpolationResult { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_basic_substitution() {
        with_env_vars(&[("FLURRY_TEST_BASIC", Some("hello"))], || {
            let result = interpolate("value: $FLURRY_TEST_BASIC");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: hello");
        });
    }

    #[test]
    fn test_braced_substitution() {
        with_env_vars(&[("FLURRY_TEST_BRACED", Some("world"))], || {
            let result = interpolate("value: ${FLURRY_TEST_BRACED}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: world");
        });
    }

    #[test]
    fn test_missing_variable_error() {
        with_env_vars(&[("FLURRY_TEST_MISSING", None)], || {
            let result = interpolate("value: $FLURRY_TEST_MISSING");
            assert!(!result.is_ok());
            assert_eq!(result.errors.len(), 1);
            assert!(result.errors[0].contains("FLURRY_TEST_MISSING"));
            assert!(result.errors[0].contains("not set"));
        });
    }

    #[test]
    fn test_default_value_unset() {
        with_env_vars(&[("FLURRY_TEST_UNSET", None)], || {
            let result = interpolate("value: ${FLURRY_TEST_UNSET:-default}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: default");
        });
    }

    #[test]
    fn test_default_value_empty() {
        with_env_vars(&[("FLURRY_TEST_EMPTY", Some(""))], || {
            let result = interpolate("value: ${FLURRY_TEST_EMPTY:-default}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: default");
        });
    }

    #[test]
    fn test_default_not_used_when_set() {
        with_env_vars(&[("FLURRY_TEST_SET", Some("actual"))], || {
            let result = interpolate("value: ${FLURRY_TEST_SET:-default}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: actual");
        });
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("price: $$100");
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }

    #[test]
    fn test_newline_injection_blocked() {
        with_env_vars(&[("FLURRY_TEST_INJECT_NL", Some("line1\nline2"))], || {
            let result = interpolate("value: $FLURRY_TEST_INJECT_NL");
            assert!(!result.is_ok());
            assert!(result.errors[0].contains("newlines"));
        });
    }

    #[test]
    fn test_yaml_config_example() {
        with_env_vars(
            &[
                ("FLURRY_TEST_QUEUE_URL", Some("https://sqs.us-east-1.amazonaws.com/123/klines")),
                ("FLURRY_TEST_CH_URL", None),
            ],
            || {
                let yaml = r#"
queue:
  url: ${FLURRY_TEST_QUEUE_URL}
clickhouse:
  url: ${FLURRY_TEST_CH_URL:-http://localhost:8123}
"#;
                let result = interpolate(yaml);
                assert!(result.is_ok());
                assert!(result
                    .text
                    .contains("url: https://sqs.us-east-1.amazonaws.com/123/klines"));
                assert!(result.text.contains("url: http://localhost:8123"));
            },
        );
    }
}
