use base64::Engine;
use serde_json::Value;
use std::collections::HashMap;
use tera::{try_get_value, Error, Tera};

/// Custom tera filters and functions beyond the standard library, registered
/// the same way the host template ecosystem registers its extensions.
///
/// Not exercised by any template this crate ships, but kept available to
/// operator-authored templates for parity with the broader templating stack.
pub trait TeraFilter<'a> {
    fn name() -> &'a str;
    fn implementation() -> fn(&Value, &HashMap<String, Value>) -> Result<Value, Error>;
}

/// Encodes a string value to base64.
pub struct Base64EncodeFilter;

impl Base64EncodeFilter {
    fn base64_encode(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }
}

impl<'a> TeraFilter<'a> for Base64EncodeFilter {
    fn name() -> &'a str {
        "base64_encode"
    }

    fn implementation() -> fn(&Value, &HashMap<String, Value>) -> Result<Value, Error> {
        |value: &Value, _: &HashMap<String, Value>| -> Result<Value, Error> {
            let s = try_get_value!("base64_encode", "value", String, value);
            Ok(Value::String(Base64EncodeFilter::base64_encode(&s)))
        }
    }
}

/// Escapes a string so it is safe to embed inside a shell double-quoted value
/// (backslash, double quote, single quote).
pub struct ShellValueEscapeFilter;

impl ShellValueEscapeFilter {
    fn escape_chars(s: &str) -> String {
        s.replace('\\', "\\\\").replace('\"', "\\\"").replace('\'', "\\'")
    }
}

impl<'a> TeraFilter<'a> for ShellValueEscapeFilter {
    fn name() -> &'a str {
        "shell_value_escape"
    }

    fn implementation() -> fn(&Value, &HashMap<String, Value>) -> Result<Value, Error> {
        |value: &Value, _: &HashMap<String, Value>| -> Result<Value, Error> {
            let s = try_get_value!("shell_value_escape", "value", String, value);
            Ok(Value::String(ShellValueEscapeFilter::escape_chars(&s)))
        }
    }
}

pub fn register_all(tera: &mut Tera) {
    tera.register_filter(Base64EncodeFilter::name(), Base64EncodeFilter::implementation());
    tera.register_filter(ShellValueEscapeFilter::name(), ShellValueEscapeFilter::implementation());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::to_value;
    use tera::Context;

    #[test]
    fn test_base64_encode_filter() {
        let test_cases = vec!["", "abc", " abc ", "/jkhbsveir.%"];

        for tc in test_cases {
            let result = Base64EncodeFilter::implementation()(&to_value(tc).unwrap(), &HashMap::new());

            assert!(result.is_ok());
            assert_eq!(result.unwrap(), to_value(Base64EncodeFilter::base64_encode(tc)).unwrap());
        }
    }

    #[test]
    fn test_base64_encode_filter_injection() {
        const TEST_STR: &str = "abc";

        let mut tera = Tera::default();
        tera.add_raw_template("test", "{{ input | base64_encode }}")
            .expect("failed to add raw template");
        tera.register_filter(Base64EncodeFilter::name(), Base64EncodeFilter::implementation());

        let mut context = Context::new();
        context.insert("input", TEST_STR);

        let result = tera.render("test", &context).expect("failed to render");

        assert_eq!(Base64EncodeFilter::base64_encode(TEST_STR), result);
    }

    #[test]
    fn test_shell_value_escape_filter() {
        let cases = vec![
            ("no escape needed", "no escape needed"),
            ("\"", "\\\""),
            ("\\", "\\\\"),
            ("'", "\\'"),
        ];

        for (input, expected) in cases {
            let result = ShellValueEscapeFilter::implementation()(&to_value(input).unwrap(), &HashMap::new());
            assert!(result.is_ok());
            assert_eq!(result.unwrap(), to_value(expected).unwrap());
        }
    }
}
