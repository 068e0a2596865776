//! Part headers and `Content-Type` style option parsing
//!
//! A header value such as `application/json; charset="UTF-8"` is split into
//! its main value and a map of lower-cased option names to unquoted values.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// `;key=value` pairs where the value is a token or a quoted string
static HEADER_OPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:;|^)\s*([^()<>@,;:\\"/\[\]?={} \t]+)\s*=\s*([^()<>@,;:\\"/\[\]?={} \t]+|"(?:\\.|[^"])*")"#,
    )
    .expect("header option pattern is valid")
});

/// A parsed header value with its `key=value` options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderValue {
    value: String,
    options: HashMap<String, String>,
}

impl HeaderValue {
    /// Parse a raw header value into main value and options
    pub fn parse(raw: &str) -> Self {
        let Some((main, tail)) = raw.split_once(';') else {
            return Self {
                value: raw.trim().to_string(),
                options: HashMap::new(),
            };
        };

        let mut options = HashMap::new();
        for captures in HEADER_OPTION.captures_iter(tail) {
            let key = captures[1].to_ascii_lowercase();
            let value = unquote(&captures[2]);
            options.insert(key, value);
        }

        Self {
            value: main.trim().to_string(),
            options,
        }
    }

    /// Main value, without options
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Look up an option by (case-insensitive) name
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }
}

/// Strip surrounding quotes and resolve backslash escapes
fn unquote(value: &str) -> String {
    let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
    if !quoted {
        return value.to_string();
    }

    let mut unescaped = String::with_capacity(value.len() - 2);
    let mut chars = value[1..value.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                unescaped.push(escaped);
                continue;
            }
        }
        unescaped.push(c);
    }
    unescaped
}

/// Case-insensitive header map of a single part
///
/// Later headers replace earlier ones with the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: HeaderValue) {
        let name = name.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}

/// Extract the `boundary` option from a multipart `Content-Type` header
///
/// e.g. `multipart/related; boundary=------abcde123; type=application/json`
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    HeaderValue::parse(content_type)
        .option("boundary")
        .filter(|boundary| !boundary.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_pattern_compiles() {
        let captures = HEADER_OPTION.captures("; boundary=b1").unwrap();
        assert_eq!(&captures[1], "boundary");
        assert_eq!(&captures[2], "b1");
    }

    #[test]
    fn test_parse_plain_value() {
        let header = HeaderValue::parse("  application/octet-stream ");
        assert_eq!(header.value(), "application/octet-stream");
        assert!(header.options().is_empty());
    }

    #[test]
    fn test_parse_options() {
        let header = HeaderValue::parse("application/json; charset=UTF-8");
        assert_eq!(header.value(), "application/json");
        assert_eq!(header.option("charset"), Some("UTF-8"));
        assert_eq!(header.option("CHARSET"), Some("UTF-8"));
    }

    #[test]
    fn test_parse_quoted_option_with_escapes() {
        let header = HeaderValue::parse(r#"form-data; name="meta\"data"; filename="a\\b.bin""#);
        assert_eq!(header.value(), "form-data");
        assert_eq!(header.option("name"), Some("meta\"data"));
        assert_eq!(header.option("filename"), Some("a\\b.bin"));
    }

    #[test]
    fn test_option_keys_are_lowercased() {
        let header = HeaderValue::parse("text/plain; Charset=iso-8859-1");
        assert_eq!(header.options().get("charset").map(String::as_str), Some("iso-8859-1"));
    }

    #[test]
    fn test_headers_case_insensitive_lookup_and_replace() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", HeaderValue::parse("application/json"));
        headers.insert("content-id", HeaderValue::parse("<abc>"));
        headers.insert("CONTENT-TYPE", HeaderValue::parse("application/octet-stream"));

        assert_eq!(headers.len(), 2);
        assert_eq!(
            headers.get("content-type").map(HeaderValue::value),
            Some("application/octet-stream")
        );
        assert!(headers.contains("Content-ID"));
        assert!(!headers.contains("Content-Disposition"));
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/related; boundary=------abcde123; type=application/json"),
            Some("------abcde123".to_string())
        );
        assert_eq!(
            boundary_from_content_type(r#"multipart/form-data; boundary="quoted-boundary""#),
            Some("quoted-boundary".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
        assert_eq!(boundary_from_content_type("multipart/related; type=text"), None);
    }
}
