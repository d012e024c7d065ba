use std::collections::BTreeMap;

/// Parse `os-release(5)` text into a key/value map.
///
/// Values may be unquoted, single-quoted or double-quoted; inside double
/// quotes backslash escapes the next character.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), unquote(v.trim())))
        .collect()
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
    {
        return inner.to_string();
    }
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_debian_release() {
        let text = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
VERSION_CODENAME=bookworm
ID=debian
"#;
        let map = parse(text);
        assert_eq!(map["ID"], "debian");
        assert_eq!(map["VERSION_ID"], "12");
        assert_eq!(map["VERSION_CODENAME"], "bookworm");
        assert_eq!(map["PRETTY_NAME"], "Debian GNU/Linux 12 (bookworm)");
    }

    #[test]
    fn handles_quotes_escapes_and_comments() {
        let text = "# comment\nA='single quoted'\nB=\"say \\\"hi\\\"\"\n\nC=\nbroken line\n";
        let map = parse(text);
        assert_eq!(map["A"], "single quoted");
        assert_eq!(map["B"], "say \"hi\"");
        assert_eq!(map["C"], "");
        assert_eq!(map.len(), 3);
    }
}
