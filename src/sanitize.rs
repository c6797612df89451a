//! Normalization of cgroup directory names and file keys into Prometheus identifiers

use once_cell::sync::Lazy;
use regex::Regex;

static UNSUPPORTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_:]").unwrap());
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// Turn an arbitrary name into a string made of `[A-Za-z0-9_:]` only.
///
/// Systemd escapes some characters in unit names (`user\x2d1000.slice`), so
/// escape sequences are resolved first when the whole name is a valid
/// escaped string. Unsupported characters then become `_`, runs of `_` are
/// squeezed and leading or trailing `_` are dropped.
pub fn sanitize(name: &str) -> String {
    let unescaped = unescape(name);
    let name = unescaped.as_deref().unwrap_or(name);

    let replaced = UNSUPPORTED.replace_all(name, "_");
    let squeezed = UNDERSCORES.replace_all(&replaced, "_");

    squeezed.trim_matches('_').to_string()
}

/// Resolve C-style escape sequences, returning `None` when there is nothing
/// to resolve or the input is not a valid body of a double-quoted string.
fn unescape(input: &str) -> Option<String> {
    if !input.contains('\\') {
        return None;
    }

    let mut out: Vec<u8> = Vec::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\n' => return None,
            '\\' => {}
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                continue;
            }
        }

        let simple = match chars.next()? {
            'a' => b'\x07',
            'b' => b'\x08',
            'f' => b'\x0c',
            'n' => b'\n',
            'r' => b'\r',
            't' => b'\t',
            'v' => b'\x0b',
            '\\' => b'\\',
            '"' => b'"',
            'x' => {
                let byte = u8::from_str_radix(&take(&mut chars, 2)?, 16).ok()?;
                out.push(byte);
                continue;
            }
            'u' => {
                push_char(&mut out, u32::from_str_radix(&take(&mut chars, 4)?, 16).ok()?)?;
                continue;
            }
            'U' => {
                push_char(&mut out, u32::from_str_radix(&take(&mut chars, 8)?, 16).ok()?)?;
                continue;
            }
            d @ '0'..='7' => {
                let rest = take(&mut chars, 2)?;
                let value = u32::from_str_radix(&format!("{}{}", d, rest), 8).ok()?;
                out.push(u8::try_from(value).ok()?);
                continue;
            }
            _ => return None,
        };
        out.push(simple);
    }

    Some(String::from_utf8_lossy(&out).into_owned())
}

fn take(chars: &mut std::str::Chars<'_>, n: usize) -> Option<String> {
    let taken: String = chars.by_ref().take(n).collect();
    (taken.chars().count() == n && taken.chars().all(|c| c.is_ascii_hexdigit())).then_some(taken)
}

fn push_char(out: &mut Vec<u8>, code: u32) -> Option<()> {
    let c = char::from_u32(code)?;
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_replaces_unsupported_characters() {
        assert_eq!(sanitize("memory.stat"), "memory_stat");
        assert_eq!(sanitize("memory.swap.current"), "memory_swap_current");
        assert_eq!(sanitize("system.slice"), "system_slice");
        assert_eq!(sanitize("a:b"), "a:b");
    }

    #[test]
    fn test_squeezes_and_trims_underscores() {
        assert_eq!(sanitize("__a..b--c__"), "a_b_c");
        assert_eq!(sanitize("..."), "");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn test_resolves_systemd_escapes() {
        assert_eq!(sanitize(r"user\x2d1000.slice"), "user_1000_slice");
        assert_eq!(sanitize(r"a\tb"), "a_b");
        assert_eq!(sanitize(r"café"), "caf");
        assert_eq!(sanitize(r"x\101y"), "xAy");
    }

    #[test]
    fn test_invalid_escapes_are_left_alone() {
        assert_eq!(sanitize(r"bad\qescape"), "bad_qescape");
        assert_eq!(sanitize(r"short\x2"), "short_x2");
        assert_eq!(sanitize("quote\"d"), "quote_d");
        assert_eq!(sanitize(r"trailing\"), "trailing");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "memory.stat",
            r"user\x2d1000.slice",
            "__a..b--c__",
            "docker-0123abcd.scope",
            "ümlaut / spaces\there",
            r"\\x2d",
            "k8s:pod:abc",
            "_",
            "",
        ];

        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "input {:?}", input);
            assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'));
            assert!(!once.starts_with('_') && !once.ends_with('_'));
            assert!(!once.contains("__"));
        }
    }

    proptest! {
        #[test]
        fn test_sanitize_any_string(input in any::<String>()) {
            let once = sanitize(&input);
            prop_assert_eq!(sanitize(&once), once.clone());
            prop_assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'));
            prop_assert!(!once.starts_with('_') && !once.ends_with('_'));
            prop_assert!(!once.contains("__"));
        }

        #[test]
        fn test_sanitize_escaped_unit_names(input in r"[a-z0-9.@-]{0,12}(\\x[0-9a-f]{2}[a-z0-9.]{0,6}){0,3}") {
            let once = sanitize(&input);
            prop_assert_eq!(sanitize(&once), once.clone());
            prop_assert!(!once.contains('\\'));
        }
    }
}
