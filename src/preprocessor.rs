//! Substitutes `$0..$n` and `$@` in action templates from regex captures and the full line.

/// Expands an action template against `line` and its `captures` (capture 0 is the full match,
/// `1..n` are groups).
///
/// A single left-to-right scan: `\$` is copied through verbatim (and only unescaped to `$` on
/// the final pass, so escaped tokens never get treated as substitutions), `$@` becomes the full
/// line, `$N` becomes `captures[N]` if in range or a single space otherwise. Because the scan
/// visits each template byte exactly once and never re-scans substituted output, text produced
/// by a substitution can never itself be expanded.
pub fn preprocess(template: &str, line: &str, captures: &[String]) -> String {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'$' {
            out.push('\\');
            out.push('$');
            i += 2;
            continue;
        }

        if bytes[i] == b'$' {
            let rest = &template[i + 1..];
            if let Some(after) = rest.strip_prefix('@') {
                out.push_str(line);
                i = template.len() - after.len();
                continue;
            }

            let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits_len > 0 {
                let n: usize = rest[..digits_len].parse().unwrap_or(usize::MAX);
                match captures.get(n) {
                    Some(capture) => out.push_str(capture),
                    None => out.push(' '),
                }
                i += 1 + digits_len;
                continue;
            }
        }

        // Safe: we only ever advance by whole-char boundaries (ASCII fast paths above, or one
        // full char here), so `i` always lands on a char boundary.
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }

    out.replace("\\$", "$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_survives_then_unescapes() {
        let caps = vec!["whatever".to_string()];
        assert_eq!(preprocess("echo \\$1", "line", &caps), "echo $1");
    }

    #[test]
    fn substitutes_capture_and_full_line() {
        let caps = vec!["ping".to_string()];
        assert_eq!(
            preprocess("echo $0 $@", "ping ok", &caps),
            "echo ping ping ok"
        );
    }

    #[test]
    fn e6_scenario() {
        let caps = vec!["foo bar".to_string(), "foo".to_string()];
        assert_eq!(preprocess("cmd $1 $@", "foo bar", &caps), "cmd foo foo bar");
    }

    #[test]
    fn out_of_range_capture_becomes_space() {
        let caps = vec!["only-one".to_string()];
        assert_eq!(preprocess("cmd [$5]", "line", &caps), "cmd [ ]");
    }

    #[test]
    fn substituted_text_is_never_rescanned() {
        // The capture itself contains a `$1` token; it must not be expanded a second time.
        let caps = vec!["literal $1 text".to_string()];
        assert_eq!(preprocess("echo $0", "line", &caps), "echo literal $1 text");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_plain_template() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 _-]{0,32}".prop_map(|s| s)
    }

    proptest! {
        // Invariant #8: a literal `\$N` survives substitution and unescapes to `$N`
        // regardless of what's in `captures`.
        #[test]
        fn escaped_dollar_is_always_literal(
            n in 0u32..20,
            line in ".*",
            captures in prop::collection::vec(".*", 0..5),
        ) {
            let template = format!("echo \\${n}");
            let out = preprocess(&template, &line, &captures);
            prop_assert_eq!(out, format!("echo ${n}"));
        }

        // `$@` always expands to the full originating line, verbatim, no matter what
        // surrounds it in the template.
        #[test]
        fn at_sign_always_yields_full_line(
            prefix in arb_plain_template(),
            suffix in arb_plain_template(),
            line in ".*",
            captures in prop::collection::vec(".*", 0..5),
        ) {
            let template = format!("{prefix}$@{suffix}");
            let out = preprocess(&template, &line, &captures);
            prop_assert_eq!(out, format!("{prefix}{line}{suffix}"));
        }

        // A template with no `$` or `\` at all passes through unchanged, whatever the
        // captures happen to be.
        #[test]
        fn plain_template_is_unchanged(
            template in arb_plain_template(),
            line in ".*",
            captures in prop::collection::vec(".*", 0..5),
        ) {
            let out = preprocess(&template, &line, &captures);
            prop_assert_eq!(out, template);
        }

        // An out-of-range `$N` never panics and always becomes a single space.
        #[test]
        fn out_of_range_never_panics(
            n in 0u32..50,
            captures in prop::collection::vec(".*", 0..5),
        ) {
            let template = format!("[${n}]");
            let out = preprocess(&template, "line", &captures);
            if (n as usize) < captures.len() {
                prop_assert_eq!(out, format!("[{}]", captures[n as usize]));
            } else {
                prop_assert_eq!(out, "[ ]".to_string());
            }
        }
    }
}
