//! Email variant derivation and filename sanitization.
//!
//! Variants use the `local+token@domain` convention so every attempt
//! routes to the same mailbox while staying textually distinct.

/// Derive a variant of `base` that embeds `token` in the local part.
/// Inputs without exactly one `@` fall back to appending `+token` to the
/// whole string; the fallback never fails.
pub fn email_variant(base: &str, token: &str) -> String {
    match base.split_once('@') {
        Some((local, domain)) if !domain.contains('@') => {
            format!("{local}+{token}@{domain}")
        }
        _ => format!("{base}+{token}"),
    }
}

/// Token for retry variant `attempt_index` of record `record_index`.
pub fn retry_token(record_index: usize, attempt_index: u32) -> String {
    format!("r{record_index}a{attempt_index}")
}

/// Token for synthetic fallback attempt `n` (1-based).
pub fn synthetic_token(n: u64) -> String {
    format!("s{n}")
}

/// Make `input` safe for use in a filename: every character outside
/// `[A-Za-z0-9\-_.@]` becomes `_`, runs of `_` collapse to one, and the
/// empty string maps to a fixed placeholder.
pub fn sanitize_filename(input: &str) -> String {
    if input.is_empty() {
        return "noemail".to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut prev_underscore = false;
    for c in input.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(mapped);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_inserts_token_before_domain() {
        assert_eq!(email_variant("amy@example.com", "r0a1"), "amy+r0a1@example.com");
        assert_eq!(email_variant("amy@example.com", "s3"), "amy+s3@example.com");
    }

    #[test]
    fn variant_is_deterministic() {
        let a = email_variant("amy@example.com", "17-2");
        let b = email_variant("amy@example.com", "17-2");
        assert_eq!(a, b);
    }

    #[test]
    fn missing_at_falls_back_to_suffix() {
        assert_eq!(email_variant("not-an-email", "s1"), "not-an-email+s1");
    }

    #[test]
    fn multiple_ats_fall_back_to_suffix() {
        assert_eq!(email_variant("a@b@c", "s1"), "a@b@c+s1");
    }

    #[test]
    fn empty_domain_still_splits() {
        assert_eq!(email_variant("amy@", "s1"), "amy+s1@");
    }

    #[test]
    fn tokens_embed_indices() {
        assert_eq!(retry_token(4, 2), "r4a2");
        assert_eq!(synthetic_token(11), "s11");
    }

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_filename("a b!!c@d.com"), "a_b_c@d.com");
        assert_eq!(sanitize_filename("plus+tag@x.io"), "plus_tag@x.io");
        assert_eq!(sanitize_filename(""), "noemail");
        assert_eq!(sanitize_filename("___"), "_");
    }
}
