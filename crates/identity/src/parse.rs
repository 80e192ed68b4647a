//! Structural parser for the canonical `ImageId(...)` string form.
//!
//! The form looks like a constructor call, but it is only ever produced by
//! [`Display`](std::fmt::Display) and only ever consumed here. Parsing walks
//! the string directly; nothing is evaluated.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use std::iter::Peekable;
use std::str::Chars;

pub(crate) const PREFIX: &str = "ImageId(";
pub(crate) const SUFFIX: &str = ")";

/// Quote an atom for the canonical form. Single quotes throughout, with
/// backslash escapes for the quote character and backslash itself.
pub(crate) fn quote(atom: &str) -> String {
    let mut out = String::with_capacity(atom.len() + 2);
    out.push('\'');
    for ch in atom.chars() {
        if ch == '\'' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Parse `ImageId('a', 'b', site='c')` into its parts and optional site.
///
/// Atoms may be single- or double-quoted; the `site=` keyword is only valid
/// in final position. Anything else, including a different type name before
/// the parenthesis, is a parse error.
pub(crate) fn canonical(input: &str) -> Result<(Vec<String>, Option<String>)> {
    let inner = input
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .ok_or_raise(|| ErrorKind::Parse(input.to_owned()))?;

    let mut chars = inner.chars().peekable();
    let mut parts = Vec::new();
    let mut site = None;

    loop {
        skip_whitespace(&mut chars);
        match chars.peek() {
            None => break,
            Some('\'') | Some('"') => {
                if site.is_some() {
                    // positional atom after site=
                    exn::bail!(ErrorKind::Parse(input.to_owned()));
                }
                parts.push(quoted_atom(&mut chars, input)?);
            }
            Some(_) => {
                let keyword: String =
                    std::iter::from_fn(|| chars.next_if(|c| *c != '=' && *c != ',')).collect();
                if keyword.trim_end() != "site" || site.is_some() || chars.next() != Some('=') {
                    exn::bail!(ErrorKind::Parse(input.to_owned()));
                }
                skip_whitespace(&mut chars);
                site = Some(quoted_atom(&mut chars, input)?);
            }
        }
        skip_whitespace(&mut chars);
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => exn::bail!(ErrorKind::Parse(input.to_owned())),
        }
    }

    Ok((parts, site))
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

fn quoted_atom(chars: &mut Peekable<Chars<'_>>, input: &str) -> Result<String> {
    let Some(open) = chars.next_if(|c| *c == '\'' || *c == '"') else {
        exn::bail!(ErrorKind::Parse(input.to_owned()));
    };
    let mut atom = String::new();
    loop {
        match chars.next() {
            None => exn::bail!(ErrorKind::Parse(input.to_owned())),
            Some('\\') => match chars.next() {
                None => exn::bail!(ErrorKind::Parse(input.to_owned())),
                Some(escaped) => atom.push(escaped),
            },
            Some(ch) if ch == open => return Ok(atom),
            Some(ch) => atom.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ImageId('a')", &["a"], None)]
    #[case("ImageId('a', 'b.svs')", &["a", "b.svs"], None)]
    #[case(r#"ImageId("a", "b.svs")"#, &["a", "b.svs"], None)]
    #[case("ImageId('b.svs', site='mercy')", &["b.svs"], Some("mercy"))]
    #[case(r#"ImageId('b.svs', site="mercy")"#, &["b.svs"], Some("mercy"))]
    #[case(r"ImageId('it\'s', 'a\\b')", &["it's", r"a\b"], None)]
    #[case("ImageId( 'a' ,  'b' )", &["a", "b"], None)]
    fn accepts(#[case] input: &str, #[case] parts: &[&str], #[case] site: Option<&str>) {
        let (got_parts, got_site) = canonical(input).unwrap();
        assert_eq!(got_parts, parts);
        assert_eq!(got_site.as_deref(), site);
    }

    #[rstest]
    #[case("OtherId('a')")]
    #[case("ImageId('a'")]
    #[case("ImageId('a")]
    #[case("ImageId(a)")]
    #[case("ImageId('a' 'b')")]
    #[case("ImageId(site='x', 'a')")]
    #[case("ImageId('a', site='x', site='y')")]
    #[case("ImageId('a', flavor='x')")]
    #[case(r#"ImageId('a\")"#)]
    fn rejects(#[case] input: &str) {
        let err = canonical(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Parse(_)));
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it\'s'");
        assert_eq!(quote(r"a\b"), r"'a\\b'");
    }
}
