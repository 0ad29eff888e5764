//! Expansion of workspace message markup into plain IRC text
//!
//! The workspace quotes message bodies: URLs and mentions are enclosed in
//! `<` and `>`, auto-linked URLs carry the text the user typed after a `|`,
//! and `&`, `<`, `>` are sent as HTML entities.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref QUOTED: Regex = Regex::new(r"<([^<>]+)>").unwrap();
    static ref ENTITY: Regex = Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").unwrap();
}

/// Expand markup without resolving user mentions
pub fn expand_text(text: &str) -> String {
    expand_text_with(text, |_| None)
}

/// Expand markup, resolving `<@ID>` mentions to names with `resolve_user`
pub fn expand_text_with<F>(text: &str, resolve_user: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let expanded = QUOTED.replace_all(text, |caps: &Captures| {
        expand_quoted(&caps[1], &resolve_user).unwrap_or_else(|| caps[0].to_string())
    });
    unescape_html(&expanded)
}

fn expand_quoted<F>(inner: &str, resolve_user: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let (body, label) = match inner.rfind('|') {
        Some(idx) => (&inner[..idx], Some(&inner[idx + 1..])),
        None => (inner, None),
    };

    if let Some(id) = body.strip_prefix('@') {
        let name = resolve_user(id)
            .or_else(|| label.map(|l| l.trim_start_matches('@').to_string()))
            .unwrap_or_else(|| id.to_string());
        return Some(format!("@{}", name));
    }

    if let Some(id) = body.strip_prefix('#') {
        return Some(format!("#{}", label.unwrap_or(id)));
    }

    if let Some(special) = body.strip_prefix('!') {
        if let Some(label) = label {
            return Some(label.to_string());
        }
        let keyword = special.split('^').next().unwrap_or(special);
        return Some(format!("@{}", keyword));
    }

    // Anything else must be a URL; leave unparsable text alone
    url::Url::parse(body).ok()?;
    match label {
        Some(label) if !label.is_empty() && label != body => Some(format!("{} ({})", label, body)),
        _ => Some(body.to_string()),
    }
}

/// Decode HTML character references
/// Replace CR and LF with spaces so a value cannot end an IRC line early
pub fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

pub fn unescape_html(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            decode_entity(&caps[1]).map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let c = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        _ => return None,
    };
    Some(c)
}
