//! `{FIELD}` placeholder substitution shared by the plugins.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::request::Request;

/// Fields usable in archive path templates.
pub const PATH_FIELDS: &[&str] = &[
    "ORDERLABEL",
    "ORDERGUID",
    "PRODUCTLABEL",
    "PRODUCTGUID",
    "CLIENT",
    "CLIENTGUID",
    "ORGANISM",
    "ORGANISMGUID",
    "TIERS",
    "TIERSGUID",
    "STARTDATE",
];

/// Request fields usable in message templates, normalized.
const TEXT_FIELDS: &[&str] = &[
    "orderlabel",
    "orderguid",
    "productlabel",
    "productguid",
    "organism",
    "organismguid",
    "client",
    "clientguid",
    "clientdetails",
    "tiers",
    "tiersguid",
    "tiersdetails",
    "perimeter",
    "surface",
    "remark",
];

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
static UNSAFE_PATH_CHARS_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("placeholder pattern is valid")
    })
}

fn unsafe_path_chars_re() -> &'static Regex {
    UNSAFE_PATH_CHARS_RE.get_or_init(|| {
        Regex::new(r#"[\s<>*"/\\\[\]:;|=,]"#).expect("path character pattern is valid")
    })
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

pub fn strip_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Make a value safe to use as one path segment.
pub fn sanitize_for_path(value: &str) -> String {
    let replaced = unsafe_path_chars_re().replace_all(value, "_");
    strip_accents(&replaced)
}

/// Replace `{FIELD}` placeholders of [`PATH_FIELDS`] with sanitized request values.
/// Other placeholders are left untouched.
pub fn fill_path(template: &str, request: &Request) -> String {
    placeholder_re().replace_all(template, |caps: &Captures| {
        let name = caps[1].to_ascii_uppercase();
        if !PATH_FIELDS.contains(&name.as_str()) {
            return caps[0].to_string();
        }
        let value = if name == "STARTDATE" {
            request.start_date.format("%Y-%m-%d").to_string()
        } else {
            request.field_value(&name).unwrap_or_default()
        };
        sanitize_for_path(&value)
    })
    .into_owned()
}

/// Replace request placeholders in a message template.
///
/// Field names match case-insensitively. `{parameters.KEY}` and `{param_KEY}`
/// read the request parameters and become `null` when the key is missing.
/// Unknown placeholders are left as they are.
pub fn fill_text(template: &str, request: &Request) -> String {
    placeholder_re().replace_all(template, |caps: &Captures| {
        text_value(request, &caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

fn text_value(request: &Request, name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    if let Some(key) = lower
        .strip_prefix("parameters.")
        .or_else(|| lower.strip_prefix("param_"))
    {
        // The key keeps its original spelling for the lookup.
        let original = &name[name.len() - key.len()..];
        return Some(
            request
                .parameter_value(original)
                .unwrap_or_else(|| "null".to_string()),
        );
    }

    let field = normalize(name);
    let value = match field.as_str() {
        "clientname" => request.client.clone(),
        "organisationname" => request.organism.clone(),
        "startdate" => request.start_date.format("%Y-%m-%d %H:%M:%S").to_string(),
        "startdateiso" => request.start_date.to_rfc3339(),
        "enddate" => request
            .end_date
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        "enddateiso" => request.end_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
        "rejected" => request.rejected.to_string(),
        "status" => request.status.to_string(),
        "id" | "requestid" => request.id.to_string(),
        f if TEXT_FIELDS.contains(&f) => request.field_value(f).unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::tests::sample_request;

    #[test]
    fn patterns_compile() {
        assert!(placeholder_re().is_match("{orderLabel}"));
        assert!(unsafe_path_chars_re().is_match("a b"));
    }

    #[test]
    fn accents_and_unsafe_characters_are_replaced() {
        assert_eq!(sanitize_for_path("Commune d'Yverdon"), "Commune_d'Yverdon");
        assert_eq!(sanitize_for_path("Géomètre: Zürich/Nord"), "Geometre__Zurich_Nord");
        assert_eq!(sanitize_for_path("a|b=c,d;e"), "a_b_c_d_e");
    }

    #[test]
    fn path_template_uses_authorized_fields_only() {
        let req = sample_request().request;
        let date = req.start_date.format("%Y-%m-%d").to_string();
        let path = fill_path("/archive/{orderLabel}/{PRODUCTGUID}_{startdate}/{REMARK}", &req);
        assert_eq!(path, format!("/archive/ORD-42/p-9_{date}/{{REMARK}}"));
    }

    #[test]
    fn text_template_fields_and_parameters() {
        let mut req = sample_request().request;
        req.remark = "Merci".into();
        let text = fill_text(
            "Commande {orderLabel} pour {CLIENTNAME} ({organism}): {parameters.format} / {param_PROJECTION} / {parameters.MISSING} {unknown} {remark}",
            &req,
        );
        assert_eq!(
            text,
            "Commande ORD-42 pour Jean Dupont (Commune d'Yverdon): DXF / EPSG:2056 / null {unknown} Merci"
        );
    }

    #[test]
    fn empty_fields_render_empty() {
        let req = sample_request().request;
        assert_eq!(fill_text("[{tiers}]", &req), "[]");
    }
}
