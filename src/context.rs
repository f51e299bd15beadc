// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Injection-context analysis: cheap URL heuristics refined by a single
//! evaluate-in-page ancestor walk (one round-trip, not N).

use crate::browser::driver::PageHandle;
use crate::types::{AttributeKind, DetectedContext, InjectionContext};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const JS_PARAM_HINTS: &[&str] = &["callback", "jsonp", "function", "js", "script"];
const URL_PARAM_HINTS: &[&str] = &["url", "redirect", "return", "next", "target", "path", "goto"];
const CSS_PARAM_HINTS: &[&str] = &["style", "css", "theme", "color"];

/// Parameter-name heuristics over the target URL. First match wins.
pub fn analyze_url(url: &str) -> DetectedContext {
    let parsed = match url::Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return DetectedContext::new(InjectionContext::Html),
    };

    for (name, _) in parsed.query_pairs() {
        let name = name.to_lowercase();
        if JS_PARAM_HINTS.iter().any(|hint| name.contains(hint)) {
            return DetectedContext::new(InjectionContext::Js);
        }
        if URL_PARAM_HINTS.iter().any(|hint| name.contains(hint)) {
            return DetectedContext::new(InjectionContext::Url);
        }
        if CSS_PARAM_HINTS.iter().any(|hint| name.contains(hint)) {
            return DetectedContext::new(InjectionContext::Css);
        }
    }

    DetectedContext::new(InjectionContext::Html)
}

/// Ancestor summary returned by the in-page walk
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AncestrySummary {
    found: bool,
    in_script: bool,
    in_style: bool,
    has_on_attribute: bool,
    has_attributes: bool,
    url_like: bool,
}

/// Single-round-trip DOM walk for the element under `selector`
pub fn ancestry_expression(selector: &str) -> String {
    format!(
        r#"(function() {{
            const el = document.querySelector({selector});
            if (!el) {{ return JSON.stringify({{ found: false }}); }}
            let inScript = false, inStyle = false;
            for (let node = el.parentElement; node; node = node.parentElement) {{
                const tag = node.tagName;
                if (tag === 'SCRIPT') inScript = true;
                if (tag === 'STYLE') inStyle = true;
            }}
            const names = el.getAttributeNames ? el.getAttributeNames() : [];
            const hasOn = names.some(function(n) {{ return n.toLowerCase().indexOf('on') === 0; }});
            const urlLike = el.tagName === 'A'
                || el.hasAttribute('href') || el.hasAttribute('src') || el.hasAttribute('action');
            return JSON.stringify({{
                found: true,
                inScript: inScript,
                inStyle: inStyle,
                hasOnAttribute: hasOn,
                hasAttributes: names.length > 0,
                urlLike: urlLike
            }});
        }})()"#,
        selector = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string()),
    )
}

fn from_summary(summary: AncestrySummary) -> Option<DetectedContext> {
    if !summary.found {
        return None;
    }
    Some(if summary.in_script {
        DetectedContext::new(InjectionContext::Js)
    } else if summary.in_style {
        DetectedContext::new(InjectionContext::Css)
    } else if summary.has_on_attribute {
        DetectedContext::attribute(AttributeKind::EventHandler)
    } else if summary.has_attributes {
        // default attribute kind when nothing pins the quoting style
        DetectedContext::attribute(AttributeKind::Unquoted)
    } else if summary.url_like {
        DetectedContext::new(InjectionContext::Url)
    } else {
        DetectedContext::new(InjectionContext::Html)
    })
}

/// URL heuristics refined by the live page; the page wins when the element
/// can be summarized.
pub async fn analyze(page: &Arc<dyn PageHandle>, url: &str, selector: &str) -> DetectedContext {
    let from_url = analyze_url(url);

    let summary = match page.evaluate(&ancestry_expression(selector)).await {
        Ok(value) => match value {
            serde_json::Value::String(raw) => serde_json::from_str::<AncestrySummary>(&raw).ok(),
            other => serde_json::from_value::<AncestrySummary>(other).ok(),
        },
        Err(e) => {
            debug!(error = %e, selector = selector, "Ancestor walk failed, using URL heuristics");
            None
        }
    };

    match summary.and_then(from_summary) {
        Some(detected) => detected,
        None => from_url,
    }
}
