// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Smart payload selection: context/compatibility filtering, effectiveness
//! ranking, and a diversity pass so structurally different payloads land
//! early in the tested sequence.

use crate::effectiveness::PayloadScore;
use crate::types::{
    BrowserEngine, DetectedContext, InjectionContext, PayloadCategory, PayloadSet,
};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Category name a detected context pulls from
fn category_name(context: &DetectedContext) -> String {
    match (context.context, context.attribute_kind) {
        (InjectionContext::Attribute, Some(kind)) => format!("attribute-{}", kind.as_str()),
        (InjectionContext::Attribute, None) => "attribute-unquoted".to_string(),
        (other, _) => other.as_str().to_string(),
    }
}

/// The structural buckets the diversity pass guarantees coverage of
const DANGEROUS_HANDLERS: &[&str] = &["onload", "onerror", "onclick", "onmouseover"];

fn bucket_predicates() -> [fn(&str) -> bool; 7] {
    [
        |p| p.contains("<script"),
        |p| p.contains("<img"),
        |p| p.contains("<svg"),
        |p| p.contains("<iframe"),
        |p| DANGEROUS_HANDLERS.iter().any(|h| p.contains(h)),
        |p| p.contains('"') || p.contains('\''),
        |p| p.contains("javascript:") || p.contains("data:"),
    ]
}

pub struct SelectionInputs<'a> {
    pub context: DetectedContext,
    pub engine: BrowserEngine,
    pub corpus: &'a [PayloadCategory],
    pub custom: Option<&'a PayloadSet>,
    /// Per-browser effectiveness snapshot enabling the ranking step
    pub scores: Option<&'a BTreeMap<String, PayloadScore>>,
    pub limit: usize,
}

/// Ordered, de-duplicated, diversity-passed payload list of at most `limit`
pub fn select(inputs: &SelectionInputs<'_>) -> Vec<String> {
    let target_category = category_name(&inputs.context);
    let mut gathered: Vec<String> = Vec::new();

    // 1. context-matching categories compatible with the engine
    for category in inputs.corpus {
        if category.name == target_category && category.supports(inputs.engine) {
            gathered.extend(category.payloads.iter().cloned());
        }
    }

    // 2. engine-exclusive quirk categories
    for category in inputs.corpus {
        if category.is_exclusive_to(inputs.engine) {
            gathered.extend(category.payloads.iter().cloned());
        }
    }

    // 3. caller-supplied customs
    match inputs.custom {
        Some(PayloadSet::Flat(list)) => gathered.extend(list.iter().cloned()),
        Some(PayloadSet::Categorized(categories)) => {
            for category in categories {
                if category.supports(inputs.engine) {
                    gathered.extend(category.payloads.iter().cloned());
                }
            }
        }
        None => {}
    }

    // 4. de-dup preserving first-seen order
    let mut seen = HashSet::new();
    let mut ranked: Vec<String> = gathered
        .into_iter()
        .filter(|payload| seen.insert(payload.clone()))
        .collect();

    // 5. stable sort by per-browser effectiveness when enabled
    if let Some(scores) = inputs.scores {
        ranked.sort_by(|a, b| {
            let score_a = scores.get(a).copied().unwrap_or(PayloadScore {
                reflection_score: 0.0,
                execution_score: 0.0,
                total_tests: 0,
            });
            let score_b = scores.get(b).copied().unwrap_or(PayloadScore {
                reflection_score: 0.0,
                execution_score: 0.0,
                total_tests: 0,
            });
            score_b
                .execution_score
                .partial_cmp(&score_a.execution_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    score_b
                        .reflection_score
                        .partial_cmp(&score_a.reflection_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
    }

    // 6. diversity pass: one representative per bucket, then rank order
    let mut chosen: Vec<String> = Vec::new();
    let mut used: HashSet<&str> = HashSet::new();

    for predicate in bucket_predicates() {
        if chosen.len() >= inputs.limit {
            break;
        }
        if let Some(payload) = ranked
            .iter()
            .find(|p| predicate(p) && !used.contains(p.as_str()))
        {
            used.insert(payload.as_str());
            chosen.push(payload.clone());
        }
    }
    for payload in &ranked {
        if chosen.len() >= inputs.limit {
            break;
        }
        if used.insert(payload.as_str()) {
            chosen.push(payload.clone());
        }
    }

    // 7. top up from other contexts' generic payloads
    if chosen.len() < inputs.limit {
        let already: HashSet<String> = chosen.iter().cloned().collect();
        for category in inputs.corpus {
            if category.name == target_category || !category.supports(inputs.engine) {
                continue;
            }
            for payload in &category.payloads {
                if chosen.len() >= inputs.limit {
                    break;
                }
                if !already.contains(payload) && !chosen.contains(payload) {
                    chosen.push(payload.clone());
                }
            }
        }
    }

    debug!(
        context = %inputs.context.context,
        category = target_category.as_str(),
        selected = chosen.len(),
        "Smart selection complete"
    );
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributeKind;

    fn corpus() -> Vec<PayloadCategory> {
        crate::payloads::categorized_bank()
    }

    fn html_context() -> DetectedContext {
        DetectedContext::new(InjectionContext::Html)
    }

    #[test]
    fn test_selection_respects_limit_and_dedups() {
        let corpus = corpus();
        let custom = PayloadSet::Flat(vec![
            "<script>alert(1)</script>".to_string(), // duplicate of bank entry
            "<plaintext>".to_string(),
        ]);
        let selected = select(&SelectionInputs {
            context: html_context(),
            engine: BrowserEngine::Chromium,
            corpus: &corpus,
            custom: Some(&custom),
            scores: None,
            limit: 8,
        });

        assert!(selected.len() <= 8);
        let unique: HashSet<&String> = selected.iter().collect();
        assert_eq!(unique.len(), selected.len());
    }

    #[test]
    fn test_diversity_pass_covers_buckets() {
        let corpus = corpus();
        let selected = select(&SelectionInputs {
            context: html_context(),
            engine: BrowserEngine::Chromium,
            corpus: &corpus,
            custom: None,
            scores: None,
            limit: 7,
        });
        assert_eq!(selected.len(), 7);

        let hit: usize = bucket_predicates()
            .iter()
            .filter(|predicate| selected.iter().any(|p| predicate(p)))
            .count();
        assert!(hit >= 6, "first 7 hit only {} buckets: {:?}", hit, selected);
    }

    #[test]
    fn test_event_handler_context_pulls_breakouts() {
        let corpus = corpus();
        let selected = select(&SelectionInputs {
            context: DetectedContext::attribute(AttributeKind::DoubleQuoted),
            engine: BrowserEngine::Chromium,
            corpus: &corpus,
            custom: None,
            scores: None,
            limit: 10,
        });
        assert!(selected
            .iter()
            .any(|p| p.contains("\" autofocus onfocus=alert(1) x=\"")));
        assert!(selected.iter().any(|p| p.contains("onmouseover=alert(1)")));
    }

    #[test]
    fn test_engine_exclusive_categories_follow_engine() {
        let corpus = corpus();
        let chromium = select(&SelectionInputs {
            context: html_context(),
            engine: BrowserEngine::Chromium,
            corpus: &corpus,
            custom: None,
            scores: None,
            limit: 50,
        });
        let webkit = select(&SelectionInputs {
            context: html_context(),
            engine: BrowserEngine::Webkit,
            corpus: &corpus,
            custom: None,
            scores: None,
            limit: 50,
        });

        assert!(chromium.iter().any(|p| p.contains("onbegin")));
        assert!(webkit.iter().any(|p| p.contains("<video>")));
        assert!(!webkit.iter().any(|p| p.contains("constructor.constructor")));
    }

    #[test]
    fn test_effectiveness_ranking_reorders() {
        let corpus = vec![PayloadCategory {
            name: "html".to_string(),
            description: String::new(),
            compatibility: BrowserEngine::all().to_vec(),
            payloads: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        }];
        let mut scores = BTreeMap::new();
        scores.insert(
            "c".to_string(),
            PayloadScore {
                reflection_score: 1.0,
                execution_score: 1.0,
                total_tests: 4,
            },
        );
        scores.insert(
            "b".to_string(),
            PayloadScore {
                reflection_score: 1.0,
                execution_score: 0.0,
                total_tests: 4,
            },
        );

        let selected = select(&SelectionInputs {
            context: html_context(),
            engine: BrowserEngine::Chromium,
            corpus: &corpus,
            custom: None,
            scores: Some(&scores),
            limit: 3,
        });
        // none of a/b/c hits a diversity bucket, so rank order survives
        assert_eq!(selected, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_top_up_from_other_contexts() {
        let corpus = vec![
            PayloadCategory {
                name: "css".to_string(),
                description: String::new(),
                compatibility: BrowserEngine::all().to_vec(),
                payloads: vec!["expression(alert(1))".to_string()],
            },
            PayloadCategory {
                name: "html".to_string(),
                description: String::new(),
                compatibility: BrowserEngine::all().to_vec(),
                payloads: vec!["<script>alert(1)</script>".to_string()],
            },
        ];
        let selected = select(&SelectionInputs {
            context: DetectedContext::new(InjectionContext::Css),
            engine: BrowserEngine::Firefox,
            corpus: &corpus,
            custom: None,
            scores: None,
            limit: 2,
        });
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&"<script>alert(1)</script>".to_string()));
    }
}
