//! CheckDefinition and Assertion: the declarative "is this URL reachable and
//! does its body look right" contract a Proxy is probed against.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CheckerError, Result};

/// Kind of XPath assertion. Replaces the source's subclass pair
/// (`XPathCheck` / `BanXPathCheck`) with a tagged variant, per spec §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionKind {
    Alive,
    Ban,
}

/// One XPath expression plus the kind of signal a match represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "xpath")]
    pub expr: String,
    #[serde(rename = "type")]
    pub kind: AssertionKind,
}

/// The explicit, named fields a check definition is built from, replacing the
/// source's `**kwargs`-style construction (spec §9).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckOptions {
    pub status: Option<Vec<i32>>,
    pub xpath: Option<Vec<Assertion>>,
    pub timeout: Option<i32>,
}

const DEFAULT_TIMEOUT_SECS: i32 = 2;

/// A new check definition supplied by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCheckDefinition {
    pub url: String,
    pub name: Option<String>,
    #[serde(flatten)]
    pub options: CheckOptions,
}

/// A persisted check definition.
#[derive(Debug, Clone, Serialize)]
pub struct CheckDefinition {
    pub id: i64,
    pub name: Option<String>,
    pub url: String,
    pub expected_status: Vec<i32>,
    pub xpath_assertions: Vec<Assertion>,
    pub timeout_secs: i32,
    pub netloc: String,
    pub created_at: DateTime<Utc>,
}

/// The subset of the JSON shape used by `canonical_json`, with keys emitted
/// in a fixed order via a `BTreeMap` so re-serialization is stable (spec §8
/// round-trip law, spec §6 "canonical serialization").
#[derive(Serialize)]
struct CanonicalDefinition {
    url: String,
    status: Vec<i32>,
    xpath: Vec<CanonicalAssertion>,
    timeout: i32,
}

#[derive(Serialize)]
struct CanonicalAssertion {
    xpath: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl CheckDefinition {
    /// Derive `netloc` (scheme://host[:port]) from a check's URL, per spec §3.
    pub fn derive_netloc(url: &str) -> Result<String> {
        let parsed = Url::parse(url)
            .map_err(|e| CheckerError::InvalidRequest(format!("invalid check url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CheckerError::InvalidRequest("check url has no host".into()))?;
        Ok(match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        })
    }

    pub fn canonical_json(&self) -> String {
        canonical_json(&self.url, &self.expected_status, &self.xpath_assertions, self.timeout_secs)
    }
}

/// Canonical JSON of a (not-yet-persisted) check definition, used for the
/// uniqueness check in `Store::add_check`.
pub fn canonical_json(
    url: &str,
    status: &[i32],
    xpath: &[Assertion],
    timeout: i32,
) -> String {
    let mut sorted_status = status.to_vec();
    sorted_status.sort_unstable();

    let canon = CanonicalDefinition {
        url: url.to_string(),
        status: sorted_status,
        xpath: xpath
            .iter()
            .map(|a| CanonicalAssertion {
                xpath: a.expr.clone(),
                kind: match a.kind {
                    AssertionKind::Alive => "alive",
                    AssertionKind::Ban => "ban",
                },
            })
            .collect(),
        timeout,
    };

    // BTreeMap round-trip guarantees key order is stable even if
    // `CanonicalDefinition`'s field order were ever to change.
    let value = serde_json::to_value(&canon).expect("canonical definition is always valid json");
    let ordered: BTreeMap<String, serde_json::Value> = match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        other => {
            // Unreachable in practice (CanonicalDefinition always serializes
            // to an object), kept defensive for future field additions.
            return other.to_string();
        }
    };
    serde_json::to_string(&ordered).expect("btreemap of json values always serializes")
}

impl NewCheckDefinition {
    pub fn expected_status(&self) -> Vec<i32> {
        self.options.status.clone().unwrap_or_else(|| vec![200])
    }

    pub fn xpath_assertions(&self) -> Vec<Assertion> {
        self.options.xpath.clone().unwrap_or_default()
    }

    pub fn timeout_secs(&self) -> i32 {
        self.options.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_netloc_includes_explicit_port() {
        let netloc = CheckDefinition::derive_netloc("http://example.test:8080/path").unwrap();
        assert_eq!(netloc, "http://example.test:8080");
    }

    #[test]
    fn derive_netloc_omits_default_port() {
        let netloc = CheckDefinition::derive_netloc("https://example.test/path").unwrap();
        assert_eq!(netloc, "https://example.test");
    }

    #[test]
    fn canonical_json_is_stable_regardless_of_status_order() {
        let a = canonical_json(
            "http://example.test/",
            &[301, 200],
            &[],
            2,
        );
        let b = canonical_json(
            "http://example.test/",
            &[200, 301],
            &[],
            2,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_json_differs_on_assertion_kind() {
        let alive = canonical_json(
            "http://example.test/",
            &[200],
            &[Assertion { expr: ".//body".into(), kind: AssertionKind::Alive }],
            2,
        );
        let ban = canonical_json(
            "http://example.test/",
            &[200],
            &[Assertion { expr: ".//body".into(), kind: AssertionKind::Ban }],
            2,
        );
        assert_ne!(alive, ban);
    }

    #[test]
    fn assertion_wire_format_uses_xpath_key() {
        // Spec §6: `"xpath": [{"xpath": "<expr>", "type": "alive|ban"}]`.
        let assertion: Assertion =
            serde_json::from_str(r#"{"xpath": ".//body", "type": "alive"}"#).unwrap();
        assert_eq!(assertion.expr, ".//body");
        assert_eq!(assertion.kind, AssertionKind::Alive);

        let serialized = serde_json::to_string(&assertion).unwrap();
        assert!(serialized.contains("\"xpath\":\".//body\""));
        assert!(!serialized.contains("\"expr\""));
    }

    #[test]
    fn new_check_definition_round_trips_spec_example_json() {
        let raw = r#"
        {
            "url":     "http://example.test/",
            "status":  [200, 301],
            "xpath":   [{"xpath": ".//body", "type": "alive"}],
            "timeout": 2
        }
        "#;
        let parsed: NewCheckDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.url, "http://example.test/");
        assert_eq!(parsed.expected_status(), vec![200, 301]);
        assert_eq!(parsed.timeout_secs(), 2);
        let assertions = parsed.xpath_assertions();
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].expr, ".//body");
        assert_eq!(assertions[0].kind, AssertionKind::Alive);
    }

    #[test]
    fn new_check_definition_defaults() {
        let new_def = NewCheckDefinition {
            url: "http://example.test/".into(),
            name: None,
            options: CheckOptions::default(),
        };
        assert_eq!(new_def.expected_status(), vec![200]);
        assert!(new_def.xpath_assertions().is_empty());
        assert_eq!(new_def.timeout_secs(), 2);
    }
}
