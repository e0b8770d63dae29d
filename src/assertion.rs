//! Assertion evaluator (spec §4.2): given a response body and a list of
//! XPath assertions, decides `(is_passed, is_banned)`.

use skyscraper::html;
use skyscraper::xpath;
use tracing::{debug, instrument};

use crate::models::{Assertion, AssertionKind};

/// Outcome of evaluating a body against a set of assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertionOutcome {
    pub is_passed: bool,
    pub is_banned: bool,
}

/// Evaluate `body` (raw response bytes, treated as lenient HTML) against
/// `assertions`.
///
/// Algorithm (spec §4.2):
/// 1. Parse bytes as lenient HTML; on parse failure, `(false, false)`.
/// 2. Empty assertion list → `(true, false)` (status check alone governs).
/// 3. For each assertion, evaluate its XPath expression; any match counts
///    toward "content was understood" (`is_passed`), and a match on a `ban`
///    assertion additionally sets `is_banned`. This preserves the source's
///    disjunction-regardless-of-kind behaviour noted as an open question in
///    spec §9: a matched `ban` assertion alone also satisfies `is_passed`.
#[instrument(skip(body, assertions), fields(assertion_count = assertions.len()))]
pub fn evaluate(body: &str, assertions: &[Assertion]) -> AssertionOutcome {
    if assertions.is_empty() {
        return AssertionOutcome {
            is_passed: true,
            is_banned: false,
        };
    }

    let document = match html::parse(body) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(error = %e, "body failed to parse as html");
            return AssertionOutcome {
                is_passed: false,
                is_banned: false,
            };
        }
    };

    let mut any_alive_matched = false;
    let mut any_ban_matched = false;

    for assertion in assertions {
        let expr = match xpath::parse(&assertion.expr) {
            Ok(expr) => expr,
            Err(e) => {
                debug!(expr = %assertion.expr, error = %e, "failed to parse xpath expression");
                continue;
            }
        };

        let matched = match expr.apply(&document) {
            Ok(items) => !items.is_empty(),
            Err(e) => {
                debug!(expr = %assertion.expr, error = %e, "xpath evaluation failed");
                false
            }
        };

        if matched {
            any_alive_matched = true;
            if assertion.kind == AssertionKind::Ban {
                any_ban_matched = true;
            }
        }
    }

    AssertionOutcome {
        is_passed: any_alive_matched,
        is_banned: any_ban_matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alive(expr: &str) -> Assertion {
        Assertion {
            expr: expr.to_string(),
            kind: AssertionKind::Alive,
        }
    }

    fn ban(expr: &str) -> Assertion {
        Assertion {
            expr: expr.to_string(),
            kind: AssertionKind::Ban,
        }
    }

    #[test]
    fn empty_assertions_pass_without_inspecting_body() {
        let outcome = evaluate("not even html", &[]);
        assert_eq!(outcome, AssertionOutcome { is_passed: true, is_banned: false });
    }

    #[test]
    fn matching_alive_assertion_passes() {
        let body = "<html><body>ok</body></html>";
        let outcome = evaluate(body, &[alive(".//body")]);
        assert_eq!(outcome, AssertionOutcome { is_passed: true, is_banned: false });
    }

    #[test]
    fn unmatched_assertion_fails() {
        let body = "<html><body>ok</body></html>";
        let outcome = evaluate(body, &[alive(".//nonexistent")]);
        assert_eq!(outcome, AssertionOutcome { is_passed: false, is_banned: false });
    }

    #[test]
    fn matching_ban_assertion_also_counts_as_passed() {
        let body = "<html><body>blocked: captcha required</body></html>";
        let outcome = evaluate(
            body,
            &[ban(".//*[contains(text(),'captcha')]")],
        );
        assert_eq!(outcome, AssertionOutcome { is_passed: true, is_banned: true });
    }

    #[test]
    fn alive_and_ban_can_both_match() {
        let body = "<html><body>ok but captcha</body></html>";
        let outcome = evaluate(
            body,
            &[alive(".//body"), ban(".//*[contains(text(),'captcha')]")],
        );
        assert_eq!(outcome, AssertionOutcome { is_passed: true, is_banned: true });
    }
}
