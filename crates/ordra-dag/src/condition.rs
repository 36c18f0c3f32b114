//! Guard expressions.
//!
//! The grammar is closed: top-level `or` of `and`-joined clauses, no
//! parentheses. A clause is one of
//! - `path in [a, b, c]` (stringified value is one of the literals)
//! - `path == literal` (boolean keyword compares truthiness, anything else
//!   compares the stringified value)
//! - `path` (truthiness)
//!
//! Paths are dotted and resolved against nested objects in the context.
//!
//! Anything outside this grammar, such as `a != b` or an unbracketed `in`,
//! fails to compile. `GraphBuilder::build` reports that as
//! `SpecError::InvalidGuard` instead of letting the guard evaluate to false
//! at run time; only [`evaluate_condition`] on raw text falls back to false.

use ordra_core::context::{is_truthy, render, ExecutionContext};

/// Right-hand side of an `==` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    In { path: String, items: Vec<String> },
    Eq { path: String, literal: Literal },
    Truthy { path: String },
}

impl Clause {
    fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        match self {
            Clause::In { path, items } => {
                let value = render(ctx.lookup(path));
                items.iter().any(|item| *item == value)
            }
            Clause::Eq {
                path,
                literal: Literal::Bool(expected),
            } => is_truthy(ctx.lookup(path)) == *expected,
            Clause::Eq {
                path,
                literal: Literal::Text(expected),
            } => render(ctx.lookup(path)) == *expected,
            Clause::Truthy { path } => is_truthy(ctx.lookup(path)),
        }
    }
}

/// A compiled guard: a disjunction of conjunctions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    source: String,
    disjuncts: Vec<Vec<Clause>>,
}

impl Guard {
    /// Compile an expression. Blank expressions compile to `None` (always true).
    pub fn parse(expr: &str) -> Result<Option<Guard>, String> {
        let source = expr.trim();
        if source.is_empty() {
            return Ok(None);
        }
        let disjuncts = source
            .split(" or ")
            .map(|part| {
                part.split(" and ")
                    .map(parse_clause)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Guard {
            source: source.to_string(),
            disjuncts,
        }))
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        self.disjuncts
            .iter()
            .any(|conj| conj.iter().all(|clause| clause.evaluate(ctx)))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn disjuncts(&self) -> &[Vec<Clause>] {
        &self.disjuncts
    }
}

/// Evaluate an expression against a context in one step.
///
/// Blank expressions are true. Expressions that fail to compile are false.
pub fn evaluate_condition(expr: &str, ctx: &ExecutionContext) -> bool {
    match Guard::parse(expr) {
        Ok(Some(guard)) => guard.evaluate(ctx),
        Ok(None) => true,
        Err(_) => false,
    }
}

fn parse_clause(clause: &str) -> Result<Clause, String> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Err("empty clause".into());
    }

    if let Some((left, right)) = clause.split_once(" in ") {
        let path = parse_path(left)?;
        let right = right.trim();
        let inner = right
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| format!("'{}' is not a bracketed list", right))?
            .trim();
        let items = if inner.is_empty() {
            vec![]
        } else {
            inner.split(',').map(strip_quotes).collect()
        };
        return Ok(Clause::In { path, items });
    }

    if let Some((left, right)) = clause.split_once("==") {
        let path = parse_path(left)?;
        let right = right.trim();
        let literal = match parse_bool_keyword(right) {
            Some(b) => Literal::Bool(b),
            None => Literal::Text(unquote(right).to_string()),
        };
        return Ok(Clause::Eq { path, literal });
    }

    Ok(Clause::Truthy {
        path: parse_path(clause)?,
    })
}

fn parse_path(raw: &str) -> Result<String, String> {
    let path = raw.trim();
    if path.is_empty() {
        return Err("missing path".into());
    }
    if path.contains(char::is_whitespace) {
        return Err(format!("unsupported clause '{}'", path));
    }
    Ok(path.to_string())
}

fn parse_bool_keyword(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Strip one pair of matching surrounding quotes.
fn unquote(s: &str) -> &str {
    for q in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// List items drop every surrounding quote character.
fn strip_quotes(item: &str) -> String {
    item.trim().trim_matches('\'').trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> ExecutionContext {
        ExecutionContext::from_json(value).unwrap()
    }

    #[test]
    fn test_blank_is_true() {
        let ctx = ExecutionContext::new();
        assert!(evaluate_condition("", &ctx));
        assert!(evaluate_condition("   ", &ctx));
        assert_eq!(Guard::parse(" ").unwrap(), None);
    }

    #[test]
    fn test_string_equality() {
        let ctx = ctx(json!({"trust_tier": "BRONZE"}));
        assert!(!evaluate_condition("trust_tier == 'GOLD'", &ctx));
        assert!(evaluate_condition("trust_tier == 'BRONZE'", &ctx));
        assert!(evaluate_condition(r#"trust_tier == "BRONZE""#, &ctx));
        assert!(evaluate_condition("trust_tier == BRONZE", &ctx));
    }

    #[test]
    fn test_bool_keyword_uses_truthiness() {
        let ctx = ctx(json!({"credit_ok": true, "lines": 3, "blocked": 0}));
        assert!(evaluate_condition("credit_ok == true", &ctx));
        assert!(evaluate_condition("credit_ok == YES", &ctx));
        assert!(evaluate_condition("lines == 1", &ctx));
        assert!(evaluate_condition("blocked == false", &ctx));
        assert!(evaluate_condition("missing == no", &ctx));
        assert!(!evaluate_condition("missing == 1", &ctx));
    }

    #[test]
    fn test_membership() {
        let ctx = ctx(json!({"decision": {"action": "CS_REVIEW"}, "qty": 5}));
        assert!(evaluate_condition(
            "decision.action in ['CS_REVIEW', \"HOLD\"]",
            &ctx
        ));
        assert!(!evaluate_condition("decision.action in [AUTO_POST]", &ctx));
        assert!(evaluate_condition("qty in [4, 5]", &ctx));
        assert!(!evaluate_condition("decision.action in []", &ctx));
    }

    #[test]
    fn test_membership_on_boolean_value() {
        let ctx = ctx(json!({"approved": true, "rejected": false}));
        assert!(evaluate_condition("approved in [True, False]", &ctx));
        assert!(evaluate_condition("rejected in ['False']", &ctx));
        assert!(!evaluate_condition("approved in [False]", &ctx));
        assert!(evaluate_condition("approved == True", &ctx));
    }

    #[test]
    fn test_membership_missing_renders_none() {
        let ctx = ExecutionContext::new();
        assert!(evaluate_condition("customer.id in [None, '']", &ctx));
        assert!(!evaluate_condition("customer.id in [ACME]", &ctx));
    }

    #[test]
    fn test_truthy_path() {
        let ctx = ctx(json!({"has_pdf": true, "issues": [], "email": {"body": "hi"}}));
        assert!(evaluate_condition("has_pdf", &ctx));
        assert!(!evaluate_condition("issues", &ctx));
        assert!(evaluate_condition("email.body", &ctx));
        assert!(!evaluate_condition("email.subject", &ctx));
    }

    #[test]
    fn test_or_of_ands_precedence() {
        let ctx = ctx(json!({"a": true, "b": false, "c": true}));
        // (a and b) or c
        assert!(evaluate_condition("a and b or c", &ctx));
        // a and (b or c) would also be true; this one separates the readings:
        // (b) or (c and b)
        assert!(!evaluate_condition("b or c and b", &ctx));
        assert!(evaluate_condition("a and c", &ctx));
    }

    #[test]
    fn test_qualified_collision_key_is_visible() {
        let ctx = ctx(json!({"issues": ["x"], "validate.issues": ["y"]}));
        assert!(evaluate_condition("validate.issues", &ctx));
    }

    #[test]
    fn test_compile_errors() {
        assert!(Guard::parse("status in CS_REVIEW").is_err());
        assert!(Guard::parse("a and  and b").is_err());
        assert!(Guard::parse("== x").is_err());
        assert!(Guard::parse("a != b").is_err());
        assert!(!evaluate_condition("status in CS_REVIEW", &ExecutionContext::new()));
    }

    #[test]
    fn test_compiled_shape() {
        let guard = Guard::parse("a == 'x' and b or c in [1, 2]").unwrap().unwrap();
        assert_eq!(guard.source(), "a == 'x' and b or c in [1, 2]");
        assert_eq!(
            guard.disjuncts(),
            &[
                vec![
                    Clause::Eq {
                        path: "a".into(),
                        literal: Literal::Text("x".into())
                    },
                    Clause::Truthy { path: "b".into() },
                ],
                vec![Clause::In {
                    path: "c".into(),
                    items: vec!["1".into(), "2".into()]
                }],
            ]
        );
    }
}
