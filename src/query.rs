//! Comma-separated entry queries.
//!
//! Each clause is one of:
//!
//! * `key OP value` with `OP` one of `==` `=` `!=` `<>` `<` `>` `<=` `>=`
//!   `:` (list contains) `!:` (list does not contain);
//! * `key.` (present), `key?` or `key+` (truthy), `key-` (falsy);
//! * `tag`, `!tag`, `^tag` or `-tag` for presence or absence in `tags`.
//!
//! Keys are dotted paths resolved with `dig`; a missing path counts as absent.

use std::fmt;
use std::str::FromStr;

use crate::context::Context;
use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::TAGS_KEY;
use crate::value::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
    NotContains,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Present,
    Truthy,
    Falsy,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    Tag { tag: String, negated: bool },
    Compare { key: String, op: CompareOp, value: Value },
    Unary { key: String, op: UnaryOp },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    source: String,
    clauses: Vec<Clause>,
}

// Longer operators first so `<=` is not read as `<`.
const BINARY_OPS: [(&str, CompareOp); 10] = [
    ("==", CompareOp::Eq),
    ("!=", CompareOp::Ne),
    ("<>", CompareOp::Ne),
    ("<=", CompareOp::Le),
    (">=", CompareOp::Ge),
    ("!:", CompareOp::NotContains),
    ("=", CompareOp::Eq),
    ("<", CompareOp::Lt),
    (">", CompareOp::Gt),
    (":", CompareOp::Contains),
];

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key.chars().all(|c| is_word(c) || c == '.')
        && key.chars().last().is_some_and(is_word)
}

fn malformed(clause: &str, reason: &str) -> Error {
    Error::MalformedQuery {
        clause: clause.to_string(),
        reason: reason.to_string(),
    }
}

impl Clause {
    pub fn parse(text: &str) -> Result<Clause> {
        let clause = text.trim();
        if let Some(parsed) = Self::parse_binary(clause) {
            return Ok(parsed);
        }
        if let Some((key, op)) = Self::parse_unary(clause) {
            return Ok(Clause::Unary {
                key: key.to_string(),
                op,
            });
        }
        let (negated, tag) = match clause.chars().next() {
            Some('!' | '^' | '-') => (true, &clause[1..]),
            _ => (false, clause),
        };
        if !tag.is_empty() && tag.chars().all(is_word) {
            return Ok(Clause::Tag {
                tag: tag.to_string(),
                negated,
            });
        }
        Err(malformed(clause, "neither a comparison, a unary test nor a tag"))
    }

    fn parse_binary(clause: &str) -> Option<Clause> {
        let key_end = clause
            .find(|c: char| !(is_word(c) || c == '.'))
            .unwrap_or(clause.len());
        let (key, rest) = clause.split_at(key_end);
        if !is_key(key) {
            return None;
        }
        BINARY_OPS.iter().find_map(|(symbol, op)| {
            let value = rest.strip_prefix(symbol)?;
            (!value.is_empty()).then(|| Clause::Compare {
                key: key.to_string(),
                op: *op,
                value: Value::coerce_scalar(value),
            })
        })
    }

    fn parse_unary(clause: &str) -> Option<(&str, UnaryOp)> {
        let op = match clause.chars().last()? {
            '.' => UnaryOp::Present,
            '?' | '+' => UnaryOp::Truthy,
            '-' => UnaryOp::Falsy,
            _ => return None,
        };
        let key = &clause[..clause.len() - 1];
        is_key(key).then_some((key, op))
    }

    fn holds(&self, kernel: &mut Kernel, entry: EntryId) -> Result<bool> {
        let ctx = Context::new();
        Ok(match self {
            Clause::Tag { tag, negated } => {
                let tags = kernel.dig(entry, TAGS_KEY, &ctx)?;
                let present = match &tags {
                    Some(Value::List(items)) => items.iter().any(|item| item.as_str() == Some(tag.as_str())),
                    _ => false,
                };
                present != *negated
            }
            Clause::Unary { key, op } => {
                let found = kernel.dig(entry, key, &ctx)?;
                match op {
                    UnaryOp::Present => found.is_some_and(|value| !value.is_null()),
                    UnaryOp::Truthy => found.is_some_and(|value| value.truthy()),
                    UnaryOp::Falsy => !found.is_some_and(|value| value.truthy()),
                }
            }
            Clause::Compare { key, op, value } => {
                let found = kernel.dig(entry, key, &ctx)?;
                compare(found.as_ref(), *op, value)
            }
        })
    }
}

fn compare(found: Option<&Value>, op: CompareOp, wanted: &Value) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};

    let Some(found) = found else {
        return op == CompareOp::Ne;
    };
    match op {
        CompareOp::Eq => found.loose_eq(wanted),
        CompareOp::Ne => !found.loose_eq(wanted),
        CompareOp::Lt => found.loose_cmp(wanted) == Some(Less),
        CompareOp::Gt => found.loose_cmp(wanted) == Some(Greater),
        CompareOp::Le => matches!(found.loose_cmp(wanted), Some(Less | Equal)),
        CompareOp::Ge => matches!(found.loose_cmp(wanted), Some(Greater | Equal)),
        CompareOp::Contains => found
            .as_list()
            .is_some_and(|items| items.iter().any(|item| item.loose_eq(wanted))),
        CompareOp::NotContains => found
            .as_list()
            .is_some_and(|items| !items.iter().any(|item| item.loose_eq(wanted))),
    }
}

impl Query {
    pub fn parse(text: &str) -> Result<Query> {
        let clauses = text
            .split(',')
            .map(Clause::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Query {
            source: text.to_string(),
            clauses,
        })
    }

    /// A query given as text, or as a list of clause texts.
    pub fn from_value(value: &Value) -> Result<Query> {
        match value {
            Value::Text(text) => Query::parse(text),
            Value::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Text(text) => parts.push(text.as_str()),
                        other => return Err(malformed(&other.canonical(), "clause must be text")),
                    }
                }
                Query::parse(&parts.join(","))
            }
            other => Err(malformed(&other.canonical(), "query must be text or a list")),
        }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn positive_tags(&self) -> Vec<&str> {
        self.clauses
            .iter()
            .filter_map(|clause| match clause {
                Clause::Tag { tag, negated: false } => Some(tag.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Equality clauses as a map, handed to producers as parameters.
    pub fn equalities(&self) -> Map {
        self.clauses
            .iter()
            .filter_map(|clause| match clause {
                Clause::Compare {
                    key,
                    op: CompareOp::Eq,
                    value,
                } => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    /// True when every clause holds for `entry`.
    pub fn matches(&self, kernel: &mut Kernel, entry: EntryId) -> Result<bool> {
        for clause in &self.clauses {
            if !clause.holds(kernel, entry)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl FromStr for Query {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Query::parse(s)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryBuilder;
    use serde_json::json;

    #[test]
    fn parses_every_clause_shape() {
        let query = Query::parse("a,!c,b=5,x.y<=2.5,n!:3,flag?,gone-,here.").unwrap();
        assert_eq!(
            query.clauses(),
            [
                Clause::Tag { tag: "a".into(), negated: false },
                Clause::Tag { tag: "c".into(), negated: true },
                Clause::Compare { key: "b".into(), op: CompareOp::Eq, value: Value::Int(5) },
                Clause::Compare { key: "x.y".into(), op: CompareOp::Le, value: Value::Float(2.5) },
                Clause::Compare { key: "n".into(), op: CompareOp::NotContains, value: Value::Int(3) },
                Clause::Unary { key: "flag".into(), op: UnaryOp::Truthy },
                Clause::Unary { key: "gone".into(), op: UnaryOp::Falsy },
                Clause::Unary { key: "here".into(), op: UnaryOp::Present },
            ]
        );
        assert_eq!(query.positive_tags(), ["a"]);
    }

    #[test]
    fn malformed_clause_is_rejected() {
        assert!(matches!(Query::parse("a,,b"), Err(Error::MalformedQuery { .. })));
        assert!(matches!(Query::parse("b="), Err(Error::MalformedQuery { .. })));
        assert!(matches!(Query::parse("@x"), Err(Error::MalformedQuery { .. })));
    }

    fn tagged(kernel: &mut Kernel, data: serde_json::Value) -> EntryId {
        let Value::Map(map) = Value::from(data) else { unreachable!() };
        kernel.create(EntryBuilder::new().params(map))
    }

    #[test]
    fn tags_and_comparisons_combine() {
        let mut kernel = Kernel::default();
        let yes = tagged(&mut kernel, json!({"tags": ["a", "b"], "b": 5}));
        let has_c = tagged(&mut kernel, json!({"tags": ["a", "c"], "b": 5}));
        let wrong_b = tagged(&mut kernel, json!({"tags": ["a"], "b": 6}));
        let query = Query::parse("a,!c,b=5").unwrap();
        assert!(query.matches(&mut kernel, yes).unwrap());
        assert!(!query.matches(&mut kernel, has_c).unwrap());
        assert!(!query.matches(&mut kernel, wrong_b).unwrap());
    }

    #[test]
    fn absent_values_follow_comparison_rules() {
        let mut kernel = Kernel::default();
        let entry = tagged(&mut kernel, json!({"n": 3}));
        let holds = |kernel: &mut Kernel, q: &str| Query::parse(q).unwrap().matches(kernel, entry).unwrap();
        assert!(holds(&mut kernel, "missing!=1"));
        assert!(!holds(&mut kernel, "missing<1"));
        assert!(!holds(&mut kernel, "missing:1"));
        assert!(holds(&mut kernel, "missing-"));
        assert!(!holds(&mut kernel, "missing."));
        assert!(holds(&mut kernel, "n>=3"));
        assert!(!holds(&mut kernel, "n:3"));
        assert!(holds(&mut kernel, "!anytag"));
    }

    #[test]
    fn list_form_joins_clauses() {
        let value = Value::from(json!(["a", "b=5"]));
        let query = Query::from_value(&value).unwrap();
        assert_eq!(query.clauses().len(), 2);
        assert_eq!(query.equalities()["b"], Value::Int(5));
    }
}
