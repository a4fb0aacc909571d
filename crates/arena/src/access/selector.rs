//! Label and field selector parsing.
//!
//! Selectors use the control-plane syntax: comma separated requirements, all
//! of which must hold. Label requirements support `k=v`, `k==v`, `k!=v`,
//! `k in (a,b)`, `k notin (a,b)`, `k` and `!k`; field requirements support
//! `=`, `==` and `!=`.

use core::error::Error;
use std::collections::BTreeMap;

use error_stack::Report;
use kube::api::DynamicObject;
use serde_json::Value;

#[derive(Debug, derive_more::Display)]
pub enum SelectorError {
    #[display("invalid selector `{input}`: {reason}")]
    Invalid { input: String, reason: String },
}

impl Error for SelectorError {}

fn invalid(input: &str, reason: impl Into<String>) -> Report<SelectorError> {
    Report::new(SelectorError::Invalid {
        input: input.to_string(),
        reason: reason.into(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single label requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotEquals | Operator::NotIn => {
                value.map_or(true, |v| !self.values.contains(v))
            }
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// Parsed label selector. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// # Errors
    ///
    /// - [`SelectorError::Invalid`] if any requirement is malformed
    pub fn parse(input: &str) -> Result<Self, Report<SelectorError>> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let terms = split_terms(input).map_err(|reason| invalid(input, reason))?;
        let requirements = terms
            .into_iter()
            .map(|term| parse_requirement(term.trim()).map_err(|reason| invalid(input, reason)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    /// Equality selector over every pair of `labels`.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let requirements = labels
            .into_iter()
            .map(|(key, value)| Requirement {
                key: key.to_string(),
                operator: Operator::Equals,
                values: vec![value.to_string()],
            })
            .collect();
        Self { requirements }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Matches against optional labels, treating `None` as no labels.
    pub fn matches_opt(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        match labels {
            Some(labels) => self.matches(labels),
            None => self.matches(&BTreeMap::new()),
        }
    }
}

fn split_terms(input: &str) -> Result<Vec<&str>, String> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced parentheses".to_string())?;
            }
            ',' if depth == 0 => {
                terms.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced parentheses".to_string());
    }
    terms.push(&input[start..]);
    Ok(terms)
}

fn parse_requirement(term: &str) -> Result<Requirement, String> {
    if term.is_empty() {
        return Err("empty requirement".to_string());
    }

    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::DoesNotExist,
            values: Vec::new(),
        });
    }

    if let Some(open) = term.find('(') {
        let Some(inner) = term[open + 1..].strip_suffix(')') else {
            return Err(format!("expected `)` at the end of `{term}`"));
        };
        let mut head = term[..open].split_whitespace();
        let (Some(key), Some(op), None) = (head.next(), head.next(), head.next()) else {
            return Err(format!("expected `<key> in|notin (...)`, got `{term}`"));
        };
        let operator = match op {
            "in" => Operator::In,
            "notin" => Operator::NotIn,
            other => return Err(format!("unknown set operator `{other}`")),
        };
        validate_key(key)?;
        if inner.trim().is_empty() {
            return Err(format!("`{op}` requires at least one value"));
        }
        let values = inner
            .split(',')
            .map(|v| {
                let v = v.trim();
                validate_value(v).map(|()| v.to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Requirement {
            key: key.to_string(),
            operator,
            values,
        });
    }

    let (key, operator, value) = if let Some((k, v)) = term.split_once("!=") {
        (k, Operator::NotEquals, Some(v))
    } else if let Some((k, v)) = term.split_once("==") {
        (k, Operator::Equals, Some(v))
    } else if let Some((k, v)) = term.split_once('=') {
        (k, Operator::Equals, Some(v))
    } else {
        (term, Operator::Exists, None)
    };

    let key = key.trim();
    validate_key(key)?;
    let values = match value {
        Some(v) => {
            let v = v.trim();
            validate_value(v)?;
            vec![v.to_string()]
        }
        None => Vec::new(),
    };
    Ok(Requirement {
        key: key.to_string(),
        operator,
        values,
    })
}

fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    if key.matches('/').count() > 1 {
        return Err(format!("label key `{key}` has more than one `/`"));
    }
    let valid = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !valid {
        return Err(format!("invalid character in label key `{key}`"));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), String> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid || value.len() > 63 {
        return Err(format!("invalid label value `{value}`"));
    }
    Ok(())
}

/// A single field requirement, `path=value` or `path!=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    path: String,
    value: String,
    negated: bool,
}

/// Parsed field selector. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    /// # Errors
    ///
    /// - [`SelectorError::Invalid`] if any requirement lacks an operator or has a bad path
    pub fn parse(input: &str) -> Result<Self, Report<SelectorError>> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut requirements = Vec::new();
        for term in input.split(',') {
            let term = term.trim();
            let (path, value, negated) = if let Some((p, v)) = term.split_once("!=") {
                (p, v, true)
            } else if let Some((p, v)) = term.split_once("==") {
                (p, v, false)
            } else if let Some((p, v)) = term.split_once('=') {
                (p, v, false)
            } else {
                return Err(invalid(input, format!("`{term}` has no operator")));
            };

            let path = path.trim();
            let valid_path = !path.is_empty()
                && path
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
            if !valid_path {
                return Err(invalid(input, format!("invalid field path `{path}`")));
            }
            requirements.push(FieldRequirement {
                path: path.to_string(),
                value: value.trim().to_string(),
                negated,
            });
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The value required by a positive requirement on `path`, if any.
    pub fn exact_value(&self, path: &str) -> Option<&str> {
        self.requirements
            .iter()
            .find(|r| !r.negated && r.path == path)
            .map(|r| r.value.as_str())
    }

    pub fn matches(&self, object: &DynamicObject) -> bool {
        self.requirements.iter().all(|r| {
            let actual = field_value(object, &r.path).unwrap_or_default();
            (actual == r.value) != r.negated
        })
    }
}

/// Reads a dotted field path from an object, e.g. `spec.nodeName`.
///
/// Scalars are rendered as strings; objects, arrays and nulls yield `None`.
pub fn field_value(object: &DynamicObject, path: &str) -> Option<String> {
    match path {
        "metadata.name" => return object.metadata.name.clone(),
        "metadata.namespace" => return object.metadata.namespace.clone(),
        _ => {}
    }

    let mut current = &object.data;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
