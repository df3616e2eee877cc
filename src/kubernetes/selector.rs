// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Compiled label selectors for discovery scoping
//!
//! Converts `LabelSelector` specs (as found in mesh config `discoverySelectors`)
//! into evaluable selectors, validating keys, values and operators the same way
//! the API server does.
//!
//! ## Semantics
//!
//! - Requirements inside one selector are AND-combined
//! - Selectors inside a [`SelectorSet`] are OR-combined
//! - An empty [`SelectorSet`] selects every namespace
//! - A selector with no requirements matches every namespace

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum length of a label value and of the name part of a label key
const MAX_NAME_LENGTH: usize = 63;

/// Maximum length of the DNS subdomain prefix of a label key
const MAX_PREFIX_LENGTH: usize = 253;

/// Name part of a qualified label key, also the format of label values
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("valid name regex")
});

/// DNS-1123 subdomain, used for the optional key prefix
static PREFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid prefix regex")
});

/// Errors raised while compiling a selector spec
///
/// `index` is the position of the offending selector in the list passed to
/// [`SelectorSet::compile`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("selector {index}: invalid label key {key:?}: {reason}")]
    InvalidKey {
        index: usize,
        key: String,
        reason: &'static str,
    },

    #[error("selector {index}: invalid value {value:?} for key {key:?}: {reason}")]
    InvalidValue {
        index: usize,
        key: String,
        value: String,
        reason: &'static str,
    },

    #[error("selector {index}: {operator:?} is not a valid label selector operator")]
    UnknownOperator { index: usize, operator: String },

    #[error("selector {index}: values must be non-empty for operator {operator} on key {key:?}")]
    MissingValues {
        index: usize,
        key: String,
        operator: Operator,
    },

    #[error("selector {index}: values must be empty for operator {operator} on key {key:?}")]
    UnexpectedValues {
        index: usize,
        key: String,
        operator: Operator,
    },
}

/// Label selector operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `key=value`, produced by `matchLabels`
    Equals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "In" => Some(Self::In),
            "NotIn" => Some(Self::NotIn),
            "Exists" => Some(Self::Exists),
            "DoesNotExist" => Some(Self::DoesNotExist),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "=",
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
        };
        f.write_str(s)
    }
}

/// A single label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, joined()),
            Operator::In => write!(f, "{} in ({})", self.key, joined()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, joined()),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A compiled label selector: all requirements must hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Compile a `LabelSelector` spec
    ///
    /// `index` is only used to annotate errors.
    pub fn compile(index: usize, spec: &LabelSelector) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();

        for (key, value) in spec.match_labels.iter().flatten() {
            validate_key(index, key)?;
            validate_value(index, key, value)?;
            requirements.push(Requirement {
                key: key.clone(),
                operator: Operator::Equals,
                values: BTreeSet::from([value.clone()]),
            });
        }

        for expr in spec.match_expressions.iter().flatten() {
            let operator =
                Operator::parse(&expr.operator).ok_or_else(|| SelectorError::UnknownOperator {
                    index,
                    operator: expr.operator.clone(),
                })?;
            validate_key(index, &expr.key)?;

            let values = expr.values.as_deref().unwrap_or_default();
            match operator {
                Operator::In | Operator::NotIn if values.is_empty() => {
                    return Err(SelectorError::MissingValues {
                        index,
                        key: expr.key.clone(),
                        operator,
                    });
                }
                Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                    return Err(SelectorError::UnexpectedValues {
                        index,
                        key: expr.key.clone(),
                        operator,
                    });
                }
                _ => {}
            }
            for value in values {
                validate_value(index, &expr.key, value)?;
            }

            requirements.push(Requirement {
                key: expr.key.clone(),
                operator,
                values: values.iter().cloned().collect(),
            });
        }

        // Stable ordering keeps Display output deterministic
        requirements.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Check whether every requirement holds for `labels`
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requirements.is_empty() {
            return f.write_str("<everything>");
        }
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

/// Ordered, OR-combined collection of selectors
///
/// An empty set selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorSet {
    selectors: Vec<Selector>,
}

impl SelectorSet {
    /// Compile all specs, failing on the first malformed one
    pub fn compile(specs: &[LabelSelector]) -> Result<Self, SelectorError> {
        let selectors = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| Selector::compile(index, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.selectors.iter()
    }

    /// True if the set is empty or any selector matches
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.selectors.is_empty() || self.selectors.iter().any(|s| s.matches(labels))
    }
}

impl fmt::Display for SelectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.selectors.is_empty() {
            return f.write_str("<all namespaces>");
        }
        let parts: Vec<String> = self.selectors.iter().map(|s| format!("[{}]", s)).collect();
        f.write_str(&parts.join(" OR "))
    }
}

fn validate_key(index: usize, key: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidKey {
        index,
        key: key.to_string(),
        reason,
    };

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() {
                return Err(invalid("prefix part must be non-empty"));
            }
            if prefix.len() > MAX_PREFIX_LENGTH {
                return Err(invalid("prefix part must be no more than 253 characters"));
            }
            if !PREFIX_PATTERN.is_match(prefix) {
                return Err(invalid("prefix part must be a lowercase DNS-1123 subdomain"));
            }
            name
        }
        None => key,
    };

    if name.is_empty() {
        return Err(invalid("name part must be non-empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid("name part must be no more than 63 characters"));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(invalid(
            "name part must consist of alphanumerics, '-', '_' or '.', and start and end with an alphanumeric",
        ));
    }
    Ok(())
}

fn validate_value(index: usize, key: &str, value: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidValue {
        index,
        key: key.to_string(),
        value: value.to_string(),
        reason,
    };

    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(invalid("must be no more than 63 characters"));
    }
    if !NAME_PATTERN.is_match(value) {
        return Err(invalid(
            "must consist of alphanumerics, '-', '_' or '.', and start and end with an alphanumeric",
        ));
    }
    Ok(())
}
