// Copyright 2025 OCL Index Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Collection references and reference diffing
//!
//! A reference is a collection's declared link to a concept or mapping,
//! written as an expression (the resource URI). Two reference lists are
//! compared as sets keyed by normalized expression; list position never
//! matters.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::ids::Identifier;

/// Token that selects every concept or mapping of a container.
pub const WILDCARD: &str = "*";

/// A collection's link to one or more resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReference {
    pub expression: String,
    #[serde(default)]
    pub concepts: Vec<Identifier>,
    #[serde(default)]
    pub mappings: Vec<Identifier>,
}

impl CollectionReference {
    pub fn new(expression: impl AsRef<str>) -> Self {
        Self {
            expression: normalize_expression(expression.as_ref()),
            concepts: Vec::new(),
            mappings: Vec::new(),
        }
    }

    pub fn with_concept(mut self, id: Identifier) -> Self {
        self.concepts.push(id);
        self
    }

    pub fn with_mapping(mut self, id: Identifier) -> Self {
        self.mappings.push(id);
        self
    }

    /// Set key used for diffing.
    pub fn key(&self) -> String {
        normalize_expression(&self.expression)
    }
}

/// Normalize an expression so that `a/b`, `/a/b` and `/a/b/ ` compare equal.
pub fn normalize_expression(expression: &str) -> String {
    let trimmed = expression.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    format!("/{trimmed}/")
}

/// Result of comparing a new reference list against the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDiff {
    pub added: Vec<CollectionReference>,
    pub removed: Vec<CollectionReference>,
}

impl ReferenceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Every reference touched by the change, added first.
    pub fn changed(&self) -> impl Iterator<Item = &CollectionReference> {
        self.added.iter().chain(self.removed.iter())
    }

    pub fn added_keys(&self) -> Vec<String> {
        self.added.iter().map(CollectionReference::key).collect()
    }

    pub fn removed_keys(&self) -> Vec<String> {
        self.removed.iter().map(CollectionReference::key).collect()
    }
}

/// Compute which references were added to and removed from a collection.
///
/// Output keeps the first-appearance order of each input and contains each
/// expression at most once.
pub fn diff(
    new_refs: &[CollectionReference],
    old_refs: &[CollectionReference],
) -> ReferenceDiff {
    ReferenceDiff {
        added: set_difference(new_refs, old_refs),
        removed: set_difference(old_refs, new_refs),
    }
}

fn set_difference(
    left: &[CollectionReference],
    right: &[CollectionReference],
) -> Vec<CollectionReference> {
    let exclude: HashSet<String> = right.iter().map(CollectionReference::key).collect();
    let mut seen = HashSet::new();
    left.iter()
        .filter(|r| {
            let key = r.key();
            !exclude.contains(&key) && seen.insert(key)
        })
        .cloned()
        .collect()
}

/// Either every resource of a container or an explicit expression list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "SelectorRepr", into = "SelectorRepr")]
pub enum ExpressionSelector {
    All,
    List(Vec<String>),
    #[default]
    Empty,
}

impl ExpressionSelector {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Token(String),
    List(Vec<String>),
}

impl From<SelectorRepr> for ExpressionSelector {
    fn from(repr: SelectorRepr) -> Self {
        match repr {
            SelectorRepr::Token(t) if t.trim() == WILDCARD || t.trim().eq_ignore_ascii_case("all") => {
                ExpressionSelector::All
            }
            SelectorRepr::Token(t) if t.trim().is_empty() => ExpressionSelector::Empty,
            SelectorRepr::Token(t) => ExpressionSelector::List(vec![t]),
            SelectorRepr::List(list) if list.is_empty() => ExpressionSelector::Empty,
            SelectorRepr::List(list) => ExpressionSelector::List(list),
        }
    }
}

impl From<ExpressionSelector> for SelectorRepr {
    fn from(selector: ExpressionSelector) -> Self {
        match selector {
            ExpressionSelector::All => SelectorRepr::Token(WILDCARD.to_string()),
            ExpressionSelector::List(list) => SelectorRepr::List(list),
            ExpressionSelector::Empty => SelectorRepr::List(Vec::new()),
        }
    }
}

/// Bulk add-references request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceBatchRequest {
    /// Plain expressions, always added as-is
    pub expressions: Vec<String>,
    pub concepts: ExpressionSelector,
    pub mappings: ExpressionSelector,
    /// Container to expand wildcards against
    pub uri: Option<String>,
}

impl ReferenceBatchRequest {
    pub fn expressions(expressions: Vec<String>) -> Self {
        Self {
            expressions,
            ..Default::default()
        }
    }

    pub fn needs_expansion(&self) -> bool {
        self.concepts.is_all() || self.mappings.is_all()
    }
}

/// An expression rejected while saving a collection's reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceError {
    pub expression: String,
    pub message: String,
}

impl ReferenceError {
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.expression, self.message)
    }
}
