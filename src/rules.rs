//! Rule catalog and materializer
//!
//! The catalog holds the stored rule configuration (rules, valid value sets,
//! rule sets and validation sets) and turns rule records into [`Evaluator`]s.
//! Loading a catalog checks that identifiers are unique, that every reference
//! points at something that exists, and that Conditional rules do not refer
//! back to themselves through any chain of condition/requirement links.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuleConfigError, RuleConfigResult, ValidationError};
use crate::evaluator::Evaluator;

/// Rule type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    #[serde(alias = "ExistsRule")]
    Exists,
    #[serde(alias = "ValueInListRule")]
    ValueInList,
    #[serde(alias = "AnyOfRule")]
    AnyOf,
    #[serde(alias = "OneOfRule")]
    OneOf,
    #[serde(alias = "ContentMatchesExpressionRule")]
    ContentMatchesExpression,
    #[serde(alias = "ConditionalRule")]
    Conditional,
    #[serde(alias = "ValidUrlRule")]
    ValidUrl,
}

/// Number of XPaths a rule kind carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XPathArity {
    None,
    Exactly(usize),
    AtLeast(usize),
}

impl XPathArity {
    pub fn admits(self, count: usize) -> bool {
        match self {
            XPathArity::None => count == 0,
            XPathArity::Exactly(n) => count == n,
            XPathArity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for XPathArity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathArity::None => write!(f, "no"),
            XPathArity::Exactly(n) => write!(f, "exactly {}", n),
            XPathArity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

impl RuleKind {
    pub fn xpath_arity(self) -> XPathArity {
        match self {
            RuleKind::Exists
            | RuleKind::ValueInList
            | RuleKind::ContentMatchesExpression
            | RuleKind::ValidUrl => XPathArity::Exactly(1),
            RuleKind::AnyOf | RuleKind::OneOf => XPathArity::AtLeast(2),
            RuleKind::Conditional => XPathArity::None,
        }
    }

    pub fn uses_regex(self) -> bool {
        self == RuleKind::ContentMatchesExpression
    }

    pub fn uses_values(self) -> bool {
        self == RuleKind::ValueInList
    }

    pub fn uses_sub_rules(self) -> bool {
        self == RuleKind::Conditional
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuleKind::Exists => "Exists",
            RuleKind::ValueInList => "ValueInList",
            RuleKind::AnyOf => "AnyOf",
            RuleKind::OneOf => "OneOf",
            RuleKind::ContentMatchesExpression => "ContentMatchesExpression",
            RuleKind::Conditional => "Conditional",
            RuleKind::ValidUrl => "ValidUrl",
        };
        f.write_str(label)
    }
}

/// A stored rule configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xpaths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// Id of the valid values set (ValueInList only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_rule: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

impl RuleRecord {
    pub fn regex(&self) -> Option<&str> {
        present(&self.regex)
    }

    pub fn values_set(&self) -> Option<&str> {
        present(&self.values)
    }

    pub fn condition(&self) -> Option<&str> {
        present(&self.condition_rule)
    }

    pub fn requirement(&self) -> Option<&str> {
        present(&self.requirement_rule)
    }

    /// Check that exactly the payload fields the rule's type needs are set.
    pub fn check_payload(&self) -> RuleConfigResult<()> {
        let kind = self.kind;
        let arity = kind.xpath_arity();
        if !arity.admits(self.xpaths.len()) {
            return Err(RuleConfigError::XPathCount {
                rule: self.name.clone(),
                kind: kind.to_string(),
                expected: arity.to_string(),
                found: self.xpaths.len(),
            });
        }

        let check = |used: bool, set: bool, field: &str| -> RuleConfigResult<()> {
            match (used, set) {
                (true, false) => Err(RuleConfigError::MissingField {
                    rule: self.name.clone(),
                    kind: kind.to_string(),
                    field: field.to_string(),
                }),
                (false, true) => Err(RuleConfigError::UnexpectedField {
                    rule: self.name.clone(),
                    kind: kind.to_string(),
                    field: field.to_string(),
                }),
                _ => Ok(()),
            }
        };

        check(kind.uses_regex(), self.regex().is_some(), "a regular expression")?;
        check(kind.uses_values(), self.values_set().is_some(), "a valid values set")?;
        check(
            kind.uses_sub_rules(),
            self.condition().is_some(),
            "a condition rule",
        )?;
        check(
            kind.uses_sub_rules(),
            self.requirement().is_some(),
            "a requirement rule",
        )?;
        Ok(())
    }
}

/// Named, ordered list of allowed values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidValuesSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    /// Rule ids, in report order
    #[serde(default)]
    pub rules: Vec<String>,
}

/// A recurring harvest target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    pub ruleset: String,
}

/// On-disk layout of a catalog file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFile {
    pub rules: Vec<RuleRecord>,
    pub value_sets: Vec<ValidValuesSet>,
    pub rulesets: Vec<RuleSet>,
    pub validation_sets: Vec<ValidationSet>,
}

/// Indexed, reference-checked rule configuration
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    rules: HashMap<String, RuleRecord>,
    rule_order: Vec<String>,
    value_sets: HashMap<String, ValidValuesSet>,
    rulesets: HashMap<String, RuleSet>,
    validation_sets: Vec<ValidationSet>,
}

fn index_unique<T>(
    items: Vec<T>,
    kind: &str,
    id: impl Fn(&T) -> &str,
) -> RuleConfigResult<HashMap<String, T>> {
    let mut index = HashMap::with_capacity(items.len());
    for item in items {
        let key = id(&item).to_string();
        if index.contains_key(&key) {
            return Err(RuleConfigError::DuplicateId {
                kind: kind.to_string(),
                id: key,
            });
        }
        index.insert(key, item);
    }
    Ok(index)
}

impl RuleCatalog {
    /// Build a catalog, checking ids, references and Conditional cycles.
    pub fn from_file(file: CatalogFile) -> RuleConfigResult<Self> {
        let rule_order: Vec<String> = file.rules.iter().map(|r| r.id.clone()).collect();
        let rules = index_unique(file.rules, "rule", |r| &r.id)?;
        let value_sets = index_unique(file.value_sets, "valid values set", |v| &v.id)?;
        let rulesets = index_unique(file.rulesets, "rule set", |r| &r.id)?;

        let mut seen_sets = HashSet::new();
        for set in &file.validation_sets {
            if !seen_sets.insert(set.id.as_str()) {
                return Err(RuleConfigError::DuplicateId {
                    kind: "validation set".to_string(),
                    id: set.id.clone(),
                });
            }
        }

        let catalog = RuleCatalog {
            rules,
            rule_order,
            value_sets,
            rulesets,
            validation_sets: file.validation_sets,
        };
        catalog.check_references()?;
        catalog.check_acyclic()?;
        Ok(catalog)
    }

    /// Load a catalog from a TOML or JSON file (chosen by extension).
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let file: CatalogFile = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                ValidationError::Config(format!(
                    "Failed to parse rule catalog {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                ValidationError::Config(format!(
                    "Failed to parse rule catalog {}: {}",
                    path.display(),
                    e
                ))
            })?
        };

        let catalog = Self::from_file(file)?;
        debug!(
            path = %path.display(),
            rules = catalog.rules.len(),
            rulesets = catalog.rulesets.len(),
            validation_sets = catalog.validation_sets.len(),
            "Loaded rule catalog"
        );
        Ok(catalog)
    }

    fn check_references(&self) -> RuleConfigResult<()> {
        for id in &self.rule_order {
            let rule = &self.rules[id];
            if let Some(values) = rule.values_set()
                && !self.value_sets.contains_key(values)
            {
                return Err(RuleConfigError::UnknownValuesSet(values.to_string()));
            }
            for sub in [rule.condition(), rule.requirement()].into_iter().flatten() {
                if !self.rules.contains_key(sub) {
                    return Err(RuleConfigError::UnknownRule(sub.to_string()));
                }
            }
        }

        for ruleset in self.rulesets.values() {
            if let Some(missing) = ruleset.rules.iter().find(|r| !self.rules.contains_key(*r)) {
                return Err(RuleConfigError::UnknownRule(missing.clone()));
            }
        }

        for set in &self.validation_sets {
            if !self.rulesets.contains_key(&set.ruleset) {
                return Err(RuleConfigError::UnknownRuleSet(set.ruleset.clone()));
            }
        }
        Ok(())
    }

    fn check_acyclic(&self) -> RuleConfigResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            catalog: &'a RuleCatalog,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> RuleConfigResult<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|p| p.to_string()).collect();
                    cycle.push(id.to_string());
                    return Err(RuleConfigError::Cycle { path: cycle });
                }
                None => {}
            }

            marks.insert(id, Mark::Visiting);
            path.push(id);
            if let Some(rule) = catalog.rules.get(id) {
                for sub in [rule.condition(), rule.requirement()].into_iter().flatten() {
                    visit(catalog, sub, marks, path)?;
                }
            }
            path.pop();
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for id in &self.rule_order {
            visit(self, id, &mut marks, &mut path)?;
        }
        Ok(())
    }

    pub fn rule(&self, id: &str) -> RuleConfigResult<&RuleRecord> {
        self.rules
            .get(id)
            .ok_or_else(|| RuleConfigError::UnknownRule(id.to_string()))
    }

    /// Rules in catalog file order
    pub fn rules(&self) -> impl Iterator<Item = &RuleRecord> {
        self.rule_order.iter().filter_map(|id| self.rules.get(id))
    }

    pub fn value_set(&self, id: &str) -> RuleConfigResult<&ValidValuesSet> {
        self.value_sets
            .get(id)
            .ok_or_else(|| RuleConfigError::UnknownValuesSet(id.to_string()))
    }

    pub fn ruleset(&self, id: &str) -> RuleConfigResult<&RuleSet> {
        self.rulesets
            .get(id)
            .ok_or_else(|| RuleConfigError::UnknownRuleSet(id.to_string()))
    }

    pub fn validation_sets(&self) -> &[ValidationSet] {
        &self.validation_sets
    }

    pub fn validation_set(&self, id: &str) -> Option<&ValidationSet> {
        self.validation_sets.iter().find(|s| s.id == id)
    }

    /// Turn a stored rule into an evaluator, recursing through Conditional
    /// rules.
    pub fn materialize(&self, rule_id: &str) -> RuleConfigResult<Evaluator> {
        let rule = self.rule(rule_id)?;
        rule.check_payload()?;

        let name = rule.name.clone();
        let single_xpath = || rule.xpaths.first().cloned().unwrap_or_default();

        let evaluator = match rule.kind {
            RuleKind::Exists => Evaluator::Exists {
                name,
                xpath: single_xpath(),
            },
            RuleKind::ValueInList => {
                let set_id = rule.values_set().unwrap_or_default();
                let set = self.value_set(set_id)?;
                Evaluator::ValueInList {
                    name,
                    xpath: single_xpath(),
                    values: set.values.iter().cloned().collect(),
                }
            }
            RuleKind::AnyOf => Evaluator::AnyOf {
                name,
                xpaths: rule.xpaths.clone(),
            },
            RuleKind::OneOf => Evaluator::OneOf {
                name,
                xpaths: rule.xpaths.clone(),
            },
            RuleKind::ContentMatchesExpression => {
                let source = rule.regex().unwrap_or_default();
                let pattern = Regex::new(source).map_err(|e| RuleConfigError::InvalidRegex {
                    rule: rule.name.clone(),
                    details: e.to_string(),
                })?;
                Evaluator::ContentMatchesExpression {
                    name,
                    xpath: single_xpath(),
                    pattern,
                }
            }
            RuleKind::ValidUrl => Evaluator::ValidUrl {
                name,
                xpath: single_xpath(),
            },
            RuleKind::Conditional => {
                let condition = self.materialize(rule.condition().unwrap_or_default())?;
                let requirement = self.materialize(rule.requirement().unwrap_or_default())?;
                Evaluator::Conditional {
                    name,
                    condition: Box::new(condition),
                    requirement: Box::new(requirement),
                }
            }
        };
        Ok(evaluator)
    }

    /// Materialize every rule in a rule set, in report order.
    pub fn materialize_ruleset(&self, ruleset_id: &str) -> RuleConfigResult<Vec<Evaluator>> {
        let ruleset = self.ruleset(ruleset_id)?;
        ruleset
            .rules
            .iter()
            .map(|id| self.materialize(id))
            .collect()
    }

    /// Materialize every rule and collect the ones that fail.
    pub fn check_all(&self) -> Vec<(String, RuleConfigError)> {
        self.rules()
            .filter_map(|rule| {
                self.materialize(&rule.id)
                    .err()
                    .map(|e| (rule.id.clone(), e))
            })
            .collect()
    }
}
