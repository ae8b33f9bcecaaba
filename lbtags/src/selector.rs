//! Selector evaluation - computes the desired instance set from an inventory.
//!
//! Matching is exact set equality, not containment:
//! - tags: the instance's whole tag set must equal the selector's tags
//! - labels: the instance's labels restricted to the selector's keys must equal
//!   the selector's `key:value` pairs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{InstanceDescriptor, MembershipSet};

/// Predicate deciding which instances belong behind the load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Tags(BTreeSet<String>),
    Labels(BTreeMap<String, String>),
}

impl Selector {
    /// Build a selector from raw tag and label arguments.
    ///
    /// Tags take precedence: when any tag is given the labels are ignored.
    /// Labels are `key=value` or `key:value`.
    pub fn from_parts(tags: &[String], labels: &[String]) -> Result<Self> {
        let tags: BTreeSet<String> = tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let labels: Vec<&str> = labels
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();

        if !tags.is_empty() {
            if !labels.is_empty() {
                warn!(
                    "Both tags and labels given, selecting by tags and ignoring labels [{}]",
                    labels.join(", ")
                );
            }
            return Ok(Selector::Tags(tags));
        }
        if labels.is_empty() {
            return Err(Error::Misuse("a tag or label selector is required".into()));
        }

        let mut map = BTreeMap::new();
        let parsed = labels
            .into_iter()
            .map(parse_label)
            .collect::<Result<Vec<_>>>()?;
        for (key, value) in parsed {
            if let Some(prev) = map.insert(key.clone(), value.clone())
                && prev != value
            {
                return Err(Error::Misuse(format!(
                    "label {} selected with two values ({} and {})",
                    key, prev, value
                )));
            }
        }
        Ok(Selector::Labels(map))
    }

    /// Whether a single instance matches.
    pub fn matches(&self, instance: &InstanceDescriptor) -> bool {
        match self {
            Selector::Tags(required) => &instance.tags == required,
            // Restricting the instance's labels to the selector's keys leaves
            // no extra pairs, so set equality reduces to every pair being present.
            Selector::Labels(required) => required
                .iter()
                .all(|(k, v)| instance.labels.get(k) == Some(v)),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Tags(tags) => {
                let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
                write!(f, "tags [{}]", tags.join(", "))
            }
            Selector::Labels(labels) => {
                let pairs: Vec<String> = labels
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v))
                    .collect();
                write!(f, "labels [{}]", pairs.join(", "))
            }
        }
    }
}

fn parse_label(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .or_else(|| raw.split_once(':'))
        .ok_or_else(|| Error::Misuse(format!("label selector {:?} is not key=value", raw)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Misuse(format!("label selector {:?} has an empty key", raw)));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Instances from `inventory` that match `selector`.
pub fn select<'a>(
    selector: &Selector,
    inventory: &'a [InstanceDescriptor],
) -> Vec<&'a InstanceDescriptor> {
    inventory.iter().filter(|i| selector.matches(i)).collect()
}

/// Desired membership for `selector` over `inventory`. Empty when nothing matches.
pub fn evaluate(selector: &Selector, inventory: &[InstanceDescriptor]) -> MembershipSet {
    select(selector, inventory)
        .into_iter()
        .map(|i| i.instance.clone())
        .collect()
}
