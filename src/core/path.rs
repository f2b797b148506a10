//! Dot-path expressions over entity attributes.
//!
//! A path such as `activities[].arguments.dataExtensionKey` walks object
//! members separated by `.`; a `[]` suffix fans out over every element of an
//! array. Evaluation yields zero or more matches, never an error: a missing
//! member simply contributes nothing.

use super::entity::{Entity, scalar_to_string};
use super::error::{Result, SyncError};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Member(String),
    Each,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| SyncError::Definition(format!("field path '{raw}': {reason}"));

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let mut name = part;
            let mut fan_out = 0;
            while let Some(stripped) = name.strip_suffix("[]") {
                name = stripped;
                fan_out += 1;
            }
            if name.is_empty() {
                return Err(invalid("empty member name"));
            }
            if name.contains('[') || name.contains(']') {
                return Err(invalid("only '[]' is supported as array accessor"));
            }
            segments.push(Segment::Member(name.to_string()));
            segments.extend(std::iter::repeat_n(Segment::Each, fan_out));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the path has a single member and no array fan-out.
    pub fn is_flat(&self) -> bool {
        self.segments.len() == 1
    }

    /// Every value reached by the path.
    pub fn select<'a>(&self, entity: &'a Entity) -> Vec<&'a Value> {
        let mut segments = self.segments.iter();
        let mut current: Vec<&'a Value> = match segments.next() {
            Some(Segment::Member(name)) => entity.get(name).into_iter().collect(),
            _ => return Vec::new(),
        };

        for segment in segments {
            current = current
                .into_iter()
                .flat_map(|value| step(value, segment))
                .collect();
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// Scalar values reached by the path in their key form, blanks left out.
    /// An array at the end of the path contributes each of its scalar elements.
    pub fn keys(&self, entity: &Entity) -> Vec<String> {
        let mut keys = Vec::new();
        for value in self.select(entity) {
            match value {
                Value::Array(items) => keys.extend(items.iter().filter_map(scalar_to_string)),
                other => keys.extend(scalar_to_string(other)),
            }
        }
        keys.retain(|key| !key.trim().is_empty());
        keys
    }

    /// Removes every attribute the path points at. Returns how many were removed.
    pub fn remove(&self, entity: &mut Entity) -> usize {
        let Some((last, parents)) = self.segments.split_last() else {
            return 0;
        };
        let Segment::Member(last_name) = last else {
            // `a[]` removes the whole array `a`
            return Self {
                raw: self.raw.clone(),
                segments: trim_trailing_each(&self.segments),
            }
            .remove(entity);
        };

        if parents.is_empty() {
            return usize::from(entity.remove(last_name).is_some());
        }

        let mut removed = 0;
        let mut parents = parents.iter();
        let first = match parents.next() {
            Some(Segment::Member(name)) => entity.get_mut(name),
            _ => None,
        };
        let mut current: Vec<&mut Value> = first.into_iter().collect();
        for segment in parents {
            current = current
                .into_iter()
                .flat_map(|value| step_mut(value, segment))
                .collect();
        }
        for value in current {
            if let Value::Object(map) = value {
                removed += usize::from(map.remove(last_name).is_some());
            }
        }
        removed
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn trim_trailing_each(segments: &[Segment]) -> Vec<Segment> {
    let mut trimmed = segments.to_vec();
    while matches!(trimmed.last(), Some(Segment::Each)) {
        trimmed.pop();
    }
    trimmed
}

fn step<'a>(value: &'a Value, segment: &Segment) -> Vec<&'a Value> {
    match (segment, value) {
        (Segment::Member(name), Value::Object(map)) => map.get(name).into_iter().collect(),
        (Segment::Each, Value::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn step_mut<'a>(value: &'a mut Value, segment: &Segment) -> Vec<&'a mut Value> {
    match (segment, value) {
        (Segment::Member(name), Value::Object(map)) => map.get_mut(name).into_iter().collect(),
        (Segment::Each, Value::Array(items)) => items.iter_mut().collect(),
        _ => Vec::new(),
    }
}
