//! Field-wise diff between a desired task and its observed counterpart
//!
//! Both values are serialized to JSON objects and compared per top-level
//! field. Fields the desired task leaves unset (`null`) are not compared.
//! Lifecycle, shared and observed-id fields are `#[serde(skip)]` on every
//! task and therefore never show up here.

use crate::error::{CloudError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub expected: Value,
    /// `None` when there is no actual resource
    pub actual: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    fields: BTreeMap<String, FieldChange>,
}

fn to_object<T: Serialize>(value: &T) -> Result<serde_json::Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CloudError::InvalidConfig(format!(
            "task must serialize to an object, got {other}"
        ))),
    }
}

impl Changes {
    pub fn compute<T: Serialize>(expected: &T, actual: Option<&T>) -> Result<Self> {
        let expected = to_object(expected)?;
        let actual = actual.map(to_object).transpose()?;

        let mut fields = BTreeMap::new();
        for (name, value) in expected {
            if value.is_null() {
                continue;
            }
            let observed = actual.as_ref().map(|a| a.get(&name).cloned().unwrap_or(Value::Null));
            if observed.as_ref() != Some(&value) {
                fields.insert(
                    name,
                    FieldChange {
                        expected: value,
                        actual: observed,
                    },
                );
            }
        }
        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.fields.get(field)
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.fields.iter()
    }

    /// Fails with `CannotChangeField` when any of `immutable` changed on an
    /// existing resource
    pub fn reject_immutable(
        &self,
        task: impl std::fmt::Display,
        immutable: &[&str],
    ) -> Result<()> {
        for field in immutable {
            if let Some(FieldChange {
                expected,
                actual: Some(actual),
            }) = self.fields.get(*field)
            {
                return Err(CloudError::cannot_change(&task, *field, actual, expected));
            }
        }
        Ok(())
    }
}
