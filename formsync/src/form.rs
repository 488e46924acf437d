//! Editable form state.
//!
//! A [`FormState`] mirrors one resource's fields as the user is editing them,
//! plus UI-only values (password-change inputs, selected files) that are never
//! part of the resource itself. It is seeded wholesale from a
//! [`NormalizedForm`] and mutated one field at a time.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::schema::{self, FieldKind, FieldSpec};
use crate::upload::FileUpload;

/// Every schema field, defaults applied, keyed by client name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedForm(BTreeMap<String, Value>);

impl NormalizedForm {
    /// Build from a wire object, reading each field through its wire path.
    pub fn from_wire(fields: &[FieldSpec], source: &Map<String, Value>) -> Self {
        Self(
            fields
                .iter()
                .map(|f| (f.name.to_string(), schema::normalize(f, schema::read_path(source, f.wire))))
                .collect(),
        )
    }

    /// The form a resource has before the server knows about it.
    pub fn defaults(fields: &[FieldSpec]) -> Self {
        Self::from_wire(fields, &Map::new())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.0
    }

    /// Copy with some fields replaced.
    pub fn merged(&self, overrides: &BTreeMap<String, Value>) -> Self {
        let mut values = self.0.clone();
        values.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(values)
    }
}

/// Client-local mutable mirror of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct FormState {
    fields: &'static [FieldSpec],
    values: BTreeMap<String, Value>,
    transient: BTreeMap<String, String>,
    files: BTreeMap<String, FileUpload>,
}

impl FormState {
    /// An empty form holding defaults; not a baseline until seeded.
    pub fn new(fields: &'static [FieldSpec]) -> Self {
        Self {
            fields,
            values: NormalizedForm::defaults(fields).into_values(),
            transient: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    /// Replace everything with a freshly fetched form. Never merges: edits,
    /// transient inputs and attached files from before are all dropped.
    pub fn seed(&mut self, form: NormalizedForm) {
        let mut values = form.into_values();
        for spec in self.fields {
            values.entry(spec.name.to_string()).or_insert_with(|| spec.default_value());
        }
        self.values = values;
        self.transient.clear();
        self.files.clear();
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match name.split_once('.') {
            Some((group, key)) => self.values.get(group)?.get(key),
            None => self.values.get(name),
        }
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn snapshot(&self) -> NormalizedForm {
        NormalizedForm(self.values.clone())
    }

    fn editable(&self, name: &str) -> Result<&'static FieldSpec> {
        let spec = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::validation(format!("Unknown field: {name}")))?;
        if spec.read_only {
            return Err(Error::validation(format!("{name} is read-only")));
        }
        Ok(spec)
    }

    /// Replace one field. `group.key` addresses a member of a nested group.
    pub fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some((group, key)) = name.split_once('.') {
            let spec = self.editable(group)?;
            let FieldKind::Group(keys) = spec.kind else {
                return Err(Error::validation(format!("{group} is not a group")));
            };
            if !keys.contains(&key) {
                return Err(Error::validation(format!("Unknown field: {name}")));
            }
            let entry = self.values.entry(group.to_string()).or_insert_with(|| spec.default_value());
            if !entry.is_object() {
                *entry = spec.default_value();
            }
            if let Value::Object(members) = entry {
                members.insert(key.to_string(), Value::Bool(schema::truthy(&value)));
            }
            return Ok(());
        }

        let spec = self.editable(name)?;
        let value = match spec.kind {
            FieldKind::Group(_) if !value.is_object() => {
                return Err(Error::validation(format!("{name} expects an object of toggles")));
            }
            FieldKind::Group(_) => schema::normalize(spec, Some(&value)),
            _ => value,
        };
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Flip a boolean field (or group member) exactly once and return the new
    /// value. The flip reads the stored value, not the control's state.
    pub fn toggle_field(&mut self, name: &str) -> Result<bool> {
        let (spec_name, is_member) = match name.split_once('.') {
            Some((group, _)) => (group, true),
            None => (name, false),
        };
        let spec = self.editable(spec_name)?;
        if !is_member && !spec.is_boolean() {
            return Err(Error::validation(format!("{name} is not a toggle")));
        }

        let next = !self.get(name).map(schema::truthy).unwrap_or(false);
        self.set_field(name, Value::Bool(next))?;
        Ok(next)
    }

    /// Add or remove `item` from an array field, keeping it duplicate-free.
    pub fn set_array_membership(&mut self, name: &str, item: &str, included: bool) -> Result<()> {
        let spec = self.editable(name)?;
        match spec.kind {
            FieldKind::ChoiceList(choices) if !choices.contains(&item) => {
                return Err(Error::validation(format!("{item} is not a valid option for {name}")));
            }
            FieldKind::ChoiceList(_) | FieldKind::List => {}
            _ => return Err(Error::validation(format!("{name} is not a list"))),
        }

        let entry = self.values.entry(name.to_string()).or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
            let present = items.iter().any(|v| v.as_str() == Some(item));
            if included && !present {
                items.push(Value::String(item.to_string()));
            } else if !included && present {
                items.retain(|v| v.as_str() != Some(item));
            }
        }
        Ok(())
    }

    /// Editable fields whose current value differs from `baseline`, compared
    /// after coercion so `"120"` and `120` count as equal.
    pub fn diff(&self, baseline: &NormalizedForm) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .filter(|f| !f.read_only)
            .filter_map(|f| {
                let current = schema::to_wire(f, self.values.get(f.name).unwrap_or(&Value::Null));
                let before = schema::normalize(f, baseline.get(f.name));
                (current != before).then(|| (f.name.to_string(), self.values.get(f.name).cloned().unwrap_or(Value::Null)))
            })
            .collect()
    }

    /// Wire payload for every editable field.
    pub fn to_wire(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        for spec in self.fields.iter().filter(|f| !f.read_only) {
            let value = schema::to_wire(spec, self.values.get(spec.name).unwrap_or(&Value::Null));
            schema::write_path(&mut payload, spec.wire, value);
        }
        payload
    }

    pub fn set_transient(&mut self, name: &str, value: impl Into<String>) {
        self.transient.insert(name.to_string(), value.into());
    }

    pub fn transient(&self, name: &str) -> Option<&str> {
        self.transient.get(name).map(String::as_str)
    }

    pub fn clear_transient(&mut self) {
        self.transient.clear();
    }

    pub fn attach_file(&mut self, name: &str, file: FileUpload) {
        self.files.insert(name.to_string(), file);
    }

    pub fn file(&self, name: &str) -> Option<&FileUpload> {
        self.files.get(name)
    }
}
