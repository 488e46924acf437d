//! Field schemas: what a resource's form looks like and how each field maps
//! to and from the wire.
//!
//! A resource is described by a static slice of [`FieldSpec`]s. Each spec
//! carries the client-side field name, the wire name (possibly a dotted path
//! into a nested object), the field kind and an optional fallback. The same
//! coercion rules run in both directions:
//!
//! - on fetch, [`normalize`] turns whatever the server sent (or nothing) into
//!   a fully populated value with defaults applied;
//! - on save, [`to_wire`] coerces the edited values (strings typed into a
//!   number box, out-of-list selections, truthy toggles) into the payload the
//!   endpoint expects.

use serde_json::{Map, Number, Value};

/// Shape of a single form field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Free text
    Text,
    /// Boolean, normalized with JavaScript truthiness
    Bool,
    /// Floating point number; strings are parsed, blanks become `null`
    Number,
    /// One of a fixed set of strings
    Choice(&'static [&'static str]),
    /// Integer restricted to an allow-list, anything else becomes `fallback`
    IntChoice { allowed: &'static [i64], fallback: i64 },
    /// Nested object of booleans, addressed as `field.key`
    Group(&'static [&'static str]),
    /// Array drawn from a fixed set of strings, no duplicates
    ChoiceList(&'static [&'static str]),
    /// Array of arbitrary strings, no duplicates
    List,
}

/// Overrides the kind's natural default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    Bool(bool),
    Str(&'static str),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub wire: &'static str,
    pub kind: FieldKind,
    pub read_only: bool,
    pub fallback: Option<Fallback>,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            wire: name,
            kind,
            read_only: false,
            fallback: None,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub const fn number(name: &'static str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub const fn choice(name: &'static str, choices: &'static [&'static str]) -> Self {
        Self::new(name, FieldKind::Choice(choices))
    }

    pub const fn int_choice(name: &'static str, allowed: &'static [i64], fallback: i64) -> Self {
        Self::new(name, FieldKind::IntChoice { allowed, fallback })
    }

    pub const fn group(name: &'static str, keys: &'static [&'static str]) -> Self {
        Self::new(name, FieldKind::Group(keys))
    }

    pub const fn choice_list(name: &'static str, choices: &'static [&'static str]) -> Self {
        Self::new(name, FieldKind::ChoiceList(choices))
    }

    pub const fn list(name: &'static str) -> Self {
        Self::new(name, FieldKind::List)
    }

    /// Server-side name, may be a dotted path (`preferences.capital_calls`)
    pub const fn wire(mut self, wire: &'static str) -> Self {
        self.wire = wire;
        self
    }

    /// Server-computed; displayed but never sent back
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub const fn default_true(mut self) -> Self {
        self.fallback = Some(Fallback::Bool(true));
        self
    }

    /// For choices: missing or unknown values become `""` instead of the first choice
    pub const fn or_empty(mut self) -> Self {
        self.fallback = Some(Fallback::Str(""));
        self
    }

    pub const fn default_str(mut self, value: &'static str) -> Self {
        self.fallback = Some(Fallback::Str(value));
        self
    }

    /// Value used when the server omits the field or sends something unusable
    pub fn default_value(&self) -> Value {
        match (self.fallback, self.kind) {
            (Some(Fallback::Bool(b)), _) => Value::Bool(b),
            (Some(Fallback::Str(s)), _) => Value::String(s.to_string()),
            (Some(Fallback::Int(n)), _) => Value::from(n),
            (None, FieldKind::Text) => Value::String(String::new()),
            (None, FieldKind::Bool) => Value::Bool(false),
            (None, FieldKind::Number) => Value::Null,
            (None, FieldKind::Choice(choices)) => Value::String(choices.first().copied().unwrap_or_default().to_string()),
            (None, FieldKind::IntChoice { fallback, .. }) => Value::from(fallback),
            (None, FieldKind::Group(keys)) => Value::Object(keys.iter().map(|k| (k.to_string(), Value::Bool(false))).collect()),
            (None, FieldKind::ChoiceList(_) | FieldKind::List) => Value::Array(Vec::new()),
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.kind, FieldKind::Bool)
    }
}

/// Find a field by client name.
pub fn field<'a>(fields: &'a [FieldSpec], name: &str) -> Option<&'a FieldSpec> {
    fields.iter().find(|f| f.name == name)
}

/// Wire names of every field, used to rank field-level server errors.
pub fn wire_names(fields: &[FieldSpec]) -> Vec<&'static str> {
    fields.iter().map(|f| f.wire.split('.').next().unwrap_or(f.wire)).collect()
}

/// JavaScript `!!value`.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn string_set(value: &Value, allowed: Option<&[&str]>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    if let Value::Array(items) = value {
        for item in items {
            let Some(s) = item.as_str() else { continue };
            if allowed.is_some_and(|allowed| !allowed.contains(&s)) {
                continue;
            }
            if !out.iter().any(|v| v.as_str() == Some(s)) {
                out.push(Value::String(s.to_string()));
            }
        }
    }
    out
}

/// Coerce one raw value into the field's canonical shape. `None` (field
/// missing) and unusable values both yield [`FieldSpec::default_value`].
pub fn normalize(spec: &FieldSpec, raw: Option<&Value>) -> Value {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return spec.default_value();
    };

    match spec.kind {
        FieldKind::Text => match raw {
            Value::String(s) => Value::String(s.clone()),
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            _ => spec.default_value(),
        },
        FieldKind::Bool => Value::Bool(truthy(raw)),
        FieldKind::Number => as_f64(raw)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| spec.default_value()),
        FieldKind::Choice(choices) => match raw.as_str() {
            Some(s) if choices.contains(&s) => Value::String(s.to_string()),
            _ => spec.default_value(),
        },
        FieldKind::IntChoice { allowed, .. } => match as_i64(raw) {
            Some(n) if allowed.contains(&n) => Value::from(n),
            _ => spec.default_value(),
        },
        FieldKind::Group(keys) => {
            let source = raw.as_object();
            let group: Map<String, Value> = keys
                .iter()
                .map(|k| {
                    let on = source.and_then(|m| m.get(*k)).map(truthy).unwrap_or(false);
                    (k.to_string(), Value::Bool(on))
                })
                .collect();
            Value::Object(group)
        }
        FieldKind::ChoiceList(choices) => Value::Array(string_set(raw, Some(choices))),
        FieldKind::List => Value::Array(string_set(raw, None)),
    }
}

/// Coerce an edited value into the payload value sent to the server.
///
/// Numbers typed as text are parsed (blank becomes `null`), booleans go
/// through truthiness, allow-listed integers outside the list become the
/// fallback.
pub fn to_wire(spec: &FieldSpec, value: &Value) -> Value {
    normalize(spec, Some(value))
}

/// Read a dotted path from a JSON object.
pub fn read_path<'a>(source: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = source.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a dotted path into a JSON object, creating intermediate objects.
pub fn write_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = target.entry(head.to_string()).or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                write_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: FieldSpec = FieldSpec::int_choice("session_timeout_minutes", &[15, 30, 60, 120, 240], 30);
    const STAGES: FieldSpec = FieldSpec::choice_list("deal_stage_preferences", &["seed", "series_a", "growth"]);

    #[test]
    fn missing_values_take_kind_defaults() {
        assert_eq!(normalize(&FieldSpec::boolean("whitelist_secondary_trading"), None), json!(false));
        assert_eq!(normalize(&FieldSpec::text("city"), None), json!(""));
        assert_eq!(normalize(&FieldSpec::number("net_worth"), None), Value::Null);
        assert_eq!(normalize(&FieldSpec::choice("currency", &["USD", "EUR"]), None), json!("USD"));
        assert_eq!(normalize(&FieldSpec::choice("currency", &["USD", "EUR"]).or_empty(), None), json!(""));
        assert_eq!(normalize(&TIMEOUT, Some(&Value::Null)), json!(30));
        assert_eq!(normalize(&STAGES, None), json!([]));
        assert_eq!(normalize(&FieldSpec::boolean("alerts").default_true(), None), json!(true));
    }

    #[test]
    fn int_choice_coerces_out_of_list_values() {
        assert_eq!(to_wire(&TIMEOUT, &json!(120)), json!(120));
        assert_eq!(to_wire(&TIMEOUT, &json!("240")), json!(240));
        assert_eq!(to_wire(&TIMEOUT, &json!(45)), json!(30));
        assert_eq!(to_wire(&TIMEOUT, &json!("soon")), json!(30));
    }

    #[test]
    fn numbers_parse_from_text() {
        let spec = FieldSpec::number("annual_income");
        assert_eq!(to_wire(&spec, &json!("250000.50")), json!(250000.5));
        assert_eq!(to_wire(&spec, &json!("")), Value::Null);
        assert_eq!(to_wire(&spec, &json!(12)), json!(12.0));
    }

    #[test]
    fn booleans_follow_truthiness() {
        let spec = FieldSpec::boolean("us_person");
        assert_eq!(to_wire(&spec, &json!(1)), json!(true));
        assert_eq!(to_wire(&spec, &json!(0)), json!(false));
        assert_eq!(to_wire(&spec, &json!("")), json!(false));
        assert_eq!(to_wire(&spec, &json!("yes")), json!(true));
    }

    #[test]
    fn groups_fill_every_key() {
        let spec = FieldSpec::group("event_alerts", &["new_deals", "distributions"]);
        assert_eq!(
            normalize(&spec, Some(&json!({"new_deals": true, "unknown": true}))),
            json!({"new_deals": true, "distributions": false})
        );
    }

    #[test]
    fn choice_lists_drop_unknown_and_duplicate_items() {
        assert_eq!(
            normalize(&STAGES, Some(&json!(["seed", "seed", "ipo", "growth", 3]))),
            json!(["seed", "growth"])
        );
    }

    #[test]
    fn dotted_paths_round_trip_through_nested_objects() {
        let mut payload = Map::new();
        write_path(&mut payload, "notification_preferences.capital_calls", json!({"email": true}));
        write_path(&mut payload, "notification_preferences.events", json!({"new_deals": false}));
        write_path(&mut payload, "language", json!("en"));

        assert_eq!(
            Value::Object(payload.clone()),
            json!({
                "notification_preferences": {"capital_calls": {"email": true}, "events": {"new_deals": false}},
                "language": "en"
            })
        );
        assert_eq!(read_path(&payload, "notification_preferences.events.new_deals"), Some(&json!(false)));
        assert_eq!(read_path(&payload, "notification_preferences.missing"), None);
    }
}
