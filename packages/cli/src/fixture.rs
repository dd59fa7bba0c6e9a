//! Fixture graphs: plain JSON with a few `$` directives that describe a
//! native object graph, including cycles.
//!
//! ```text
//! {"$id": "a", "$type": "Person", "Name": "Ann"}   object, named "a"
//! {"$ref": "a"}                                    the object named "a"
//! {"$list": "Person", "$items": [...]}             typed observable list
//! [...]                                            untyped observable list
//! {"$date": "2024-01-01T00:00:00Z"}                date
//! {"$command": true}                               command, can-execute flag
//! ```
//!
//! A `$ref` must name an object or list whose definition has already begun,
//! which covers every back edge of a cycle.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tether_glue::{ElementType, NativeCommand, NativeList, NativeObject, NativeValue};
use tether_sync::convert::LITERAL_TYPE_NAME;

pub fn load_fixture(path: &Path) -> Result<NativeValue> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read fixture {}", path.display()))?;
    let json: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    FixtureBuilder::default().build(&json)
}

/// Element type named in a `$list` directive
pub fn element_type(name: &str) -> ElementType {
    match name {
        "Any" => ElementType::Any,
        "Bool" => ElementType::Bool,
        "Int" => ElementType::Int,
        "Float" => ElementType::Float,
        "String" => ElementType::String,
        "Date" => ElementType::Date,
        "List" => ElementType::List,
        "Command" => ElementType::Command,
        other => ElementType::Object(other.to_string()),
    }
}

#[derive(Default)]
pub struct FixtureBuilder {
    named: HashMap<String, NativeValue>,
}

impl FixtureBuilder {
    pub fn build(&mut self, json: &Value) -> Result<NativeValue> {
        Ok(match json {
            Value::Null => NativeValue::Null,
            Value::Bool(b) => NativeValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => NativeValue::Int(i),
                None => NativeValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => NativeValue::string(s.as_str()),
            Value::Array(items) => {
                let list = NativeList::new(ElementType::Any);
                self.fill(&list, items)?;
                NativeValue::List(list)
            }
            Value::Object(fields) => self.build_directive(fields)?,
        })
    }

    fn build_directive(&mut self, fields: &Map<String, Value>) -> Result<NativeValue> {
        if let Some(name) = fields.get("$ref") {
            let name = name.as_str().ok_or_else(|| anyhow!("$ref must be a string"))?;
            return self
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("unknown reference `{}`", name));
        }
        if let Some(date) = fields.get("$date") {
            let text = date.as_str().ok_or_else(|| anyhow!("$date must be a string"))?;
            let date = DateTime::parse_from_rfc3339(text)
                .with_context(|| format!("invalid date `{}`", text))?;
            return Ok(NativeValue::Date(date.with_timezone(&Utc)));
        }
        if let Some(flag) = fields.get("$command") {
            let command = NativeCommand::new(|_| Ok(()));
            command.set_can_execute(flag.as_bool().unwrap_or(true));
            return Ok(NativeValue::Command(command));
        }
        if let Some(items) = fields.get("$items") {
            let items = items
                .as_array()
                .ok_or_else(|| anyhow!("$items must be an array"))?;
            let element = fields
                .get("$list")
                .and_then(Value::as_str)
                .map(element_type)
                .unwrap_or(ElementType::Any);
            let list = NativeList::new(element);
            self.name(fields, NativeValue::List(list.clone()))?;
            self.fill(&list, items)?;
            return Ok(NativeValue::List(list));
        }

        let type_name = fields
            .get("$type")
            .and_then(Value::as_str)
            .unwrap_or(LITERAL_TYPE_NAME);
        let object = NativeObject::new(type_name);
        self.name(fields, NativeValue::Object(object.clone()))?;
        for (key, value) in fields {
            if key.starts_with('$') {
                continue;
            }
            let value = self.build(value)?;
            object.define(key.as_str(), value);
        }
        Ok(NativeValue::Object(object))
    }

    fn name(&mut self, fields: &Map<String, Value>, value: NativeValue) -> Result<()> {
        let Some(name) = fields.get("$id") else {
            return Ok(());
        };
        let name = name.as_str().ok_or_else(|| anyhow!("$id must be a string"))?;
        if self.named.insert(name.to_string(), value).is_some() {
            bail!("`{}` is defined twice", name);
        }
        Ok(())
    }

    fn fill(&mut self, list: &std::sync::Arc<NativeList>, items: &[Value]) -> Result<()> {
        for item in items {
            let value = self.build(item)?;
            list.push(value)?;
        }
        Ok(())
    }
}
