use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tether_glue::{apply_edits, diff_sequences, CollectionEdit, GlueRef, ScalarValue, SessionId};

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// JSON array before the change
    pub before: String,

    /// JSON array after the change
    pub after: String,
}

pub fn diff(args: DiffArgs, cwd: &str) -> Result<()> {
    let mut identities = Identities::default();
    let before = identities.sequence(&read_json(cwd, &args.before)?)?;
    let after = identities.sequence(&read_json(cwd, &args.after)?)?;

    let edits = diff_sequences(&before, &after);
    for edit in &edits {
        println!("  {}", identities.describe(edit));
    }

    let mut replayed = before.clone();
    apply_edits(&mut replayed, &edits)?;
    if replayed != after {
        bail!("edits do not reproduce {}", args.after);
    }

    println!();
    println!("{} {} edits", "✓".green(), edits.len());
    Ok(())
}

fn read_json(cwd: &str, path: &str) -> Result<Value> {
    let path = PathBuf::from(cwd).join(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

/// Maps `{"$id": name}` elements to stable session ids so that both
/// sequences compare by identity
#[derive(Default)]
struct Identities {
    ids: HashMap<String, SessionId>,
    names: HashMap<SessionId, String>,
}

impl Identities {
    fn sequence(&mut self, json: &Value) -> Result<Vec<GlueRef>> {
        let items = json
            .as_array()
            .ok_or_else(|| anyhow!("expected a JSON array"))?;
        items.iter().map(|item| self.element(item)).collect()
    }

    fn element(&mut self, json: &Value) -> Result<GlueRef> {
        let scalar = match json {
            Value::Null => ScalarValue::Null,
            Value::Bool(b) => ScalarValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ScalarValue::Int(i),
                None => ScalarValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => ScalarValue::String(s.clone()),
            Value::Object(fields) => {
                let name = fields
                    .get("$id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("object elements need an `$id`"))?;
                return Ok(GlueRef::Node(self.identify(name)));
            }
            Value::Array(_) => bail!("nested arrays are not supported"),
        };
        Ok(GlueRef::Value(scalar))
    }

    fn identify(&mut self, name: &str) -> SessionId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = SessionId(self.ids.len() as u64 + 1);
        self.ids.insert(name.to_string(), id);
        self.names.insert(id, name.to_string());
        id
    }

    fn label(&self, value: &GlueRef) -> String {
        match value {
            GlueRef::Node(id) => match self.names.get(id) {
                Some(name) => format!("${}", name),
                None => id.to_string(),
            },
            GlueRef::Value(scalar) => scalar.to_json().to_string(),
            GlueRef::Date(date) => date.to_rfc3339(),
        }
    }

    fn describe(&self, edit: &CollectionEdit) -> String {
        match edit {
            CollectionEdit::Add { index, value } => {
                format!("{} add     {} {}", "+".green(), index, self.label(value))
            }
            CollectionEdit::Remove { index } => format!("{} remove  {}", "-".red(), index),
            CollectionEdit::Replace { index, value } => {
                format!("{} replace {} {}", "~".yellow(), index, self.label(value))
            }
            CollectionEdit::Move { from, to } => {
                format!("{} move    {} → {}", "↕".cyan(), from, to)
            }
            CollectionEdit::Reset { items } => {
                let labels: Vec<String> = items.iter().map(|item| self.label(item)).collect();
                format!("{} reset   [{}]", "∅".magenta(), labels.join(", "))
            }
        }
    }
}
