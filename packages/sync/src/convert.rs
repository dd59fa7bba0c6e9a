//! Mirror value → native value conversion.
//!
//! References resolve through the session registry; object and array
//! literals built mirror-side become fresh native values. Anything that does
//! not fit the declared element type is a [`GlueError::TypeMismatch`].

use chrono::DateTime;
use tether_common::{GlueError, GlueResult};
use tether_glue::{ElementType, MirrorValue, NativeList, NativeObject, NativeValue, SessionRegistry};

/// Type name given to object literals written where any value is accepted
pub const LITERAL_TYPE_NAME: &str = "Object";

pub fn to_native(
    value: &MirrorValue,
    expected: &ElementType,
    registry: &SessionRegistry,
) -> GlueResult<NativeValue> {
    let mismatch = || GlueError::type_mismatch(expected.name(), value.kind_name());

    let native = match (value, expected) {
        (MirrorValue::Ref(id), _) => registry
            .lookup(*id)
            .ok_or(GlueError::UnknownSession(*id))?
            .to_value(),
        (MirrorValue::Null, _) => NativeValue::Null,
        (MirrorValue::Bool(b), ElementType::Any | ElementType::Bool) => NativeValue::Bool(*b),
        (MirrorValue::Number(x), ElementType::Int) => {
            integral(*x).map(NativeValue::Int).ok_or_else(mismatch)?
        }
        (MirrorValue::Number(x), ElementType::Float) => NativeValue::Float(*x),
        (MirrorValue::Number(x), ElementType::Any) => match integral(*x) {
            Some(i) => NativeValue::Int(i),
            None => NativeValue::Float(*x),
        },
        (MirrorValue::String(s), ElementType::Any | ElementType::String) => {
            NativeValue::String(s.clone())
        }
        (MirrorValue::String(s), ElementType::Date) => DateTime::parse_from_rfc3339(s)
            .map(|date| NativeValue::Date(date.into()))
            .map_err(|_| mismatch())?,
        (MirrorValue::Date(date), ElementType::Any | ElementType::Date) => NativeValue::Date(*date),
        (MirrorValue::Object(fields), ElementType::Any | ElementType::Object(_)) => {
            let type_name = match expected {
                ElementType::Object(name) => name.as_str(),
                _ => LITERAL_TYPE_NAME,
            };
            let properties = fields
                .iter()
                .map(|(key, field)| Ok((key.clone(), to_native(field, &ElementType::Any, registry)?)))
                .collect::<GlueResult<Vec<_>>>()?;
            NativeValue::Object(NativeObject::with_properties(type_name, properties))
        }
        (MirrorValue::Array(items), ElementType::Any | ElementType::List) => {
            let items = items
                .iter()
                .map(|item| to_native(item, &ElementType::Any, registry))
                .collect::<GlueResult<Vec<_>>>()?;
            NativeValue::List(NativeList::with_items(ElementType::Any, items))
        }
        _ => return Err(mismatch()),
    };

    if expected.accepts(&native) {
        Ok(native)
    } else {
        Err(GlueError::type_mismatch(expected.name(), native.type_name()))
    }
}

fn integral(x: f64) -> Option<i64> {
    if x.fract() == 0.0 && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
        Some(x as i64)
    } else {
        None
    }
}
