//! Update a named property of an object with the result of an operation.
//!
//! Each updatable type publishes a [`PropertyTable`]: a map from property name
//! to a typed setter, built once (usually in a `once_cell::sync::Lazy` static).
//! Values travel as `serde_json::Value` and are coerced into the property's
//! type on the way in.
//!
//! ```ignore
//! static PROPERTIES: Lazy<PropertyTable<Account>> = Lazy::new(|| {
//!     PropertyTable::builder()
//!         .property("balance", |a: &mut Account, v: i64| a.balance = v)
//!         .property("owner", |a: &mut Account, v: String| a.owner = v)
//!         .build()
//! });
//!
//! impl Updatable for Account {
//!     fn property_table() -> &'static PropertyTable<Self> {
//!         &PROPERTIES
//!     }
//! }
//! ```

use crate::errors::BoxError;
use crate::orchestration::gate::{contain, run_gated, PermitPool};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

type Setter<T> = Box<dyn Fn(&mut T, Value) -> Result<(), String> + Send + Sync>;

/// Why a property could not be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    NoProperties { type_name: &'static str },
    UnknownProperty { type_name: &'static str, property: String },
    Coercion { property: String, reason: String },
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProperties { type_name } => {
                write!(f, "{} has no settable properties", type_name)
            }
            Self::UnknownProperty { type_name, property } => {
                write!(f, "{} has no property '{}'", type_name, property)
            }
            Self::Coercion { property, reason } => {
                write!(f, "cannot coerce value for '{}': {}", property, reason)
            }
        }
    }
}

impl std::error::Error for UpdateError {}

/// Name-to-setter dispatch table for one type.
pub struct PropertyTable<T> {
    type_name: &'static str,
    setters: HashMap<&'static str, Setter<T>>,
}

impl<T: 'static> PropertyTable<T> {
    pub fn builder() -> PropertyTableBuilder<T> {
        PropertyTableBuilder {
            setters: HashMap::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn contains(&self, property: &str) -> bool {
        self.setters.contains_key(property)
    }

    pub fn is_empty(&self) -> bool {
        self.setters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.setters.len()
    }

    /// Property names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.setters.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Coerce `value` and store it. On error `target` is untouched.
    pub fn set(&self, target: &mut T, property: &str, value: Value) -> Result<(), UpdateError> {
        if self.setters.is_empty() {
            return Err(UpdateError::NoProperties {
                type_name: self.type_name,
            });
        }
        let setter = self.setters.get(property).ok_or_else(|| UpdateError::UnknownProperty {
            type_name: self.type_name,
            property: property.to_string(),
        })?;
        setter(target, value).map_err(|reason| UpdateError::Coercion {
            property: property.to_string(),
            reason,
        })
    }
}

pub struct PropertyTableBuilder<T> {
    setters: HashMap<&'static str, Setter<T>>,
}

impl<T: 'static> PropertyTableBuilder<T> {
    /// Register a setter. The value is coerced into `P` before it is called.
    pub fn property<P, F>(mut self, name: &'static str, setter: F) -> Self
    where
        P: DeserializeOwned + 'static,
        F: Fn(&mut T, P) + Send + Sync + 'static,
    {
        self.setters.insert(
            name,
            Box::new(move |target: &mut T, value: Value| {
                let value = coerce::<P>(value)?;
                setter(target, value);
                Ok(())
            }),
        );
        self
    }

    pub fn build(self) -> PropertyTable<T> {
        PropertyTable {
            type_name: std::any::type_name::<T>(),
            setters: self.setters,
        }
    }
}

/// Types whose properties can be set by name.
pub trait Updatable: Sized + 'static {
    fn property_table() -> &'static PropertyTable<Self>;
}

/// Best-effort conversion of a dynamic value into `P`.
///
/// Tries the value as-is, then: a string parsed as a literal (`"42"`,
/// `"true"`), a scalar rendered as a string, an integral float as an integer,
/// and the sole element of a one-element list.
pub fn coerce<P: DeserializeOwned>(value: Value) -> Result<P, String> {
    let direct = match serde_json::from_value::<P>(value.clone()) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    for candidate in alternatives(&value) {
        if let Ok(v) = serde_json::from_value::<P>(candidate) {
            return Ok(v);
        }
    }
    Err(direct.to_string())
}

fn alternatives(value: &Value) -> Vec<Value> {
    let mut out = Vec::new();
    match value {
        Value::String(s) => {
            if let Ok(parsed) = serde_json::from_str::<Value>(s.trim()) {
                out.extend(integral(&parsed));
                out.push(parsed);
            }
        }
        Value::Number(n) => {
            out.extend(integral(value));
            out.push(Value::String(n.to_string()));
        }
        Value::Bool(b) => out.push(Value::String(b.to_string())),
        Value::Array(items) if items.len() == 1 => {
            out.push(items[0].clone());
            out.extend(alternatives(&items[0]));
        }
        _ => {}
    }
    out
}

fn integral(value: &Value) -> Option<Value> {
    let f = value.as_f64().filter(|_| value.is_f64())?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

/// Set `property` on `target` from the result of `source`.
///
/// Never fails: an unknown property, a type without properties, a failed or
/// empty source, and a failed coercion are all logged and leave `target` as
/// it was. The source is not run when the property cannot be resolved.
pub async fn update<T, V, F, Fut, E>(
    target: Option<&mut T>,
    property: &str,
    source: F,
    pool: Option<&PermitPool>,
) where
    T: Updatable,
    V: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
    E: Into<BoxError>,
{
    let table = T::property_table();
    let type_name = table.type_name();

    let Some(target) = target else {
        debug!(type_name, property, "update without target; skipped");
        return;
    };
    if table.is_empty() {
        warn!(type_name, property, "type has no settable properties; update skipped");
        return;
    }
    if !table.contains(property) {
        warn!(type_name, property, "unknown property; update skipped");
        return;
    }

    let Some(value) = contain(run_gated(pool, source).await, type_name).flatten() else {
        debug!(type_name, property, "no value produced; property left unchanged");
        return;
    };

    let value = match serde_json::to_value(value) {
        Ok(value) => value,
        Err(error) => {
            warn!(type_name, property, %error, "source value is not representable");
            return;
        }
    };

    if let Err(error) = table.set(target, property, value) {
        warn!(type_name, property, %error, "property update failed");
    }
}
