//! Inheritable parameter blocks.
//!
//! A [`ParameterBlock`] stores explicitly set property values and an optional
//! parent block. Lookups return the block's own value when it was set, and
//! otherwise defer to the parent chain. List properties declared with
//! `merge_with_inherited` combine the inherited items with the block's own.
//!
//! Blocks feed [`crate::dependency::Dependency::inherited`], whose fingerprint
//! only covers properties that are specified somewhere in the chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
  Null,
  Bool(bool),
  Int(i64),
  Str(String),
  List(Vec<PropertyValue>),
}

impl From<bool> for PropertyValue {
  fn from(v: bool) -> Self {
    PropertyValue::Bool(v)
  }
}

impl From<i64> for PropertyValue {
  fn from(v: i64) -> Self {
    PropertyValue::Int(v)
  }
}

impl From<&str> for PropertyValue {
  fn from(v: &str) -> Self {
    PropertyValue::Str(v.to_string())
  }
}

impl From<String> for PropertyValue {
  fn from(v: String) -> Self {
    PropertyValue::Str(v)
  }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
  fn from(v: Vec<T>) -> Self {
    PropertyValue::List(v.into_iter().map(Into::into).collect())
  }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(PropertyValue::Null)
  }
}

impl std::fmt::Display for PropertyValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PropertyValue::Null => write!(f, "null"),
      PropertyValue::Bool(v) => write!(f, "{v}"),
      PropertyValue::Int(v) => write!(f, "{v}"),
      PropertyValue::Str(v) => write!(f, "{v:?}"),
      PropertyValue::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{item}")?;
        }
        write!(f, "]")
      }
    }
  }
}

/// Anything that can report named property values for fingerprinting.
pub trait PropertySource: Send + Sync {
  /// Current value of `name`, or `None` if the object has no such property.
  fn property(&self, name: &str) -> Option<PropertyValue>;
}

impl PropertySource for BTreeMap<String, PropertyValue> {
  fn property(&self, name: &str) -> Option<PropertyValue> {
    self.get(name).cloned()
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
  #[error("property is not defined: {0}")]
  Undefined(String),
}

/// Declaration of one property of a parameter block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
  pub name: String,
  pub merge_with_inherited: bool,
}

/// The set of properties a family of parameter blocks supports, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyDefs {
  defs: Vec<PropertyDef>,
}

impl PropertyDefs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn define(mut self, name: &str) -> Self {
    self.defs.push(PropertyDef {
      name: name.to_string(),
      merge_with_inherited: false,
    });
    self
  }

  /// Define a list property whose value is the parent's items followed by the block's own.
  pub fn define_merged(mut self, name: &str) -> Self {
    self.defs.push(PropertyDef {
      name: name.to_string(),
      merge_with_inherited: true,
    });
    self
  }

  pub fn get(&self, name: &str) -> Option<&PropertyDef> {
    self.defs.iter().find(|d| d.name == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &PropertyDef> {
    self.defs.iter()
  }
}

/// A parameter block with explicit values and an optional parent to inherit from.
#[derive(Debug, Clone)]
pub struct ParameterBlock {
  defs: Arc<PropertyDefs>,
  values: BTreeMap<String, PropertyValue>,
  parent: Option<Arc<ParameterBlock>>,
}

impl ParameterBlock {
  pub fn new(defs: Arc<PropertyDefs>) -> Self {
    Self {
      defs,
      values: BTreeMap::new(),
      parent: None,
    }
  }

  /// Create a block inheriting unset values from `parent`.
  pub fn with_parent(parent: Arc<ParameterBlock>) -> Self {
    Self {
      defs: parent.defs.clone(),
      values: BTreeMap::new(),
      parent: Some(parent),
    }
  }

  pub fn defs(&self) -> &PropertyDefs {
    &self.defs
  }

  pub fn parent(&self) -> Option<&Arc<ParameterBlock>> {
    self.parent.as_ref()
  }

  fn check(&self, name: &str) -> Result<&PropertyDef, ParamError> {
    self.defs.get(name).ok_or_else(|| ParamError::Undefined(name.to_string()))
  }

  pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<(), ParamError> {
    self.check(name)?;
    self.values.insert(name.to_string(), value.into());
    Ok(())
  }

  pub fn clear(&mut self, name: &str) -> Result<(), ParamError> {
    self.check(name)?;
    self.values.remove(name);
    Ok(())
  }

  /// True if the property is set on this block or any of its ancestors.
  pub fn is_specified(&self, name: &str) -> Result<bool, ParamError> {
    self.check(name)?;
    if self.values.contains_key(name) {
      return Ok(true);
    }
    match &self.parent {
      Some(parent) => parent.is_specified(name),
      None => Ok(false),
    }
  }

  /// Effective value of a property, or `None` if it is not specified anywhere in the chain.
  pub fn get(&self, name: &str) -> Result<Option<PropertyValue>, ParamError> {
    let def = self.check(name)?;
    let own = self.values.get(name);
    let inherited = match &self.parent {
      Some(parent) if own.is_none() || def.merge_with_inherited => parent.get(name)?,
      _ => None,
    };

    Ok(match (own, inherited) {
      (Some(PropertyValue::List(own)), Some(PropertyValue::List(mut merged))) if def.merge_with_inherited => {
        merged.extend(own.iter().cloned());
        Some(PropertyValue::List(merged))
      }
      (Some(own), _) => Some(own.clone()),
      (None, inherited) => inherited,
    })
  }

  /// Effective values of every specified property, keyed by name.
  pub fn specified_values(&self) -> BTreeMap<String, PropertyValue> {
    let mut values = BTreeMap::new();
    for def in self.defs.iter() {
      if let Ok(Some(value)) = self.get(&def.name) {
        values.insert(def.name.clone(), value);
      }
    }
    values
  }
}

impl PropertySource for ParameterBlock {
  fn property(&self, name: &str) -> Option<PropertyValue> {
    self.get(name).ok().flatten()
  }
}
