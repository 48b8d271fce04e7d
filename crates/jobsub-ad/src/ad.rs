//! Attribute records and chained lookup.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;
use crate::expr::Expr;
use crate::value::Value;

/// A scope that expressions can be evaluated against.
pub trait AttrLookup {
    /// Find the expression bound to `name` (case-insensitive).
    fn lookup(&self, name: &str) -> Option<&Expr>;
}

/// An ordered, case-insensitive set of named expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ad {
    attrs: Vec<(String, Expr)>,
}

impl Ad {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Insert or replace an attribute. A replaced attribute keeps its position
    /// but takes the new spelling of the name.
    pub fn insert(&mut self, name: impl Into<String>, expr: Expr) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.attrs[i] = (name, expr),
            None => self.attrs.push((name, expr)),
        }
    }

    pub fn insert_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.insert(name, Expr::Literal(value.into()));
    }

    /// Parse `text` and insert it.
    pub fn insert_expr(&mut self, name: impl Into<String>, text: &str) -> Result<(), ParseError> {
        let expr = Expr::parse(text)?;
        self.insert(name, expr);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.position(name).map(|i| &self.attrs[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Expr> {
        self.position(name).map(|i| self.attrs.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.attrs.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.iter().map(|(n, _)| n.as_str())
    }

    /// Copy every attribute of `other` into this record.
    pub fn update(&mut self, other: &Ad) {
        for (name, expr) in other.iter() {
            self.insert(name, expr.clone());
        }
    }

    /// Evaluate one attribute in the scope of this record.
    pub fn eval_attr(&self, name: &str) -> Value {
        match self.get(name) {
            Some(expr) => expr.eval(self),
            None => Value::Undefined,
        }
    }

    pub fn lookup_int(&self, name: &str) -> Option<i64> {
        match self.eval_attr(name) {
            Value::Int(i) => Some(i),
            Value::Real(r) => Some(r as i64),
            _ => None,
        }
    }

    pub fn lookup_str(&self, name: &str) -> Option<String> {
        match self.eval_attr(name) {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn lookup_bool(&self, name: &str) -> Option<bool> {
        self.eval_attr(name).as_bool()
    }

    /// Render as `Name = expr` lines.
    pub fn to_long_form(&self) -> String {
        let mut out = String::new();
        for (name, expr) in self.iter() {
            out.push_str(name);
            out.push_str(" = ");
            out.push_str(&expr.to_string());
            out.push('\n');
        }
        out
    }
}

impl AttrLookup for Ad {
    fn lookup(&self, name: &str) -> Option<&Expr> {
        self.get(name)
    }
}

impl fmt::Display for Ad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_long_form())
    }
}

impl FromIterator<(String, Expr)> for Ad {
    fn from_iter<T: IntoIterator<Item = (String, Expr)>>(iter: T) -> Self {
        let mut ad = Ad::new();
        for (name, expr) in iter {
            ad.insert(name, expr);
        }
        ad
    }
}

/// A process record layered over its cluster record.
#[derive(Debug, Clone, Copy)]
pub struct Chained<'a> {
    child: &'a Ad,
    parent: Option<&'a Ad>,
}

impl<'a> Chained<'a> {
    pub fn new(child: &'a Ad, parent: Option<&'a Ad>) -> Self {
        Self { child, parent }
    }

    pub fn child(&self) -> &'a Ad {
        self.child
    }

    pub fn parent(&self) -> Option<&'a Ad> {
        self.parent
    }

    /// Evaluate an attribute with inheritance.
    pub fn eval_attr(&self, name: &str) -> Value {
        match self.lookup(name) {
            Some(expr) => expr.eval(self),
            None => Value::Undefined,
        }
    }

    /// Collapse into one record: parent attributes first, local values win.
    pub fn flatten(&self) -> Ad {
        let mut out = self.parent.cloned().unwrap_or_default();
        out.update(self.child);
        out
    }
}

impl AttrLookup for Chained<'_> {
    fn lookup(&self, name: &str) -> Option<&Expr> {
        self.child
            .get(name)
            .or_else(|| self.parent.and_then(|p| p.get(name)))
    }
}

impl Serialize for Ad {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attrs.len()))?;
        for (name, expr) in &self.attrs {
            map.serialize_entry(name, &expr.to_string())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Ad {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AdVisitor;

        impl<'de> Visitor<'de> for AdVisitor {
            type Value = Ad;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of attribute names to expression text")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Ad, M::Error> {
                let mut ad = Ad::new();
                while let Some((name, text)) = access.next_entry::<String, String>()? {
                    let expr = Expr::parse(&text).map_err(|e| {
                        serde::de::Error::custom(format!("attribute {}: {}", name, e))
                    })?;
                    ad.insert(name, expr);
                }
                Ok(ad)
            }
        }

        deserializer.deserialize_map(AdVisitor)
    }
}
