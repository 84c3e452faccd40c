//! Prims, attributes and relationships.

use indexmap::IndexMap;

use super::path::SdfPath;
use super::stage::StageError;
use super::types::{TypeName, Value};

/// How a prim spec was introduced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Specifier {
    #[default]
    Def,
    Over,
    Class,
}

impl Specifier {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "def" => Some(Specifier::Def),
            "over" => Some(Specifier::Over),
            "class" => Some(Specifier::Class),
            _ => None,
        }
    }
}

/// A typed attribute with an optional default value, time samples and
/// connections.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub type_name: TypeName,
    pub uniform: bool,
    pub custom: bool,
    default: Option<Value>,
    time_samples: Vec<(f64, Value)>,
    connections: Vec<SdfPath>,
    /// Attribute metadata such as `interpolation` and `elementSize`
    pub metadata: IndexMap<String, String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, type_name: TypeName) -> Self {
        Self {
            name: name.into(),
            type_name,
            uniform: false,
            custom: false,
            default: None,
            time_samples: Vec::new(),
            connections: Vec::new(),
            metadata: IndexMap::new(),
        }
    }

    fn check(&self, value: &Value) -> Result<(), StageError> {
        if self.type_name.accepts(value) {
            Ok(())
        } else {
            Err(StageError::TypeMismatch {
                attribute: self.name.clone(),
                expected: self.type_name.to_string(),
                found: format!("{:?}", value),
            })
        }
    }

    /// Set the default value. The value must match the declared type.
    pub fn set(&mut self, value: Value) -> Result<(), StageError> {
        self.check(&value)?;
        self.default = Some(value);
        Ok(())
    }

    /// Block the default value (`= None` in USDA).
    pub fn clear(&mut self) {
        self.default = None;
    }

    /// The default (non-animated) value.
    pub fn get(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Add or replace a time sample, keeping samples ordered by time.
    pub fn set_time_sample(&mut self, time: f64, value: Value) -> Result<(), StageError> {
        self.check(&value)?;
        match self
            .time_samples
            .binary_search_by(|(t, _)| t.total_cmp(&time))
        {
            Ok(idx) => self.time_samples[idx].1 = value,
            Err(idx) => self.time_samples.insert(idx, (time, value)),
        }
        Ok(())
    }

    pub fn time_samples(&self) -> &[(f64, Value)] {
        &self.time_samples
    }

    pub fn is_animated(&self) -> bool {
        self.time_samples.len() > 1
    }

    /// Resolve the value at a time code.
    ///
    /// Time samples win over the default. Between two samples interpolable
    /// values are blended linearly, other values hold the earlier sample.
    /// Outside the sampled range the nearest sample is held.
    pub fn get_at(&self, time: f64) -> Option<Value> {
        let samples = &self.time_samples;
        if samples.is_empty() {
            return self.default.clone();
        }

        let idx = samples.partition_point(|(t, _)| *t <= time);
        if idx == 0 {
            return Some(samples[0].1.clone());
        }
        if idx == samples.len() {
            return Some(samples[idx - 1].1.clone());
        }

        let (t0, v0) = &samples[idx - 1];
        let (t1, v1) = &samples[idx];
        if (time - t0).abs() < f64::EPSILON {
            return Some(v0.clone());
        }
        let t = ((time - t0) / (t1 - t0)) as f32;
        Some(v0.lerp(v1, t).unwrap_or_else(|| v0.clone()))
    }

    /// Connect this attribute to a source property, replacing any existing
    /// connections.
    pub fn connect_to_source(&mut self, source: SdfPath) -> Result<(), StageError> {
        if !source.is_property() {
            return Err(StageError::InvalidConnection {
                attribute: self.name.clone(),
                target: source.to_string(),
            });
        }
        self.connections.clear();
        self.connections.push(source);
        Ok(())
    }

    /// Append a connection target (used while reading layers that list several).
    pub(crate) fn add_connection(&mut self, source: SdfPath) {
        if !self.connections.contains(&source) {
            self.connections.push(source);
        }
    }

    pub fn connections(&self) -> &[SdfPath] {
        &self.connections
    }

    pub fn has_connections(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Primvar interpolation metadata (`vertex`, `faceVarying`, ...).
    pub fn interpolation(&self) -> Option<&str> {
        self.metadata.get("interpolation").map(String::as_str)
    }
}

/// A relationship (e.g. `material:binding`) targeting other prims or properties.
#[derive(Clone, Debug, Default)]
pub struct Relationship {
    pub name: String,
    pub targets: Vec<SdfPath>,
}

/// A prim: a typed node in the scene graph holding properties and children.
#[derive(Clone, Debug)]
pub struct Prim {
    path: SdfPath,
    pub specifier: Specifier,
    pub type_name: String,
    /// Prim metadata (`kind`, `active`, ...) in its authored text form
    pub metadata: IndexMap<String, String>,
    attributes: IndexMap<String, Attribute>,
    relationships: IndexMap<String, Relationship>,
    pub(crate) children: Vec<String>,
}

impl Prim {
    pub fn new(path: SdfPath, specifier: Specifier, type_name: impl Into<String>) -> Self {
        Self {
            path,
            specifier,
            type_name: type_name.into(),
            metadata: IndexMap::new(),
            attributes: IndexMap::new(),
            relationships: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn path(&self) -> &SdfPath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// Child prim names in authored order.
    pub fn child_names(&self) -> &[String] {
        &self.children
    }

    /// Whether the prim is a schema type (exact match on type name).
    pub fn is_a(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }

    /// Prims are active unless `active = false` is authored.
    pub fn is_active(&self) -> bool {
        self.metadata.get("active").map(String::as_str) != Some("false")
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.get_mut(name)
    }

    /// Create an attribute, or return the existing one.
    ///
    /// An existing attribute whose type differs is retyped and loses its
    /// values, since they can no longer be valid.
    pub fn create_attribute(&mut self, name: &str, type_name: TypeName) -> &mut Attribute {
        let attr = self
            .attributes
            .entry(name.to_string())
            .or_insert_with(|| Attribute::new(name, type_name.clone()));
        if attr.type_name != type_name {
            log::debug!(
                "Retyping {}.{} from {} to {}",
                self.path,
                name,
                attr.type_name,
                type_name
            );
            *attr = Attribute::new(name, type_name);
        }
        attr
    }

    /// Insert a fully built attribute, replacing any with the same name.
    pub(crate) fn insert_attribute(&mut self, attr: Attribute) {
        self.attributes.insert(attr.name.clone(), attr);
    }

    /// Shader/material input `inputs:<name>`.
    pub fn input(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(&format!("inputs:{}", name))
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.get_mut(&format!("inputs:{}", name))
    }

    pub fn create_input(&mut self, name: &str, type_name: TypeName) -> &mut Attribute {
        self.create_attribute(&format!("inputs:{}", name), type_name)
    }

    /// Shader/material output `outputs:<name>`.
    pub fn output(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(&format!("outputs:{}", name))
    }

    pub fn create_output(&mut self, name: &str, type_name: TypeName) -> &mut Attribute {
        self.create_attribute(&format!("outputs:{}", name), type_name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.get(name)
    }

    pub fn create_relationship(&mut self, name: &str) -> &mut Relationship {
        self.relationships
            .entry(name.to_string())
            .or_insert_with(|| Relationship {
                name: name.to_string(),
                targets: Vec::new(),
            })
    }

    /// Default value of an attribute, if authored.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.attribute(name).and_then(Attribute::get)
    }

    /// Merge another spec for the same path into this prim.
    pub(crate) fn merge(&mut self, other: Prim) {
        if !other.type_name.is_empty() {
            self.type_name = other.type_name;
        }
        if other.specifier != Specifier::Over {
            self.specifier = other.specifier;
        }
        self.metadata.extend(other.metadata);
        self.attributes.extend(other.attributes);
        self.relationships.extend(other.relationships);
    }
}
