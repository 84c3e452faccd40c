//! The in-memory stage: a single-layer scene graph of prims.

use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use thiserror::Error;

use super::path::SdfPath;
use super::prim::{Prim, Specifier};

/// Errors raised while editing a stage.
#[derive(Error, Debug, PartialEq)]
pub enum StageError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("No prim at path {0}")]
    PrimNotFound(SdfPath),

    #[error("Type mismatch on {attribute}: expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("Cannot connect {attribute} to {target}: target is not a property")]
    InvalidConnection { attribute: String, target: String },
}

/// Layer-level metadata.
#[derive(Clone, Debug)]
pub struct StageMetadata {
    pub default_prim: Option<String>,
    /// `Y` or `Z`
    pub up_axis: String,
    /// `None` when unauthored; USD then assumes centimeters
    pub meters_per_unit: Option<f64>,
    pub start_time_code: Option<f64>,
    pub end_time_code: Option<f64>,
    pub time_codes_per_second: f64,
    pub frames_per_second: Option<f64>,
}

impl Default for StageMetadata {
    fn default() -> Self {
        Self {
            default_prim: None,
            up_axis: "Y".to_string(),
            meters_per_unit: None,
            start_time_code: None,
            end_time_code: None,
            time_codes_per_second: 24.0,
            frames_per_second: None,
        }
    }
}

impl StageMetadata {
    /// Authored `metersPerUnit`, or the USD fallback of 0.01.
    pub fn meters_per_unit(&self) -> f64 {
        self.meters_per_unit.unwrap_or(0.01)
    }
}

/// A stage holding every prim of one layer, keyed by path.
#[derive(Clone, Debug, Default)]
pub struct Stage {
    prims: IndexMap<SdfPath, Prim>,
    root_children: Vec<String>,
    pub metadata: StageMetadata,
    /// Files packaged alongside the root layer (USDZ), keyed by archive path
    pub assets: HashMap<String, Vec<u8>>,
    /// Location of the root layer on disk, used to resolve relative asset paths
    pub root_layer_path: Option<PathBuf>,
}

impl Stage {
    /// Create an empty stage.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prim(&self, path: &SdfPath) -> Option<&Prim> {
        self.prims.get(path)
    }

    pub fn prim_mut(&mut self, path: &SdfPath) -> Option<&mut Prim> {
        self.prims.get_mut(path)
    }

    /// Fallible lookup for edit operations.
    pub fn require_prim_mut(&mut self, path: &SdfPath) -> Result<&mut Prim, StageError> {
        self.prims
            .get_mut(path)
            .ok_or_else(|| StageError::PrimNotFound(path.clone()))
    }

    pub fn prim_count(&self) -> usize {
        self.prims.len()
    }

    /// Names of the prims directly under the absolute root.
    pub fn root_child_names(&self) -> &[String] {
        &self.root_children
    }

    /// Root prims in authored order.
    pub fn root_prims(&self) -> impl Iterator<Item = &Prim> {
        self.root_children.iter().filter_map(|name| {
            SdfPath::abs_root()
                .append_child(name)
                .ok()
                .and_then(|p| self.prims.get(&p))
        })
    }

    /// Children of a prim in authored order.
    pub fn children<'a>(&'a self, prim: &'a Prim) -> impl Iterator<Item = &'a Prim> + 'a {
        prim.child_names().iter().filter_map(move |name| {
            prim.path()
                .append_child(name)
                .ok()
                .and_then(|p| self.prims.get(&p))
        })
    }

    /// Define a prim of the given type at `path`.
    ///
    /// Missing ancestors are defined as typeless `def` prims. An existing
    /// prim keeps its properties; its type is reasserted and its specifier
    /// becomes `def`.
    pub fn define_prim(&mut self, path: &SdfPath, type_name: &str) -> Result<&mut Prim, StageError> {
        if path.is_property() || path.is_abs_root() {
            return Err(StageError::InvalidPath(path.to_string()));
        }

        for ancestor in path.prefixes() {
            if self.prims.contains_key(&ancestor) {
                continue;
            }
            self.link_child(&ancestor);
            self.prims
                .insert(ancestor.clone(), Prim::new(ancestor, Specifier::Def, ""));
        }

        let prim = self.require_prim_mut(path)?;
        prim.specifier = Specifier::Def;
        prim.type_name = type_name.to_string();
        Ok(prim)
    }

    /// Insert a parsed prim, merging with an existing spec at the same path.
    pub(crate) fn insert_prim(&mut self, prim: Prim) {
        let path = prim.path().clone();
        if let Some(existing) = self.prims.get_mut(&path) {
            existing.merge(prim);
            return;
        }
        for ancestor in path.parent().prefixes() {
            if !self.prims.contains_key(&ancestor) {
                self.link_child(&ancestor);
                self.prims
                    .insert(ancestor.clone(), Prim::new(ancestor, Specifier::Over, ""));
            }
        }
        self.link_child(&path);
        self.prims.insert(path, prim);
    }

    fn link_child(&mut self, path: &SdfPath) {
        let name = path.name().to_string();
        let parent = path.parent();
        let siblings = if parent.is_abs_root() {
            &mut self.root_children
        } else {
            match self.prims.get_mut(&parent) {
                Some(p) => &mut p.children,
                None => return,
            }
        };
        if !siblings.contains(&name) {
            siblings.push(name);
        }
    }

    /// Depth-first pre-order traversal of defined, active, non-abstract prims.
    ///
    /// `class` and `over` prims and inactive prims are pruned together with
    /// their descendants.
    pub fn traverse(&self) -> Vec<&Prim> {
        let mut out = Vec::new();
        for prim in self.root_prims() {
            self.traverse_from(prim, &mut out);
        }
        out
    }

    fn traverse_from<'a>(&'a self, prim: &'a Prim, out: &mut Vec<&'a Prim>) {
        if prim.specifier != Specifier::Def || !prim.is_active() {
            return;
        }
        out.push(prim);
        for child in self.children(prim) {
            self.traverse_from(child, out);
        }
    }

    /// Whether the prim at `path` has the given schema type.
    pub fn is_a(&self, path: &SdfPath, type_name: &str) -> bool {
        self.prim(path).is_some_and(|p| p.is_a(type_name))
    }

    /// Resolve the prim that owns a connection/relationship target.
    pub fn target_prim(&self, target: &SdfPath) -> Option<&Prim> {
        self.prim(&target.prim_path())
    }

    /// The prim named by `defaultPrim`, if any.
    pub fn default_prim(&self) -> Option<&Prim> {
        let name = self.metadata.default_prim.as_deref()?;
        let path = SdfPath::abs_root().append_child(name).ok()?;
        self.prim(&path)
    }
}
