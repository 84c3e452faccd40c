//! Scene description paths.
//!
//! A path names either a prim (`/World/Materials/Wood`) or a property on a
//! prim (`/World/Materials/Wood.inputs:diffuseColor`). The absolute root is `/`.

use std::fmt;

use super::stage::StageError;

/// An absolute prim or property path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SdfPath {
    prim: String,
    property: Option<String>,
}

impl SdfPath {
    /// The absolute root path `/`.
    pub fn abs_root() -> Self {
        Self {
            prim: "/".to_string(),
            property: None,
        }
    }

    /// Parse a path string such as `/A/B` or `/A/B.outputs:result`.
    ///
    /// Angle brackets from USDA syntax (`</A/B>`) are accepted and stripped.
    pub fn new(path: &str) -> Result<Self, StageError> {
        let trimmed = path.trim().trim_start_matches('<').trim_end_matches('>');
        if !trimmed.starts_with('/') {
            return Err(StageError::InvalidPath(path.to_string()));
        }

        let (prim, property) = match trimmed.find('.') {
            Some(dot) => (&trimmed[..dot], Some(&trimmed[dot + 1..])),
            None => (trimmed, None),
        };

        if prim.len() > 1 && (prim.ends_with('/') || prim.contains("//")) {
            return Err(StageError::InvalidPath(path.to_string()));
        }
        if prim.split('/').skip(1).any(|name| !is_valid_name(name) && !name.is_empty()) {
            return Err(StageError::InvalidPath(path.to_string()));
        }
        if let Some(property) = property {
            if property.is_empty() || prim == "/" {
                return Err(StageError::InvalidPath(path.to_string()));
            }
        }

        Ok(Self {
            prim: prim.to_string(),
            property: property.map(str::to_string),
        })
    }

    /// Whether this is the absolute root `/`.
    pub fn is_abs_root(&self) -> bool {
        self.prim == "/" && self.property.is_none()
    }

    /// Whether this path names a property.
    pub fn is_property(&self) -> bool {
        self.property.is_some()
    }

    /// The prim portion of this path.
    pub fn prim_path(&self) -> SdfPath {
        Self {
            prim: self.prim.clone(),
            property: None,
        }
    }

    /// The property name, if this is a property path.
    pub fn property_name(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// The last element: the property name for property paths,
    /// otherwise the prim name. Empty for the root.
    pub fn name(&self) -> &str {
        if let Some(property) = &self.property {
            return property;
        }
        self.prim.rsplit('/').next().unwrap_or("")
    }

    /// The parent path. The root is its own parent.
    pub fn parent(&self) -> SdfPath {
        if self.property.is_some() {
            return self.prim_path();
        }
        match self.prim.rfind('/') {
            Some(0) | None => Self::abs_root(),
            Some(idx) => Self {
                prim: self.prim[..idx].to_string(),
                property: None,
            },
        }
    }

    /// Append a child prim name.
    pub fn append_child(&self, name: &str) -> Result<SdfPath, StageError> {
        if self.property.is_some() || !is_valid_name(name) {
            return Err(StageError::InvalidPath(format!("{}/{}", self, name)));
        }
        let prim = if self.prim == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.prim, name)
        };
        Ok(Self {
            prim,
            property: None,
        })
    }

    /// Append a property name (e.g. `outputs:result`).
    pub fn append_property(&self, name: &str) -> Result<SdfPath, StageError> {
        if self.property.is_some() || self.prim == "/" || name.is_empty() {
            return Err(StageError::InvalidPath(format!("{}.{}", self, name)));
        }
        Ok(Self {
            prim: self.prim.clone(),
            property: Some(name.to_string()),
        })
    }

    /// Ancestor prim paths from the outermost down to (and including) this prim.
    /// The root is not included.
    pub fn prefixes(&self) -> Vec<SdfPath> {
        let mut out = Vec::new();
        let mut current = String::new();
        for name in self.prim.split('/').skip(1).filter(|n| !n.is_empty()) {
            current.push('/');
            current.push_str(name);
            out.push(Self {
                prim: current.clone(),
                property: None,
            });
        }
        out
    }
}

impl fmt::Display for SdfPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}", self.prim, property),
            None => write!(f, "{}", self.prim),
        }
    }
}

/// Prim names are identifiers: a letter or underscore followed by
/// letters, digits or underscores.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prim_and_property() {
        let path = SdfPath::new("</World/Mat/stReader.outputs:result>").unwrap();
        assert!(path.is_property());
        assert_eq!(path.property_name(), Some("outputs:result"));
        assert_eq!(path.prim_path().to_string(), "/World/Mat/stReader");
        assert_eq!(path.to_string(), "/World/Mat/stReader.outputs:result");
    }

    #[test]
    fn test_append_and_parent() {
        let mat = SdfPath::new("/World/Mat").unwrap();
        let reader = mat.append_child("stReader").unwrap();
        assert_eq!(reader.to_string(), "/World/Mat/stReader");
        assert_eq!(reader.parent(), mat);
        assert_eq!(reader.name(), "stReader");

        let output = reader.append_property("outputs:result").unwrap();
        assert_eq!(output.parent(), reader);

        assert!(SdfPath::new("/World").unwrap().parent().is_abs_root());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(SdfPath::new("World").is_err());
        assert!(SdfPath::new("/World//Mat").is_err());
        assert!(SdfPath::new("/1World").is_err());
        assert!(SdfPath::abs_root().append_child("bad name").is_err());
        assert!(SdfPath::abs_root().append_property("x").is_err());
    }

    #[test]
    fn test_prefixes() {
        let path = SdfPath::new("/A/B/C").unwrap();
        let prefixes: Vec<String> = path.prefixes().iter().map(|p| p.to_string()).collect();
        assert_eq!(prefixes, vec!["/A", "/A/B", "/A/B/C"]);
    }
}
