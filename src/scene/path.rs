use std::fmt;

use serde::{Deserialize, Serialize};

/// Absolute scene-graph path: `/World/Tileset` for prims,
/// `/World/Tileset.cesium:url` for properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenePath(String);

impl ScenePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The pseudo-root `/`.
    pub fn root() -> Self {
        Self("/".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Byte offset of the `.` that starts the property part, if any.
    fn property_split(&self) -> Option<usize> {
        let last_segment_start = self.0.rfind('/').map_or(0, |i| i + 1);
        self.0[last_segment_start..]
            .find('.')
            .map(|i| last_segment_start + i)
    }

    pub fn is_property_path(&self) -> bool {
        self.property_split().is_some()
    }

    pub fn is_prim_path(&self) -> bool {
        !self.is_empty() && !self.is_root() && !self.is_property_path()
    }

    /// The prim part of a property path; prim paths are returned unchanged.
    pub fn prim_path(&self) -> ScenePath {
        match self.property_split() {
            Some(i) => Self(self.0[..i].to_string()),
            None => self.clone(),
        }
    }

    /// Property name for property paths (`cesium:url`).
    pub fn property_name(&self) -> Option<&str> {
        self.property_split().map(|i| &self.0[i + 1..])
    }

    /// Last prim segment (`Tileset` for `/World/Tileset`).
    pub fn name(&self) -> &str {
        let prim_end = self.property_split().unwrap_or(self.0.len());
        let prim = &self.0[..prim_end];
        prim.rfind('/').map_or(prim, |i| &prim[i + 1..])
    }

    /// Parent prim. The parent of a property path is its prim, the parent
    /// of a top-level prim is `/`, and the root has an empty parent.
    pub fn parent(&self) -> ScenePath {
        if self.is_property_path() {
            return self.prim_path();
        }
        if self.is_root() || self.is_empty() {
            return Self::default();
        }
        match self.0.rfind('/') {
            Some(0) => Self::root(),
            Some(i) => Self(self.0[..i].to_string()),
            None => Self::default(),
        }
    }

    pub fn append_child(&self, name: &str) -> ScenePath {
        if self.is_root() {
            Self(format!("/{name}"))
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    pub fn append_property(&self, name: &str) -> ScenePath {
        Self(format!("{}.{name}", self.prim_path().0))
    }

    /// This path followed by each ancestor up to (excluding) the root.
    pub fn ancestors(&self) -> impl Iterator<Item = ScenePath> {
        let mut next = Some(self.clone());
        std::iter::from_fn(move || {
            let current = next.take()?;
            if current.is_empty() || current.is_root() {
                return None;
            }
            next = Some(current.parent());
            Some(current)
        })
    }

    /// Whether `self` is `prefix` or lies in the subtree rooted at `prefix`.
    pub fn has_prefix(&self, prefix: &ScenePath) -> bool {
        if prefix.is_root() {
            return self.0.starts_with('/');
        }
        if self.0 == prefix.0 {
            return true;
        }
        self.0.starts_with(&prefix.0)
            && matches!(self.0.as_bytes().get(prefix.0.len()), Some(b'/') | Some(b'.'))
    }
}

impl fmt::Display for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScenePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for ScenePath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_path_split() {
        let p = ScenePath::from("/World/Tileset.cesium:url");
        assert!(p.is_property_path());
        assert!(!p.is_prim_path());
        assert_eq!(p.prim_path(), ScenePath::from("/World/Tileset"));
        assert_eq!(p.property_name(), Some("cesium:url"));
        assert_eq!(p.name(), "Tileset");
    }

    #[test]
    fn prim_path_has_no_property() {
        let p = ScenePath::from("/World/Tileset");
        assert!(p.is_prim_path());
        assert_eq!(p.property_name(), None);
        assert_eq!(p.name(), "Tileset");
    }

    #[test]
    fn parent_chain() {
        let p = ScenePath::from("/World/Tileset/Imagery");
        assert_eq!(p.parent(), ScenePath::from("/World/Tileset"));
        assert_eq!(ScenePath::from("/World").parent(), ScenePath::root());
        assert!(ScenePath::root().parent().is_empty());
        assert_eq!(
            ScenePath::from("/World/Tileset.cesium:alpha").parent(),
            ScenePath::from("/World/Tileset")
        );
    }

    #[test]
    fn ancestors_include_self() {
        let p = ScenePath::from("/A/B/C");
        let all: Vec<_> = p.ancestors().map(|a| a.to_string()).collect();
        assert_eq!(all, vec!["/A/B/C", "/A/B", "/A"]);
    }

    #[test]
    fn subtree_prefix() {
        let root = ScenePath::from("/World/Tileset");
        assert!(ScenePath::from("/World/Tileset").has_prefix(&root));
        assert!(ScenePath::from("/World/Tileset/Imagery").has_prefix(&root));
        assert!(ScenePath::from("/World/Tileset.cesium:url").has_prefix(&root));
        assert!(!ScenePath::from("/World/Tileset2").has_prefix(&root));
        assert!(!ScenePath::from("/World").has_prefix(&root));
        assert!(ScenePath::from("/Anything").has_prefix(&ScenePath::root()));
    }

    #[test]
    fn append() {
        let p = ScenePath::root().append_child("World").append_child("Tileset");
        assert_eq!(p.as_str(), "/World/Tileset");
        assert_eq!(p.append_property("cesium:url").as_str(), "/World/Tileset.cesium:url");
    }
}
