//! Grains: named, versioned units of schema.

use super::element::{Element, ElementKind, Fingerprint};
use super::objects::Index;
use super::table::Table;
use super::version::VersionString;
use serde::{Deserialize, Serialize};

/// A grain: a named, versioned collection of schema elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grain {
    /// Grain name; also the database schema name.
    pub name: String,
    /// Declared version.
    #[serde(default)]
    pub version: VersionString,
    /// Fingerprint of the grain's declaration.
    #[serde(default)]
    pub fingerprint: Fingerprint,
    /// Elements in declaration order.
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Grain {
    /// Create an empty grain.
    pub fn new(name: impl Into<String>, version: VersionString) -> Self {
        Self {
            name: name.into(),
            version,
            fingerprint: Fingerprint::default(),
            elements: Vec::new(),
        }
    }

    /// Set the fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Add an element. The element is rebound to this grain.
    pub fn with_element(mut self, element: impl Into<Element>) -> Self {
        let mut element = element.into();
        element.set_grain(&self.name);
        self.elements.push(element);
        self
    }

    /// Fill missing element fingerprints, then the grain's own from its
    /// elements. Supplied fingerprints are kept.
    pub(crate) fn seal_fingerprints(&mut self) -> Result<(), serde_json::Error> {
        for element in &mut self.elements {
            element.seal_fingerprint()?;
        }
        if self.fingerprint == Fingerprint::default() {
            self.fingerprint = Fingerprint::of(&serde_json::to_vec(&self.elements)?);
        }
        Ok(())
    }

    /// Declared byte length.
    pub fn length(&self) -> u32 {
        self.fingerprint.length
    }

    /// Declared checksum.
    pub fn checksum(&self) -> u32 {
        self.fingerprint.checksum
    }

    /// Find an element by name and kind.
    pub fn element(&self, name: &str, kind: ElementKind) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| e.kind() == kind && e.name() == name)
    }

    /// Find a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables().find(|t| t.name == name)
    }

    /// All tables of the grain.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.elements.iter().filter_map(|e| match e {
            Element::Table(t) => Some(t),
            _ => None,
        })
    }

    /// All indices of the grain.
    pub fn indices(&self) -> impl Iterator<Item = &Index> {
        self.elements.iter().filter_map(|e| match e {
            Element::Index(i) => Some(i),
            _ => None,
        })
    }

    /// All elements of one kind.
    pub fn elements_of(&self, kind: ElementKind) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(move |e| e.kind() == kind)
    }
}

macro_rules! impl_into_element {
    ($($ty:ident),*) => {
        $(
            impl From<super::$ty> for Element {
                fn from(value: super::$ty) -> Self {
                    Element::$ty(value)
                }
            }
        )*
    };
}

impl_into_element!(Sequence, Table, Index, View, ParameterizedView, MaterializedView);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Column, ColumnType, Sequence};

    #[test]
    fn test_with_element_rebinds_grain() {
        let grain = Grain::new("g1", VersionString::default())
            .with_element(Sequence::new("", "s1"))
            .with_element(
                Table::new("other", "t1").with_column(Column::new("id", ColumnType::Integer)),
            );

        assert_eq!(grain.elements.len(), 2);
        assert!(grain.elements.iter().all(|e| e.grain() == "g1"));
        assert!(grain.table("t1").is_some());
        assert!(grain.element("s1", ElementKind::Sequence).is_some());
        assert!(grain.element("s1", ElementKind::Table).is_none());
    }
}
