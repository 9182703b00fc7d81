//! Element identity, kinds and fingerprints.

use super::objects::{Index, MaterializedView, ParameterizedView, Sequence, View};
use super::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a grain element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// A sequence generator.
    Sequence,
    /// An ordinary table.
    Table,
    /// A secondary index on a table.
    Index,
    /// A plain view.
    View,
    /// A view taking parameters (a table-valued function in most dialects).
    ParameterizedView,
    /// A table maintained by triggers from an aggregation over a source table.
    MaterializedView,
}

impl ElementKind {
    /// Name stored in element status rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Sequence => "SEQUENCE",
            ElementKind::Table => "TABLE",
            ElementKind::Index => "INDEX",
            ElementKind::View => "VIEW",
            ElementKind::ParameterizedView => "PARAMETERIZED_VIEW",
            ElementKind::MaterializedView => "MATERIALIZED_VIEW",
        }
    }

    /// Parse the stored name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SEQUENCE" => Some(ElementKind::Sequence),
            "TABLE" => Some(ElementKind::Table),
            "INDEX" => Some(ElementKind::Index),
            "VIEW" => Some(ElementKind::View),
            "PARAMETERIZED_VIEW" => Some(ElementKind::ParameterizedView),
            "MATERIALIZED_VIEW" => Some(ElementKind::MaterializedView),
            _ => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified reference to an element: grain, name and kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    /// Grain the element belongs to.
    pub grain: String,
    /// Element name.
    pub name: String,
    /// Element kind.
    pub kind: ElementKind,
}

impl ElementRef {
    /// Create a new reference.
    pub fn new(grain: impl Into<String>, name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            grain: grain.into(),
            name: name.into(),
            kind,
        }
    }

    /// Reference to a table.
    pub fn table(grain: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(grain, name, ElementKind::Table)
    }

    /// Reference to a sequence.
    pub fn sequence(grain: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(grain, name, ElementKind::Sequence)
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.kind, self.grain, self.name)
    }
}

/// Content fingerprint of a declaration: byte length and 32-bit checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Length of the declaration in bytes.
    pub length: u32,
    /// 32-bit checksum of the declaration.
    pub checksum: u32,
}

impl Fingerprint {
    /// Create a fingerprint from known values.
    pub fn new(length: u32, checksum: u32) -> Self {
        Self { length, checksum }
    }

    /// Fingerprint a declaration: its byte length and the leading 32 bits of
    /// its blake3 digest.
    pub fn of(declaration: &[u8]) -> Self {
        let digest = blake3::hash(declaration);
        let bytes = digest.as_bytes();
        Self {
            length: u32::try_from(declaration.len()).unwrap_or(u32::MAX),
            checksum: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Checksum rendered as 8 upper-case hex digits.
    pub fn checksum_hex(&self) -> String {
        checksum_to_hex(self.checksum)
    }
}

/// Render a checksum as 8 upper-case hex digits.
pub fn checksum_to_hex(checksum: u32) -> String {
    hex::encode_upper(checksum.to_be_bytes())
}

/// Parse a checksum rendered by [`checksum_to_hex`].
pub fn checksum_from_hex(s: &str) -> Option<u32> {
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(s, &mut bytes).ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// A grain element. Each variant carries its own declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Element {
    /// Sequence declaration.
    Sequence(Sequence),
    /// Table declaration.
    Table(Table),
    /// Index declaration.
    Index(Index),
    /// View declaration.
    View(View),
    /// Parameterized view declaration.
    ParameterizedView(ParameterizedView),
    /// Materialized view declaration.
    MaterializedView(MaterializedView),
}

impl Element {
    /// Element name.
    pub fn name(&self) -> &str {
        match self {
            Element::Sequence(s) => &s.name,
            Element::Table(t) => &t.name,
            Element::Index(i) => &i.name,
            Element::View(v) => &v.name,
            Element::ParameterizedView(v) => &v.name,
            Element::MaterializedView(v) => &v.name,
        }
    }

    /// Name of the owning grain.
    pub fn grain(&self) -> &str {
        match self {
            Element::Sequence(s) => &s.grain,
            Element::Table(t) => &t.grain,
            Element::Index(i) => &i.grain,
            Element::View(v) => &v.grain,
            Element::ParameterizedView(v) => &v.grain,
            Element::MaterializedView(v) => &v.grain,
        }
    }

    /// Element kind.
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Sequence(_) => ElementKind::Sequence,
            Element::Table(_) => ElementKind::Table,
            Element::Index(_) => ElementKind::Index,
            Element::View(_) => ElementKind::View,
            Element::ParameterizedView(_) => ElementKind::ParameterizedView,
            Element::MaterializedView(_) => ElementKind::MaterializedView,
        }
    }

    /// Fingerprint of the declaration.
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            Element::Sequence(s) => s.fingerprint,
            Element::Table(t) => t.fingerprint,
            Element::Index(i) => i.fingerprint,
            Element::View(v) => v.fingerprint,
            Element::ParameterizedView(v) => v.fingerprint,
            Element::MaterializedView(v) => v.fingerprint,
        }
    }

    fn fingerprint_mut(&mut self) -> &mut Fingerprint {
        match self {
            Element::Sequence(s) => &mut s.fingerprint,
            Element::Table(t) => &mut t.fingerprint,
            Element::Index(i) => &mut i.fingerprint,
            Element::View(v) => &mut v.fingerprint,
            Element::ParameterizedView(v) => &mut v.fingerprint,
            Element::MaterializedView(v) => &mut v.fingerprint,
        }
    }

    /// Compute the fingerprint from the serialized declaration unless one
    /// was supplied.
    pub(crate) fn seal_fingerprint(&mut self) -> Result<(), serde_json::Error> {
        if self.fingerprint() == Fingerprint::default() {
            let computed = Fingerprint::of(&serde_json::to_vec(self)?);
            *self.fingerprint_mut() = computed;
        }
        Ok(())
    }

    /// Reference identifying this element.
    pub fn to_ref(&self) -> ElementRef {
        ElementRef::new(self.grain(), self.name(), self.kind())
    }

    /// Outgoing references: the elements this one depends on.
    pub fn references(&self) -> Vec<ElementRef> {
        match self {
            Element::Sequence(_) => Vec::new(),
            Element::Table(t) => t.references(),
            Element::Index(i) => vec![ElementRef::table(&i.grain, &i.table)],
            Element::View(v) => v.references.clone(),
            Element::ParameterizedView(v) => v.references.clone(),
            Element::MaterializedView(v) => vec![ElementRef::table(&v.grain, &v.source_table)],
        }
    }

    /// Rebind the element to a grain. Used when a grain adopts elements.
    pub(crate) fn set_grain(&mut self, grain: &str) {
        let slot = match self {
            Element::Sequence(s) => &mut s.grain,
            Element::Table(t) => &mut t.grain,
            Element::Index(i) => &mut i.grain,
            Element::View(v) => &mut v.grain,
            Element::ParameterizedView(v) => &mut v.grain,
            Element::MaterializedView(v) => &mut v.grain,
        };
        if slot.as_str() != grain {
            *slot = grain.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_hex_roundtrip() {
        assert_eq!(checksum_to_hex(0xDEADBEEF), "DEADBEEF");
        assert_eq!(checksum_to_hex(0x1F), "0000001F");
        assert_eq!(checksum_from_hex("0000001F"), Some(0x1F));
        assert_eq!(checksum_from_hex("deadbeef"), Some(0xDEADBEEF));
        assert_eq!(checksum_from_hex("XYZ"), None);
        assert_eq!(checksum_from_hex("123456789"), None);
    }

    #[test]
    fn test_fingerprint_of() {
        let a = Fingerprint::of(b"create table t1 (id int)");
        let b = Fingerprint::of(b"create table t1 (id int)");
        let c = Fingerprint::of(b"create table t1 (id bigint)");
        assert_eq!(a, b);
        assert_eq!(a.length, 24);
        assert_ne!(a.checksum, c.checksum);
        assert_eq!(a.checksum_hex().len(), 8);
    }

    #[test]
    fn test_kind_names() {
        for kind in [
            ElementKind::Sequence,
            ElementKind::Table,
            ElementKind::Index,
            ElementKind::View,
            ElementKind::ParameterizedView,
            ElementKind::MaterializedView,
        ] {
            assert_eq!(ElementKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ElementKind::parse("trigger"), None);
    }

    #[test]
    fn test_element_ref_display() {
        let r = ElementRef::table("g1", "t1");
        assert_eq!(r.to_string(), "TABLE g1.t1");
    }
}
