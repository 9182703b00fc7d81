//! The complete schema model.

use super::element::{Element, ElementRef};
use super::grain::Grain;
use crate::error::Error;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// The complete, validated schema model: every grain of the application.
///
/// The score is read-only once built. Incoming references are derived
/// from the elements' outgoing references at construction time.
#[derive(Debug, Clone)]
pub struct Score {
    grains: Vec<Grain>,
    by_name: HashMap<String, usize>,
    referenced_by: HashMap<ElementRef, Vec<ElementRef>>,
}

impl Score {
    /// Build and validate a score.
    ///
    /// Fails on duplicate grain names, duplicate element names within a
    /// grain, and references to undeclared elements. Elements and grains
    /// declared without a fingerprint get one computed from their
    /// declaration.
    pub fn new(mut grains: Vec<Grain>) -> Result<Self, Error> {
        for grain in &mut grains {
            grain.seal_fingerprints()?;
        }

        let mut by_name = HashMap::with_capacity(grains.len());
        for (idx, grain) in grains.iter().enumerate() {
            if by_name.insert(grain.name.clone(), idx).is_some() {
                return Err(Error::InvalidModel(format!(
                    "duplicate grain '{}'",
                    grain.name
                )));
            }

            let mut names = HashSet::new();
            for element in &grain.elements {
                if element.grain() != grain.name {
                    return Err(Error::InvalidModel(format!(
                        "element '{}' declares grain '{}' but is listed in grain '{}'",
                        element.name(),
                        element.grain(),
                        grain.name
                    )));
                }
                if !names.insert(element.name()) {
                    return Err(Error::InvalidModel(format!(
                        "duplicate element '{}' in grain '{}'",
                        element.name(),
                        grain.name
                    )));
                }
            }
        }

        let mut score = Self {
            grains,
            by_name,
            referenced_by: HashMap::new(),
        };

        let mut referenced_by: HashMap<ElementRef, Vec<ElementRef>> = HashMap::new();
        for grain in &score.grains {
            for element in &grain.elements {
                let this = element.to_ref();
                for target in element.references() {
                    if score.resolve(&target).is_none() {
                        return Err(Error::UnknownReference(target));
                    }
                    referenced_by.entry(target).or_default().push(this.clone());
                }
            }
        }
        score.referenced_by = referenced_by;

        Ok(score)
    }

    /// Deserialize a score from JSON: an array of grains.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let grains: Vec<Grain> = serde_json::from_str(json)?;
        Self::new(grains.into_iter().map(bind_elements).collect())
    }

    /// Read a JSON score from a file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// All grains in declaration order.
    pub fn grains(&self) -> &[Grain] {
        &self.grains
    }

    /// Get a grain by name.
    pub fn grain(&self, name: &str) -> Option<&Grain> {
        self.by_name.get(name).map(|&idx| &self.grains[idx])
    }

    /// Resolve a reference to the element it names.
    pub fn resolve(&self, reference: &ElementRef) -> Option<&Element> {
        self.grain(&reference.grain)?
            .element(&reference.name, reference.kind)
    }

    /// Elements that reference `element`.
    pub fn referenced_by(&self, element: &ElementRef) -> &[ElementRef] {
        self.referenced_by
            .get(element)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any element references `element`.
    pub fn is_referenced(&self, element: &ElementRef) -> bool {
        !self.referenced_by(element).is_empty()
    }
}

/// Elements deserialized without a grain name inherit the enclosing grain.
fn bind_elements(mut grain: Grain) -> Grain {
    let name = grain.name.clone();
    for element in &mut grain.elements {
        if element.grain().is_empty() {
            element.set_grain(&name);
        }
    }
    grain
}
