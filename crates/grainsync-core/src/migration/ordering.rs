//! Dependency ordering of grain elements.
//!
//! Elements are applied sequences first, then tables, then views of all
//! kinds, then indices. Inside that frame an element always follows every
//! element it transitively references, wherever in the score those live.

use super::error::MigrationError;
use crate::score::{ElementKind, ElementRef, Score};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Orders elements so that every element comes after what it references.
pub struct DependencyOrderer<'s> {
    score: &'s Score,
    /// Transitive references per element, filled on demand.
    reach: HashMap<ElementRef, HashSet<ElementRef>>,
}

impl<'s> DependencyOrderer<'s> {
    /// Create an orderer over a score.
    pub fn new(score: &'s Score) -> Self {
        Self {
            score,
            reach: HashMap::new(),
        }
    }

    /// Whether `a` transitively references `b`.
    pub fn depends_on(&mut self, a: &ElementRef, b: &ElementRef) -> Result<bool, MigrationError> {
        self.visit(a, &mut Vec::new())?;
        Ok(self.reach.get(a).is_some_and(|r| r.contains(b)))
    }

    /// Sort a worklist.
    ///
    /// Fails with [`MigrationError::ReferenceCycle`] if the references of any
    /// listed element loop, and with [`MigrationError::Model`] if they name
    /// an element the score does not declare.
    pub fn sort(&mut self, elements: Vec<ElementRef>) -> Result<Vec<ElementRef>, MigrationError> {
        for element in &elements {
            self.visit(element, &mut Vec::new())?;
        }

        let position: HashMap<&ElementRef, usize> =
            elements.iter().enumerate().map(|(i, e)| (e, i)).collect();
        let mut pending = vec![0usize; elements.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); elements.len()];
        for (i, element) in elements.iter().enumerate() {
            for target in self.reach.get(element).into_iter().flatten() {
                if let Some(&j) = position.get(target) {
                    pending[i] += 1;
                    dependents[j].push(i);
                }
            }
        }

        let keys: Vec<(u8, u8)> = elements
            .iter()
            .map(|e| (kind_rank(e.kind), self.heuristic_class(e)))
            .collect();

        let mut ready: BinaryHeap<Reverse<(u8, u8, usize)>> = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse((keys[i].0, keys[i].1, i)))
            .collect();

        let mut order = Vec::with_capacity(elements.len());
        while let Some(Reverse((_, _, i))) = ready.pop() {
            order.push(i);
            for &d in &dependents[i] {
                pending[d] -= 1;
                if pending[d] == 0 {
                    ready.push(Reverse((keys[d].0, keys[d].1, d)));
                }
            }
        }

        if order.len() != elements.len() {
            let stuck = pending
                .iter()
                .enumerate()
                .filter(|(_, n)| **n > 0)
                .map(|(i, _)| elements[i].clone())
                .collect();
            return Err(MigrationError::ReferenceCycle(stuck));
        }

        let mut slots: Vec<Option<ElementRef>> = elements.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    /// 0 for elements that are referenced and reference nothing, 2 for
    /// elements that reference others and are referenced by none, 1 otherwise.
    fn heuristic_class(&self, element: &ElementRef) -> u8 {
        let referenced = self.score.is_referenced(element);
        let references = self
            .score
            .resolve(element)
            .is_some_and(|e| !e.references().is_empty());
        match (referenced, references) {
            (true, false) => 0,
            (false, true) => 2,
            _ => 1,
        }
    }

    /// Depth-first walk filling `reach` for `element` and everything it
    /// references. `path` holds the elements currently being visited.
    fn visit(
        &mut self,
        element: &ElementRef,
        path: &mut Vec<ElementRef>,
    ) -> Result<(), MigrationError> {
        if self.reach.contains_key(element) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|e| e == element) {
            let mut cycle = path[start..].to_vec();
            cycle.push(element.clone());
            return Err(MigrationError::ReferenceCycle(cycle));
        }

        let score = self.score;
        let declared = score.resolve(element).ok_or_else(|| {
            MigrationError::Model(format!("unresolved reference to {}", element))
        })?;

        path.push(element.clone());
        let mut reach = HashSet::new();
        for target in declared.references() {
            self.visit(&target, path)?;
            if let Some(indirect) = self.reach.get(&target) {
                reach.extend(indirect.iter().cloned());
            }
            reach.insert(target);
        }
        path.pop();

        self.reach.insert(element.clone(), reach);
        Ok(())
    }
}

fn kind_rank(kind: ElementKind) -> u8 {
    match kind {
        ElementKind::Sequence => 0,
        ElementKind::Table => 1,
        ElementKind::View | ElementKind::ParameterizedView | ElementKind::MaterializedView => 2,
        ElementKind::Index => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{
        Column, ColumnDefault, ColumnType, ForeignKey, Grain, Index, MaterializedView, Sequence,
        Table, VersionString, View,
    };

    fn id() -> Column {
        Column::new("id", ColumnType::Integer).not_null()
    }

    fn crm() -> Grain {
        Grain::new("crm", VersionString::default())
            .with_element(Index::new("crm", "ix_orders", "orders", ["customer"]))
            .with_element(View::new("crm", "v_big", "select").reading(ElementRef::table("crm", "orders")))
            .with_element(
                Table::new("crm", "orders")
                    .with_column(id())
                    .with_column(Column::new("customer", ColumnType::Integer))
                    .with_primary_key(["id"])
                    .with_foreign_key(ForeignKey::new("fk_cust", ["customer"], "crm", "customers")),
            )
            .with_element(
                Table::new("crm", "customers")
                    .with_column(id().with_default(ColumnDefault::Sequence("cust_seq".into())))
                    .with_primary_key(["id"]),
            )
            .with_element(Sequence::new("crm", "cust_seq"))
            .with_element(
                MaterializedView::new("crm", "totals", "orders")
                    .group_by("customer")
                    .count("n"),
            )
    }

    fn refs(grain: &Grain) -> Vec<ElementRef> {
        grain.elements.iter().map(|e| e.to_ref()).collect()
    }

    fn pos(order: &[ElementRef], name: &str) -> usize {
        order.iter().position(|e| e.name == name).unwrap()
    }

    #[test]
    fn test_sort_kind_frame_and_references() {
        let score = Score::new(vec![crm()]).unwrap();
        let mut orderer = DependencyOrderer::new(&score);
        let order = orderer.sort(refs(score.grain("crm").unwrap())).unwrap();

        assert_eq!(order.len(), 6);
        assert_eq!(order[0].kind, ElementKind::Sequence);
        assert!(pos(&order, "customers") < pos(&order, "orders"));
        assert!(pos(&order, "orders") < pos(&order, "v_big"));
        assert!(pos(&order, "orders") < pos(&order, "totals"));
        assert_eq!(order[5].name, "ix_orders");
    }

    #[test]
    fn test_transitive_reference_outside_worklist() {
        let score = Score::new(vec![crm()]).unwrap();
        let mut orderer = DependencyOrderer::new(&score);

        // v_big -> orders -> customers: customers is reachable through an
        // element that is not in the worklist.
        let v_big = ElementRef::new("crm", "v_big", ElementKind::View);
        let customers = ElementRef::table("crm", "customers");
        assert!(orderer.depends_on(&v_big, &customers).unwrap());
        assert!(!orderer.depends_on(&customers, &v_big).unwrap());
    }

    #[test]
    fn test_views_follow_views_they_read() {
        let grain = Grain::new("g", VersionString::default())
            .with_element(View::new("g", "a", "select").reading(ElementRef::new("g", "b", ElementKind::View)))
            .with_element(View::new("g", "b", "select").reading(ElementRef::new("g", "c", ElementKind::View)))
            .with_element(View::new("g", "c", "select"));
        let score = Score::new(vec![grain]).unwrap();
        let order = DependencyOrderer::new(&score)
            .sort(refs(score.grain("g").unwrap()))
            .unwrap();
        let names: Vec<&str> = order.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["c", "b", "a"]);
    }

    #[test]
    fn test_cross_grain_order() {
        let shop = Grain::new("shop", VersionString::default()).with_element(
            Table::new("shop", "invoices")
                .with_column(id())
                .with_column(Column::new("customer", ColumnType::Integer))
                .with_primary_key(["id"])
                .with_foreign_key(ForeignKey::new("fk_inv", ["customer"], "crm", "customers")),
        );
        let score = Score::new(vec![shop, crm()]).unwrap();
        let mut worklist = refs(score.grain("shop").unwrap());
        worklist.extend(refs(score.grain("crm").unwrap()));

        let order = DependencyOrderer::new(&score).sort(worklist).unwrap();
        assert!(pos(&order, "customers") < pos(&order, "invoices"));
    }

    #[test]
    fn test_ties_keep_input_order() {
        let grain = Grain::new("g", VersionString::default())
            .with_element(Sequence::new("g", "s2"))
            .with_element(Sequence::new("g", "s1"))
            .with_element(Sequence::new("g", "s3"));
        let score = Score::new(vec![grain]).unwrap();
        let order = DependencyOrderer::new(&score)
            .sort(refs(score.grain("g").unwrap()))
            .unwrap();
        let names: Vec<&str> = order.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["s2", "s1", "s3"]);
    }

    #[test]
    fn test_cycle_detected() {
        let grain = Grain::new("g", VersionString::default())
            .with_element(View::new("g", "a", "select").reading(ElementRef::new("g", "b", ElementKind::View)))
            .with_element(View::new("g", "b", "select").reading(ElementRef::new("g", "a", ElementKind::View)));
        let score = Score::new(vec![grain]).unwrap();
        let err = DependencyOrderer::new(&score)
            .sort(refs(score.grain("g").unwrap()))
            .unwrap_err();
        match err {
            MigrationError::ReferenceCycle(path) => {
                assert_eq!(path.len(), 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_unresolved_reference() {
        let score = Score::new(vec![crm()]).unwrap();
        let missing = ElementRef::table("crm", "nope");
        assert!(matches!(
            DependencyOrderer::new(&score).sort(vec![missing]),
            Err(MigrationError::Model(_))
        ));
    }
}
