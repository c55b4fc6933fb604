//! Unit-of-measure models and the conversion tree
//!
//! Units form a forest: every non-root unit references a parent via
//! `base_unit_id` with a decimal `ratio` meaning "1 of this unit equals
//! `ratio` units of the parent". Two units are convertible exactly when
//! they share a root.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum parent hops before a chain is treated as circular
const MAX_CHAIN_DEPTH: usize = 32;

/// A unit of measure scoped to a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Free-form grouping, e.g. "Weight", "Volume", "Time"
    pub category: String,
    /// 1 of this unit = `ratio` units of the parent. Unused on roots.
    pub ratio: Decimal,
    /// Parent unit; `None` marks a root
    pub base_unit_id: Option<Uuid>,
}

impl Unit {
    pub fn is_root(&self) -> bool {
        self.base_unit_id.is_none()
    }
}

/// Errors raised while resolving a conversion between two units
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("unit {0} is not defined for this tenant")]
    UnknownUnit(Uuid),

    #[error("units {from} and {to} do not share a base unit")]
    IncompatibleUnits { from: Uuid, to: Uuid },

    #[error("unit {0} has a non-positive ratio to its parent")]
    InvalidRatio(Uuid),

    #[error("unit {0} is part of a circular parent chain")]
    CircularReference(Uuid),
}

/// An in-memory forest of a tenant's units
///
/// Built once per operation from the tenant's unit rows; lookups and
/// conversions are then pure.
#[derive(Debug, Clone, Default)]
pub struct UnitTree {
    units: HashMap<Uuid, Unit>,
}

impl UnitTree {
    pub fn new(units: impl IntoIterator<Item = Unit>) -> Self {
        Self {
            units: units.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Factor `f` such that `source_qty * f = target_qty`
    ///
    /// Walks both units to their roots accumulating a factor-to-root, then
    /// divides. Fails with [`ConversionError::IncompatibleUnits`] when the
    /// roots differ.
    pub fn conversion_factor(&self, source: Uuid, target: Uuid) -> Result<Decimal, ConversionError> {
        if source == target {
            return Ok(Decimal::ONE);
        }

        let (source_root, source_factor) = self.factor_to_root(source)?;
        let (target_root, target_factor) = self.factor_to_root(target)?;

        if source_root != target_root {
            return Err(ConversionError::IncompatibleUnits {
                from: source,
                to: target,
            });
        }

        Ok(source_factor / target_factor)
    }

    /// Convert a quantity from one unit to another
    pub fn convert(
        &self,
        quantity: Decimal,
        source: Uuid,
        target: Uuid,
    ) -> Result<Decimal, ConversionError> {
        Ok(quantity * self.conversion_factor(source, target)?)
    }

    /// Walk to the root of `id`, returning the root id and the accumulated
    /// factor expressing 1 of `id` in root units
    fn factor_to_root(&self, id: Uuid) -> Result<(Uuid, Decimal), ConversionError> {
        let mut current = self
            .units
            .get(&id)
            .ok_or(ConversionError::UnknownUnit(id))?;
        let mut factor = Decimal::ONE;
        let mut hops = 0usize;

        while let Some(parent_id) = current.base_unit_id {
            if current.ratio <= Decimal::ZERO {
                return Err(ConversionError::InvalidRatio(current.id));
            }
            factor *= current.ratio;
            current = self
                .units
                .get(&parent_id)
                .ok_or(ConversionError::UnknownUnit(parent_id))?;
            hops += 1;
            if hops > MAX_CHAIN_DEPTH {
                return Err(ConversionError::CircularReference(id));
            }
        }

        Ok((current.id, factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn unit(id: Uuid, name: &str, ratio: &str, parent: Option<Uuid>) -> Unit {
        Unit {
            id,
            tenant_id: Uuid::nil(),
            name: name.to_string(),
            category: "Weight".to_string(),
            ratio: dec(ratio),
            base_unit_id: parent,
        }
    }

    #[test]
    fn self_conversion_is_identity() {
        let id = Uuid::new_v4();
        let tree = UnitTree::new([unit(id, "Piece", "1", None)]);
        assert_eq!(tree.conversion_factor(id, id).unwrap(), Decimal::ONE);
    }

    #[test]
    fn box_of_twelve_converts_down_and_up() {
        let piece = Uuid::new_v4();
        let bx = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(piece, "Piece", "1", None),
            unit(bx, "Box", "12", Some(piece)),
        ]);

        // 2 boxes are 24 pieces
        assert_eq!(tree.convert(dec("2"), bx, piece).unwrap(), dec("24"));
        // 24 pieces are 2 boxes
        assert_eq!(tree.convert(dec("24"), piece, bx).unwrap(), dec("2"));
    }

    #[test]
    fn chained_units_multiply_ratios() {
        let gram = Uuid::new_v4();
        let kilo = Uuid::new_v4();
        let tonne = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(gram, "Gram", "1", None),
            unit(kilo, "Kilogram", "1000", Some(gram)),
            unit(tonne, "Tonne", "1000", Some(kilo)),
        ]);

        assert_eq!(tree.conversion_factor(tonne, gram).unwrap(), dec("1000000"));
        assert_eq!(
            tree.conversion_factor(gram, tonne).unwrap(),
            dec("0.000001")
        );
    }

    #[test]
    fn different_roots_are_incompatible() {
        let gram = Uuid::new_v4();
        let litre = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(gram, "Gram", "1", None),
            unit(litre, "Litre", "1", None),
        ]);

        assert_eq!(
            tree.conversion_factor(gram, litre),
            Err(ConversionError::IncompatibleUnits {
                from: gram,
                to: litre,
            })
        );
    }

    #[test]
    fn incompatible_units_error_names_both_units() {
        let gram = Uuid::new_v4();
        let litre = Uuid::new_v4();
        let err = ConversionError::IncompatibleUnits {
            from: gram,
            to: litre,
        };

        let message = err.to_string();
        assert!(message.contains(&gram.to_string()));
        assert!(message.contains(&litre.to_string()));
        // Neither id is an underlying cause.
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let tree = UnitTree::default();
        let id = Uuid::new_v4();
        assert_eq!(
            tree.conversion_factor(id, Uuid::new_v4()),
            Err(ConversionError::UnknownUnit(id))
        );
    }

    #[test]
    fn circular_chain_is_detected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(a, "A", "2", Some(b)),
            unit(b, "B", "3", Some(a)),
        ]);

        assert!(matches!(
            tree.conversion_factor(a, b),
            Err(ConversionError::CircularReference(_))
        ));
    }

    #[test]
    fn non_positive_ratio_is_rejected() {
        let root = Uuid::new_v4();
        let broken = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(root, "Piece", "1", None),
            unit(broken, "Crate", "0", Some(root)),
        ]);

        assert_eq!(
            tree.conversion_factor(broken, root),
            Err(ConversionError::InvalidRatio(broken))
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        // Ratios built from 2s and 5s divide exactly in decimal, so the
        // properties can assert strict equality.
        fn ratio_strategy() -> impl Strategy<Value = Decimal> {
            (0u32..=6, 0u32..=6)
                .prop_map(|(a, b)| Decimal::from(2u64.pow(a)) * Decimal::from(5u64.pow(b)))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn factor_round_trips_to_one(r1 in ratio_strategy(), r2 in ratio_strategy()) {
                let root = Uuid::new_v4();
                let mid = Uuid::new_v4();
                let leaf = Uuid::new_v4();
                let tree = UnitTree::new([
                    Unit {
                        id: root,
                        tenant_id: Uuid::nil(),
                        name: "Root".to_string(),
                        category: "Weight".to_string(),
                        ratio: Decimal::ONE,
                        base_unit_id: None,
                    },
                    Unit {
                        id: mid,
                        tenant_id: Uuid::nil(),
                        name: "Mid".to_string(),
                        category: "Weight".to_string(),
                        ratio: r1,
                        base_unit_id: Some(root),
                    },
                    Unit {
                        id: leaf,
                        tenant_id: Uuid::nil(),
                        name: "Leaf".to_string(),
                        category: "Weight".to_string(),
                        ratio: r2,
                        base_unit_id: Some(mid),
                    },
                ]);

                for (a, b) in [(leaf, root), (leaf, mid), (mid, root)] {
                    let forward = tree.conversion_factor(a, b).unwrap();
                    let backward = tree.conversion_factor(b, a).unwrap();
                    prop_assert_eq!(forward * backward, Decimal::ONE);
                }
            }
        }
    }
}
