//! Unit conversion tests
//!
//! Covers the conversion tree: factor-to-root accumulation, root
//! compatibility, and the round-trip property
//! `factor(A, B) * factor(B, A) == 1` for units sharing a root.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use shared::{ConversionError, Unit, UnitTree};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn unit(id: Uuid, name: &str, ratio: Decimal, parent: Option<Uuid>) -> Unit {
    Unit {
        id,
        tenant_id: Uuid::nil(),
        name: name.to_string(),
        category: "Weight".to_string(),
        ratio,
        base_unit_id: parent,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Test the documented example: Box ratio 12 over base Unit
    #[test]
    fn test_box_to_unit_factor() {
        let base = Uuid::new_v4();
        let bx = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(base, "Unit", dec("1"), None),
            unit(bx, "Box", dec("12"), Some(base)),
        ]);

        assert_eq!(tree.conversion_factor(bx, base).unwrap(), dec("12"));
        assert_eq!(
            tree.conversion_factor(base, bx).unwrap(),
            dec("1") / dec("12")
        );
    }

    /// Self-conversion short-circuits to 1 even for an unknown unit id
    #[test]
    fn test_self_conversion() {
        let tree = UnitTree::default();
        let id = Uuid::new_v4();
        assert_eq!(tree.conversion_factor(id, id).unwrap(), Decimal::ONE);
    }

    /// Factors accumulate multiplicatively along the parent chain
    #[test]
    fn test_three_level_chain() {
        let gram = Uuid::new_v4();
        let kilo = Uuid::new_v4();
        let tonne = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(gram, "Gram", dec("1"), None),
            unit(kilo, "Kilogram", dec("1000"), Some(gram)),
            unit(tonne, "Tonne", dec("1000"), Some(kilo)),
        ]);

        assert_eq!(tree.conversion_factor(tonne, gram).unwrap(), dec("1000000"));
        assert_eq!(tree.conversion_factor(tonne, kilo).unwrap(), dec("1000"));
        assert_eq!(tree.convert(dec("2.5"), kilo, gram).unwrap(), dec("2500"));
    }

    /// Siblings convert through the shared root
    #[test]
    fn test_sibling_units() {
        let piece = Uuid::new_v4();
        let bx = Uuid::new_v4();
        let pallet = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(piece, "Piece", dec("1"), None),
            unit(bx, "Box", dec("12"), Some(piece)),
            unit(pallet, "Pallet", dec("480"), Some(piece)),
        ]);

        // 1 pallet = 480 pieces = 40 boxes
        assert_eq!(tree.conversion_factor(pallet, bx).unwrap(), dec("40"));
    }

    /// Units under different roots are a configuration error
    #[test]
    fn test_incompatible_roots() {
        let gram = Uuid::new_v4();
        let litre = Uuid::new_v4();
        let ml = Uuid::new_v4();
        let tree = UnitTree::new([
            unit(gram, "Gram", dec("1"), None),
            unit(litre, "Litre", dec("1"), None),
            unit(ml, "Millilitre", dec("0.001"), Some(litre)),
        ]);

        assert!(matches!(
            tree.conversion_factor(gram, ml),
            Err(ConversionError::IncompatibleUnits { .. })
        ));
    }

    /// Missing units are reported, not defaulted
    #[test]
    fn test_unknown_unit() {
        let known = Uuid::new_v4();
        let unknown = Uuid::new_v4();
        let tree = UnitTree::new([unit(known, "Piece", dec("1"), None)]);

        assert_eq!(
            tree.conversion_factor(known, unknown),
            Err(ConversionError::UnknownUnit(unknown))
        );
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Ratios whose divisions terminate in decimal (products of 2s and 5s),
    /// so round-trip equality is exact
    fn ratio_strategy() -> impl Strategy<Value = Decimal> {
        (0u32..=6, 0u32..=6)
            .prop_map(|(a, b)| Decimal::from(2u64.pow(a)) * Decimal::from(5u64.pow(b)))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// factor(A, B) * factor(B, A) == 1 for any two units sharing a root
        #[test]
        fn prop_round_trip_factor(r1 in ratio_strategy(), r2 in ratio_strategy()) {
            let root = Uuid::new_v4();
            let mid = Uuid::new_v4();
            let leaf = Uuid::new_v4();
            let tree = UnitTree::new([
                unit(root, "Root", dec("1"), None),
                unit(mid, "Mid", r1, Some(root)),
                unit(leaf, "Leaf", r2, Some(mid)),
            ]);

            for (a, b) in [(leaf, root), (leaf, mid), (mid, root)] {
                let forward = tree.conversion_factor(a, b).unwrap();
                let backward = tree.conversion_factor(b, a).unwrap();
                prop_assert_eq!(forward * backward, Decimal::ONE);
            }
        }

        /// Converting a quantity there and back returns the original
        #[test]
        fn prop_convert_round_trip(
            r1 in ratio_strategy(),
            quantity in (1i64..=100_000).prop_map(|n| Decimal::new(n, 2))
        ) {
            let root = Uuid::new_v4();
            let child = Uuid::new_v4();
            let tree = UnitTree::new([
                unit(root, "Root", dec("1"), None),
                unit(child, "Child", r1, Some(root)),
            ]);

            let there = tree.convert(quantity, child, root).unwrap();
            let back = tree.convert(there, root, child).unwrap();
            prop_assert_eq!(back, quantity);
        }

        /// Chain factors compose: factor(leaf, root) == r1 * r2
        #[test]
        fn prop_chain_factor_composes(r1 in ratio_strategy(), r2 in ratio_strategy()) {
            let root = Uuid::new_v4();
            let mid = Uuid::new_v4();
            let leaf = Uuid::new_v4();
            let tree = UnitTree::new([
                unit(root, "Root", dec("1"), None),
                unit(mid, "Mid", r1, Some(root)),
                unit(leaf, "Leaf", r2, Some(mid)),
            ]);

            prop_assert_eq!(tree.conversion_factor(leaf, root).unwrap(), r1 * r2);
        }

        /// Conversion factors between units sharing a root are positive
        #[test]
        fn prop_factor_positive(r1 in ratio_strategy(), r2 in ratio_strategy()) {
            let root = Uuid::new_v4();
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            let tree = UnitTree::new([
                unit(root, "Root", dec("1"), None),
                unit(a, "A", r1, Some(root)),
                unit(b, "B", r2, Some(root)),
            ]);

            prop_assert!(tree.conversion_factor(a, b).unwrap() > Decimal::ZERO);
        }
    }
}
