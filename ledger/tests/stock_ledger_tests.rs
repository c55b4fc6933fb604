//! Stock ledger behavior tests
//!
//! Exercises the pure ledger logic with an in-memory model of the quant
//! store: the non-negativity invariant, break-bulk pairing, all-or-nothing
//! transfers, and BOM consumption scaling.

use std::collections::HashMap;

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use shared::{Unit, UnitTree};
use stock_ledger::services::manufacturing::{scaled_consumption, ProductionOrderStatus};
use stock_ledger::services::quants::MovementType;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Ledger tuple identity: (product, location, batch-or-none, unit)
type Tuple = (Uuid, Uuid, Option<Uuid>, Uuid);

/// In-memory model of the quant store with the same non-negativity rule
/// the database enforces: an absent tuple starts at zero, and any delta
/// that would take a tuple below zero is rejected without mutating it.
#[derive(Default)]
struct LedgerModel {
    quants: HashMap<Tuple, Decimal>,
}

impl LedgerModel {
    fn balance(&self, key: &Tuple) -> Decimal {
        self.quants.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    fn apply(&mut self, key: Tuple, delta: Decimal) -> Result<Decimal, String> {
        let next = self.balance(&key) + delta;
        if next < Decimal::ZERO {
            return Err(format!("delta {delta} would leave balance {next}"));
        }
        self.quants.insert(key, next);
        Ok(next)
    }

    /// All deltas succeed together or none apply, like one transaction
    fn apply_all(&mut self, deltas: &[(Tuple, Decimal)]) -> Result<(), String> {
        let snapshot = self.quants.clone();
        for (key, delta) in deltas {
            if let Err(e) = self.apply(*key, *delta) {
                self.quants = snapshot;
                return Err(e);
            }
        }
        Ok(())
    }
}

fn tuple(product: Uuid, location: Uuid, unit: Uuid) -> Tuple {
    (product, location, None, unit)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod ledger_tests {
    use super::*;

    /// Decrementing an absent tuple fails; the implicit balance is zero
    #[test]
    fn test_decrement_absent_tuple_fails() {
        let mut model = LedgerModel::default();
        let key = tuple(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(model.apply(key, dec("-1")).is_err());
        assert_eq!(model.balance(&key), dec("0"));
    }

    /// Increment then decrement back to exactly zero is allowed
    #[test]
    fn test_decrement_to_zero_allowed() {
        let mut model = LedgerModel::default();
        let key = tuple(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        model.apply(key, dec("10")).unwrap();
        assert_eq!(model.apply(key, dec("-10")).unwrap(), dec("0"));
    }

    /// A rejected decrement leaves the prior balance untouched
    #[test]
    fn test_rejected_decrement_preserves_balance() {
        let mut model = LedgerModel::default();
        let key = tuple(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        model.apply(key, dec("10")).unwrap();
        assert!(model.apply(key, dec("-15")).is_err());
        assert_eq!(model.balance(&key), dec("10"));
    }

    /// Batched and unbatched stock of the same product are distinct tuples
    #[test]
    fn test_batch_distinguishes_tuples() {
        let mut model = LedgerModel::default();
        let (product, location, unit) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let unbatched = (product, location, None, unit);
        let batched = (product, location, Some(Uuid::new_v4()), unit);

        model.apply(unbatched, dec("5")).unwrap();
        model.apply(batched, dec("7")).unwrap();

        assert_eq!(model.balance(&unbatched), dec("5"));
        assert_eq!(model.balance(&batched), dec("7"));
    }

    /// Break-bulk of 2 boxes (ratio 12) from a stock of 5 boxes leaves
    /// 3 boxes and 24 units
    #[test]
    fn test_break_bulk_boxes_into_units() {
        let base = Uuid::new_v4();
        let bx = Uuid::new_v4();
        let tree = UnitTree::new([
            Unit {
                id: base,
                tenant_id: Uuid::nil(),
                name: "Unit".to_string(),
                category: "Count".to_string(),
                ratio: dec("1"),
                base_unit_id: None,
            },
            Unit {
                id: bx,
                tenant_id: Uuid::nil(),
                name: "Box".to_string(),
                category: "Count".to_string(),
                ratio: dec("12"),
                base_unit_id: Some(base),
            },
        ]);

        let mut model = LedgerModel::default();
        let (product, location) = (Uuid::new_v4(), Uuid::new_v4());
        let box_key = tuple(product, location, bx);
        let unit_key = tuple(product, location, base);
        model.apply(box_key, dec("5")).unwrap();

        let quantity = dec("2");
        let factor = tree.conversion_factor(bx, base).unwrap();
        model
            .apply_all(&[(box_key, -quantity), (unit_key, quantity * factor)])
            .unwrap();

        assert_eq!(model.balance(&box_key), dec("3"));
        assert_eq!(model.balance(&unit_key), dec("24"));
    }

    /// Transferring 15 when only 10 are on hand fails and changes nothing
    /// at either location
    #[test]
    fn test_transfer_insufficient_stock_rolls_back() {
        let mut model = LedgerModel::default();
        let product = Uuid::new_v4();
        let unit = Uuid::new_v4();
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let from_key = tuple(product, from, unit);
        let to_key = tuple(product, to, unit);
        model.apply(from_key, dec("10")).unwrap();

        let result = model.apply_all(&[(from_key, dec("-15")), (to_key, dec("15"))]);

        assert!(result.is_err());
        assert_eq!(model.balance(&from_key), dec("10"));
        assert_eq!(model.balance(&to_key), dec("0"));
    }

    /// A failing second line rolls back the first line's decrement
    #[test]
    fn test_multi_line_transfer_is_atomic() {
        let mut model = LedgerModel::default();
        let unit = Uuid::new_v4();
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let product_a = Uuid::new_v4();
        let product_b = Uuid::new_v4();
        model.apply(tuple(product_a, from, unit), dec("20")).unwrap();
        model.apply(tuple(product_b, from, unit), dec("1")).unwrap();

        let result = model.apply_all(&[
            (tuple(product_a, from, unit), dec("-20")),
            (tuple(product_a, to, unit), dec("20")),
            (tuple(product_b, from, unit), dec("-5")),
            (tuple(product_b, to, unit), dec("5")),
        ]);

        assert!(result.is_err());
        assert_eq!(model.balance(&tuple(product_a, from, unit)), dec("20"));
        assert_eq!(model.balance(&tuple(product_a, to, unit)), dec("0"));
        assert_eq!(model.balance(&tuple(product_b, from, unit)), dec("1"));
    }

    /// A completion whose components are insufficient consumes nothing,
    /// yields nothing, and leaves the order Planned
    #[test]
    fn test_failed_production_completion_changes_nothing() {
        let mut model = LedgerModel::default();
        let unit = Uuid::new_v4();
        let location = Uuid::new_v4();
        let flour = Uuid::new_v4();
        let sugar = Uuid::new_v4();
        let cake = Uuid::new_v4();
        model.apply(tuple(flour, location, unit), dec("100")).unwrap();
        model.apply(tuple(sugar, location, unit), dec("5")).unwrap();

        let mut status = ProductionOrderStatus::Planned;
        let order_quantity = dec("10");
        // 2 flour and 1 sugar per cake; sugar is short.
        let result = model.apply_all(&[
            (
                tuple(flour, location, unit),
                -scaled_consumption(dec("2"), order_quantity),
            ),
            (
                tuple(sugar, location, unit),
                -scaled_consumption(dec("1"), order_quantity),
            ),
            (tuple(cake, location, unit), order_quantity),
        ]);
        if result.is_ok() {
            status = ProductionOrderStatus::Completed;
        }

        assert!(result.is_err());
        assert_eq!(status, ProductionOrderStatus::Planned);
        assert_eq!(model.balance(&tuple(flour, location, unit)), dec("100"));
        assert_eq!(model.balance(&tuple(sugar, location, unit)), dec("5"));
        assert_eq!(model.balance(&tuple(cake, location, unit)), dec("0"));
    }

    /// BOM consumption scales linearly with the order quantity
    #[test]
    fn test_scaled_consumption() {
        assert_eq!(scaled_consumption(dec("0.25"), dec("100")), dec("25"));
        assert_eq!(scaled_consumption(dec("3"), dec("1")), dec("3"));
        assert_eq!(scaled_consumption(dec("1.5"), dec("4")), dec("6"));
    }

    /// Journal movement types serialize to their stored snake_case form
    #[test]
    fn test_movement_type_labels() {
        assert_eq!(MovementType::Adjustment.as_str(), "adjustment");
        assert_eq!(MovementType::Repack.as_str(), "repack");
        assert_eq!(MovementType::PurchaseReceipt.as_str(), "purchase_receipt");
        assert_eq!(MovementType::ProductionConsume.as_str(), "production_consume");
        assert_eq!(MovementType::ProductionYield.as_str(), "production_yield");
        assert_eq!(MovementType::InitialSeed.as_str(), "initial_seed");
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn delta_strategy() -> impl Strategy<Value = Decimal> {
        (-1_000i64..=1_000).prop_map(|n| Decimal::new(n, 1))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// No sequence of accepted deltas can drive a balance negative
        #[test]
        fn prop_balance_never_negative(deltas in prop::collection::vec(delta_strategy(), 1..40)) {
            let mut model = LedgerModel::default();
            let key = tuple(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

            for delta in deltas {
                let _ = model.apply(key, delta);
                prop_assert!(model.balance(&key) >= Decimal::ZERO);
            }
        }

        /// The balance equals the sum of the accepted deltas
        #[test]
        fn prop_balance_is_sum_of_accepted(deltas in prop::collection::vec(delta_strategy(), 1..40)) {
            let mut model = LedgerModel::default();
            let key = tuple(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

            let mut accepted = Decimal::ZERO;
            for delta in deltas {
                if model.apply(key, delta).is_ok() {
                    accepted += delta;
                }
            }
            prop_assert_eq!(model.balance(&key), accepted);
        }

        /// A break-bulk pair conserves stock through the conversion factor:
        /// the source loses exactly what the target gains, scaled
        #[test]
        fn prop_break_bulk_conserves(
            ratio in (1u32..=6).prop_map(|a| Decimal::from(2u64.pow(a) * 3)),
            stock in (1i64..=1_000).prop_map(Decimal::from),
            taken in (1i64..=1_000).prop_map(Decimal::from),
        ) {
            prop_assume!(taken <= stock);

            let mut model = LedgerModel::default();
            let (product, location) = (Uuid::new_v4(), Uuid::new_v4());
            let (bulk, each) = (Uuid::new_v4(), Uuid::new_v4());
            let bulk_key = tuple(product, location, bulk);
            let each_key = tuple(product, location, each);
            model.apply(bulk_key, stock).unwrap();

            model
                .apply_all(&[(bulk_key, -taken), (each_key, taken * ratio)])
                .unwrap();

            prop_assert_eq!(model.balance(&bulk_key), stock - taken);
            prop_assert_eq!(model.balance(&each_key), taken * ratio);
        }

        /// scaled_consumption is linear in the order quantity
        #[test]
        fn prop_scaled_consumption_linear(
            per_unit in (1i64..=10_000).prop_map(|n| Decimal::new(n, 2)),
            q1 in (1i64..=1_000).prop_map(Decimal::from),
            q2 in (1i64..=1_000).prop_map(Decimal::from),
        ) {
            let combined = scaled_consumption(per_unit, q1 + q2);
            let split = scaled_consumption(per_unit, q1) + scaled_consumption(per_unit, q2);
            prop_assert_eq!(combined, split);
        }
    }
}
