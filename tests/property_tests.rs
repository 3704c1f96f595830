//! Property-based tests for the pure pieces of checkout and payment handling.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use storefront_api::{
    entities::order::OrderItems,
    services::payments::{minor_amount, payment_description, OrderCodeSequence, MAX_ORDER_CODE},
};

fn cart_strategy() -> impl Strategy<Value = BTreeMap<i32, i32>> {
    prop::collection::btree_map(0i32..300, -5i32..50, 0..40)
}

// Amounts with up to two decimal places, from 0.01 to 1_000_000.00
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn snapshot_keeps_exactly_the_positive_entries(cart in cart_strategy()) {
        let items = OrderItems::positive(&cart);

        prop_assert!(items.iter().all(|(_, quantity)| quantity > 0));
        for (product_id, quantity) in &cart {
            prop_assert_eq!(items.contains(*product_id), *quantity > 0);
        }
        let expected: i64 = cart.values().filter(|q| **q > 0).map(|q| i64::from(*q)).sum();
        prop_assert_eq!(items.total_quantity(), expected);
    }

    #[test]
    fn minor_amount_is_positive_and_rounded(amount in amount_strategy(), scale in 1i64..1_000) {
        let minor = minor_amount(amount, scale).unwrap();
        prop_assert!(minor > 0);
        prop_assert_eq!(Decimal::from(minor), (amount * Decimal::from(scale)).round());
    }

    #[test]
    fn non_positive_amounts_are_never_charged(cents in -100_000_000i64..=0) {
        prop_assert!(minor_amount(Decimal::new(cents, 2), 300).is_err());
    }

    #[test]
    fn description_fits_the_provider_limit(raw in ".{0,80}", code in 1i64..MAX_ORDER_CODE, max in 1usize..40) {
        let description = payment_description(Some(&raw), code, max);
        prop_assert!(description.chars().count() <= max);
        prop_assert!(!description.is_empty());
    }
}

#[test]
fn order_codes_never_repeat() {
    let codes = OrderCodeSequence::new();
    let issued: Vec<i64> = (0..5_000).map(|_| codes.next()).collect();
    assert!(issued.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(issued.iter().all(|code| *code < MAX_ORDER_CODE));
}
