//! Greedy, inventory-aware, preference-sensitive change calculator.
//!
//! Pure function: never mutates the caller's inventory maps, never touches
//! I/O. Grounded in the teacher's `PayoutPool::generate_payout_plan`, which
//! this generalizes from a single hopper pool to the bill-then-coin,
//! two-currency-catalog shape this domain needs.

use crate::denom::{BillDenom, CoinDenom, Currency};
use crate::error::InsufficientInventory;
use crate::transaction::{DispenseKind, DispensePlan, DispensePlanItem};
use std::collections::BTreeMap;

/// Bill inventory keyed by wire value string (e.g. `"100"`), local-currency only.
pub type BillInventory = BTreeMap<String, u32>;
/// Coin inventory keyed by wire value string.
pub type CoinInventory = BTreeMap<String, u32>;

/// Compute a payout plan for `amount` of local currency from the given
/// inventories, optionally preferring certain face values first.
///
/// - `amount == 0` returns an empty, exact plan.
/// - `amount` exceeding available inventory fails with [`InsufficientInventory`].
/// - Only [`Currency::Php`] is currently supported; any other currency is a
///   caller configuration error, surfaced by the caller as `KioskError::Configuration`.
pub fn calculate_change(
    amount: u32,
    available_bills: &BillInventory,
    available_coins: &CoinInventory,
    preferred_denoms: &[u32],
) -> Result<DispensePlan, InsufficientInventory> {
    if amount == 0 {
        return Ok(DispensePlan {
            items: Vec::new(),
            total_amount: 0,
            is_exact: true,
        });
    }

    let mut bills = available_bills.clone();
    let mut coins = available_coins.clone();
    let mut remaining = amount;
    let mut items = Vec::new();

    for value in bill_order(preferred_denoms) {
        if remaining == 0 {
            break;
        }
        let key = value.to_string();
        let avail = bills.get(&key).copied().unwrap_or(0);
        if avail == 0 {
            continue;
        }
        let count = (remaining / value).min(avail);
        if count == 0 {
            continue;
        }
        bills.insert(key.clone(), avail - count);
        remaining -= count * value;
        items.push(DispensePlanItem {
            denom: key,
            kind: DispenseKind::Bill,
            count,
            value,
        });
    }

    for value in coin_order(preferred_denoms) {
        if remaining == 0 {
            break;
        }
        let key = value.to_string();
        let avail = coins.get(&key).copied().unwrap_or(0);
        if avail == 0 {
            continue;
        }
        let count = (remaining / value).min(avail);
        if count == 0 {
            continue;
        }
        coins.insert(key.clone(), avail - count);
        remaining -= count * value;
        items.push(DispensePlanItem {
            denom: key,
            kind: DispenseKind::Coin,
            count,
            value,
        });
    }

    if remaining > 0 {
        return Err(InsufficientInventory {
            requested: amount,
            available: amount - remaining,
            shortfall: remaining,
        });
    }

    let total_amount: u32 = items.iter().map(DispensePlanItem::amount).sum();
    Ok(DispensePlan {
        items,
        total_amount,
        is_exact: true,
    })
}

/// Bill face values in dispensing order: preferred values (descending) first,
/// then the remaining catalog (descending).
fn bill_order(preferred_denoms: &[u32]) -> Vec<u32> {
    ordered_values(
        BillDenom::descending_for(Currency::Php)
            .into_iter()
            .map(BillDenom::value)
            .collect(),
        preferred_denoms,
    )
}

fn coin_order(preferred_denoms: &[u32]) -> Vec<u32> {
    ordered_values(
        CoinDenom::descending().into_iter().map(CoinDenom::value).collect(),
        preferred_denoms,
    )
}

fn ordered_values(catalog_descending: Vec<u32>, preferred_denoms: &[u32]) -> Vec<u32> {
    if preferred_denoms.is_empty() {
        return catalog_descending;
    }
    let mut preferred: Vec<u32> = catalog_descending
        .iter()
        .copied()
        .filter(|v| preferred_denoms.contains(v))
        .collect();
    let mut rest: Vec<u32> = catalog_descending
        .into_iter()
        .filter(|v| !preferred_denoms.contains(v))
        .collect();
    preferred.append(&mut rest);
    preferred
}

#[cfg(test)]
mod tests {
    use super::*;

    fn php_bill_inventory() -> BillInventory {
        [("1000", 50), ("500", 50), ("200", 50), ("100", 50), ("50", 50), ("20", 50)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn zero_amount_returns_empty_exact_plan() {
        let plan = calculate_change(0, &php_bill_inventory(), &CoinInventory::new(), &[]).unwrap();
        assert!(plan.items.is_empty());
        assert_eq!(plan.total_amount, 0);
        assert!(plan.is_exact);
    }

    #[test]
    fn greedy_descending_without_preference() {
        let plan = calculate_change(250, &php_bill_inventory(), &CoinInventory::new(), &[]).unwrap();
        assert_eq!(plan.items[0].denom, "200");
        assert_eq!(plan.items[0].count, 1);
        assert_eq!(plan.items[1].denom, "50");
        assert_eq!(plan.items[1].count, 1);
        assert_eq!(plan.total_amount, 250);
    }

    #[test]
    fn preferred_denoms_are_used_first() {
        let plan = calculate_change(250, &php_bill_inventory(), &CoinInventory::new(), &[50, 200]).unwrap();
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.items[0].denom, "200");
        assert_eq!(plan.items[0].count, 1);
        assert_eq!(plan.items[1].denom, "50");
        assert_eq!(plan.items[1].count, 1);
    }

    #[test]
    fn bills_precede_coins() {
        let mut bills = BillInventory::new();
        bills.insert("100".to_string(), 1);
        let mut coins = CoinInventory::new();
        coins.insert("20".to_string(), 10);
        let plan = calculate_change(120, &bills, &coins, &[]).unwrap();
        assert_eq!(plan.items[0].kind, DispenseKind::Bill);
        assert_eq!(plan.items.last().unwrap().kind, DispenseKind::Coin);
    }

    #[test]
    fn insufficient_inventory_reports_shortfall() {
        let mut bills = BillInventory::new();
        bills.insert("100".to_string(), 1);
        let err = calculate_change(250, &bills, &CoinInventory::new(), &[]).unwrap_err();
        assert_eq!(err.requested, 250);
        assert_eq!(err.available, 100);
        assert_eq!(err.shortfall, 150);
    }

    #[test]
    fn plan_never_mutates_caller_inventory() {
        let bills = php_bill_inventory();
        let snapshot = bills.clone();
        let _ = calculate_change(100, &bills, &CoinInventory::new(), &[]).unwrap();
        assert_eq!(bills, snapshot);
    }

    #[test]
    fn sum_of_items_equals_total_amount() {
        // 1000 + 500 + 200 + 50 + 20 = 1770, exactly representable greedily.
        let plan = calculate_change(1770, &php_bill_inventory(), &CoinInventory::new(), &[]).unwrap();
        let sum: u32 = plan.items.iter().map(DispensePlanItem::amount).sum();
        assert_eq!(sum, plan.total_amount);
        assert_eq!(plan.total_amount, 1770);
    }
}
