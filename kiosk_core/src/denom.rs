//! Denomination catalog: bills, coins, sort slots, and their fixed value/position tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Currency partition of the bill catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Php,
    Usd,
    Eur,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Currency::Php => "PHP",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        };
        f.write_str(s)
    }
}

/// A bill denomination. The catalog is closed: these twelve variants are the only
/// bills this crate ever produces or accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillDenom {
    Php20,
    Php50,
    Php100,
    Php200,
    Php500,
    Php1000,
    Usd10,
    Usd50,
    Usd100,
    Eur5,
    Eur10,
    Eur20,
}

impl BillDenom {
    /// All bill denominations, in catalog order.
    pub const ALL: [BillDenom; 12] = [
        BillDenom::Php20,
        BillDenom::Php50,
        BillDenom::Php100,
        BillDenom::Php200,
        BillDenom::Php500,
        BillDenom::Php1000,
        BillDenom::Usd10,
        BillDenom::Usd50,
        BillDenom::Usd100,
        BillDenom::Eur5,
        BillDenom::Eur10,
        BillDenom::Eur20,
    ];

    /// Bills belonging to a single currency, in descending face-value order.
    #[must_use]
    pub fn descending_for(currency: Currency) -> Vec<BillDenom> {
        let mut bills: Vec<BillDenom> = BillDenom::ALL
            .iter()
            .copied()
            .filter(|d| d.currency() == currency)
            .collect();
        bills.sort_by_key(|d| std::cmp::Reverse(d.value()));
        bills
    }

    #[must_use]
    pub const fn currency(self) -> Currency {
        match self {
            BillDenom::Php20
            | BillDenom::Php50
            | BillDenom::Php100
            | BillDenom::Php200
            | BillDenom::Php500
            | BillDenom::Php1000 => Currency::Php,
            BillDenom::Usd10 | BillDenom::Usd50 | BillDenom::Usd100 => Currency::Usd,
            BillDenom::Eur5 | BillDenom::Eur10 | BillDenom::Eur20 => Currency::Eur,
        }
    }

    /// Face value in the denomination's own currency's minor-less integer unit.
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            BillDenom::Php20 => 20,
            BillDenom::Php50 => 50,
            BillDenom::Php100 => 100,
            BillDenom::Php200 => 200,
            BillDenom::Php500 => 500,
            BillDenom::Php1000 => 1000,
            BillDenom::Usd10 => 10,
            BillDenom::Usd50 => 50,
            BillDenom::Usd100 => 100,
            BillDenom::Eur5 => 5,
            BillDenom::Eur10 => 10,
            BillDenom::Eur20 => 20,
        }
    }

    /// The physical sort slot this denomination is routed to.
    #[must_use]
    pub const fn slot(self) -> SortSlot {
        match self {
            BillDenom::Php20 => SortSlot::Slot1,
            BillDenom::Php50 => SortSlot::Slot2,
            BillDenom::Php100 => SortSlot::Slot3,
            BillDenom::Php200 => SortSlot::Slot4,
            BillDenom::Php500 => SortSlot::Slot5,
            BillDenom::Php1000 => SortSlot::Slot6,
            BillDenom::Usd10 | BillDenom::Usd50 | BillDenom::Usd100 => SortSlot::Slot7,
            BillDenom::Eur5 | BillDenom::Eur10 | BillDenom::Eur20 => SortSlot::Slot8,
        }
    }

    /// Storage aggregation key: PHP bills are keyed per-denomination, USD and EUR
    /// bills are keyed per-currency because they share a single physical slot.
    #[must_use]
    pub fn storage_key(self) -> String {
        match self.currency() {
            Currency::Php => self.wire_value_string(),
            Currency::Usd => "USD".to_string(),
            Currency::Eur => "EUR".to_string(),
        }
    }

    /// Canonical wire string: the decimal face value, e.g. `PHP_100` ⇆ `"100"`.
    #[must_use]
    pub fn wire_value_string(self) -> String {
        self.value().to_string()
    }

    /// Inverse of [`BillDenom::wire_value_string`] within a currency. The catalog
    /// is closed: an unrecognized `(currency, value)` pair is not a bill.
    #[must_use]
    pub fn from_value(currency: Currency, value: u32) -> Option<BillDenom> {
        BillDenom::ALL
            .into_iter()
            .find(|d| d.currency() == currency && d.value() == value)
    }
}

impl fmt::Display for BillDenom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BillDenom::Php20 => "PHP_20",
            BillDenom::Php50 => "PHP_50",
            BillDenom::Php100 => "PHP_100",
            BillDenom::Php200 => "PHP_200",
            BillDenom::Php500 => "PHP_500",
            BillDenom::Php1000 => "PHP_1000",
            BillDenom::Usd10 => "USD_10",
            BillDenom::Usd50 => "USD_50",
            BillDenom::Usd100 => "USD_100",
            BillDenom::Eur5 => "EUR_5",
            BillDenom::Eur10 => "EUR_10",
            BillDenom::Eur20 => "EUR_20",
        };
        f.write_str(s)
    }
}

/// A coin denomination (local currency only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinDenom {
    One,
    Five,
    Ten,
    Twenty,
}

impl CoinDenom {
    pub const ALL: [CoinDenom; 4] = [
        CoinDenom::One,
        CoinDenom::Five,
        CoinDenom::Ten,
        CoinDenom::Twenty,
    ];

    #[must_use]
    pub fn descending() -> Vec<CoinDenom> {
        let mut coins = CoinDenom::ALL.to_vec();
        coins.sort_by_key(|d| std::cmp::Reverse(d.value()));
        coins
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            CoinDenom::One => 1,
            CoinDenom::Five => 5,
            CoinDenom::Ten => 10,
            CoinDenom::Twenty => 20,
        }
    }

    #[must_use]
    pub fn wire_value_string(self) -> String {
        self.value().to_string()
    }

    #[must_use]
    pub fn from_value(value: u32) -> Option<CoinDenom> {
        CoinDenom::ALL.into_iter().find(|d| d.value() == value)
    }
}

impl fmt::Display for CoinDenom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// One of the 8 physical storage compartments behind the sorter rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortSlot {
    Slot1,
    Slot2,
    Slot3,
    Slot4,
    Slot5,
    Slot6,
    Slot7,
    Slot8,
}

impl SortSlot {
    /// Absolute stepper position for this slot. Slots are evenly spaced along
    /// the rail, 5840 steps apart, starting at 2920 for slot 1.
    #[must_use]
    pub const fn stepper_position(self) -> u32 {
        const STEP: u32 = 5840;
        const FIRST: u32 = 2920;
        FIRST + STEP * (self.index() as u32)
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            SortSlot::Slot1 => 0,
            SortSlot::Slot2 => 1,
            SortSlot::Slot3 => 2,
            SortSlot::Slot4 => 3,
            SortSlot::Slot5 => 4,
            SortSlot::Slot6 => 5,
            SortSlot::Slot7 => 6,
            SortSlot::Slot8 => 7,
        }
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.index() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_string_round_trip_for_every_bill() {
        for denom in BillDenom::ALL {
            let s = denom.wire_value_string();
            let value: u32 = s.parse().expect("wire value string must be numeric");
            assert_eq!(BillDenom::from_value(denom.currency(), value), Some(denom));
        }
    }

    #[test]
    fn value_string_round_trip_for_every_coin() {
        for denom in CoinDenom::ALL {
            let value: u32 = denom.wire_value_string().parse().unwrap();
            assert_eq!(CoinDenom::from_value(value), Some(denom));
        }
    }

    #[test]
    fn slot_positions_are_evenly_spaced() {
        let positions: Vec<u32> = (0..8)
            .map(|i| match i {
                0 => SortSlot::Slot1.stepper_position(),
                1 => SortSlot::Slot2.stepper_position(),
                2 => SortSlot::Slot3.stepper_position(),
                3 => SortSlot::Slot4.stepper_position(),
                4 => SortSlot::Slot5.stepper_position(),
                5 => SortSlot::Slot6.stepper_position(),
                6 => SortSlot::Slot7.stepper_position(),
                _ => SortSlot::Slot8.stepper_position(),
            })
            .collect();
        for w in positions.windows(2) {
            assert_eq!(w[1] - w[0], 5840);
        }
        assert_eq!(positions[0], 2920);
        assert_eq!(positions[7], 43800);
    }

    #[test]
    fn usd_and_eur_bills_share_one_slot_each() {
        assert_eq!(BillDenom::Usd10.slot(), SortSlot::Slot7);
        assert_eq!(BillDenom::Usd100.slot(), SortSlot::Slot7);
        assert_eq!(BillDenom::Eur5.slot(), SortSlot::Slot8);
        assert_eq!(BillDenom::Eur20.slot(), SortSlot::Slot8);
    }

    #[test]
    fn php_bills_are_keyed_per_denom_usd_eur_per_currency() {
        assert_eq!(BillDenom::Php100.storage_key(), "100");
        assert_eq!(BillDenom::Usd10.storage_key(), "USD");
        assert_eq!(BillDenom::Usd100.storage_key(), "USD");
        assert_eq!(BillDenom::Eur5.storage_key(), "EUR");
    }
}
