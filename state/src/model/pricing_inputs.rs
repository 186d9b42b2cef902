use std::collections::HashMap;

use super::StoneKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetalPurityPrice {
    pub id: String,
    pub label: String,
    pub price_per_gram: i64,
    pub making_charge_per_gram: i64,
}

/// Percentages added on top of each cost component to reach the MRP.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MrpMarkup {
    pub metal_percent: f64,
    pub making_percent: f64,
    pub stone_percent: f64,
    pub other_charge_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherCharge {
    pub id: String,
    pub name: String,
    pub amount: i64,
}

/// One consistent read of every stored value that feeds a derived price.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PricingInputs {
    pub metal_purities: HashMap<String, MetalPurityPrice>,
    pub markup: MrpMarkup,
    pub other_charges: Vec<OtherCharge>,
    pub stone_prices: HashMap<(StoneKind, String), i64>,
}

impl PricingInputs {
    pub fn metal_purity(&self, purity_id: &str) -> Option<&MetalPurityPrice> {
        self.metal_purities.get(purity_id)
    }

    pub fn stone_price(&self, kind: StoneKind, price_key: &str) -> Option<i64> {
        self.stone_prices
            .get(&(kind, price_key.to_string()))
            .copied()
    }

    /// Sum of every flat charge, or `None` if it does not fit in an `i64`.
    pub fn other_charges_total(&self) -> Option<i64> {
        self.other_charges
            .iter()
            .try_fold(0i64, |total, charge| total.checked_add(charge.amount))
    }
}
