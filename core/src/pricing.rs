use reprice_state::BillOfMaterials;
use reprice_state::MrpMarkup;
use reprice_state::PricingInputs;
use reprice_state::ProductBill;
use reprice_state::VariantPrice;
use thiserror::Error;

/// Turns one product's bill of materials into derived prices.
///
/// Implementations must be pure: the same inputs and bill always produce the
/// same quote, so re-running an unchanged catalog is a no-op.
pub trait PriceCalculator: Send + Sync + 'static {
    fn quote(&self, inputs: &PricingInputs, product: &ProductBill)
    -> Result<ProductQuote, PriceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantQuote {
    pub variant_id: String,
    pub cost_price: i64,
    pub sale_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuote {
    pub variants: Vec<VariantQuote>,
}

impl ProductQuote {
    pub fn variant_prices(&self) -> Vec<VariantPrice<'_>> {
        self.variants
            .iter()
            .map(|quote| VariantPrice {
                variant_id: quote.variant_id.as_str(),
                cost_price: quote.cost_price,
                sale_price: quote.sale_price,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceError {
    #[error("product {product_id} has no variants")]
    NoVariants { product_id: String },
    #[error("variant {variant_id} references unknown metal purity {purity_id}")]
    UnknownMetalPurity {
        variant_id: String,
        purity_id: String,
    },
    #[error("variant {variant_id} has no {kind} price for {price_key}")]
    UnknownStonePrice {
        variant_id: String,
        kind: &'static str,
        price_key: String,
    },
    #[error("variant {variant_id} has invalid {field}: {value}")]
    InvalidQuantity {
        variant_id: String,
        field: &'static str,
        value: f64,
    },
    #[error("variant {variant_id} price is out of range")]
    OutOfRange { variant_id: String },
}

/// The catalog's default price formula.
///
/// Cost is metal + making + stones + other charges; the sale price (MRP)
/// marks each of those components up by its own percentage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPriceCalculator;

#[derive(Debug, Default)]
struct CostComponents {
    metal: f64,
    making: f64,
    stones: f64,
    other: f64,
}

impl CostComponents {
    fn cost(&self) -> f64 {
        self.metal + self.making + self.stones + self.other
    }

    fn marked_up(&self, markup: &MrpMarkup) -> f64 {
        apply_markup(self.metal, markup.metal_percent)
            + apply_markup(self.making, markup.making_percent)
            + apply_markup(self.stones, markup.stone_percent)
            + apply_markup(self.other, markup.other_charge_percent)
    }
}

impl PriceCalculator for StandardPriceCalculator {
    fn quote(
        &self,
        inputs: &PricingInputs,
        product: &ProductBill,
    ) -> Result<ProductQuote, PriceError> {
        if product.variants.is_empty() {
            return Err(PriceError::NoVariants {
                product_id: product.product_id.clone(),
            });
        }
        let other = inputs.other_charges_total();
        let variants = product
            .variants
            .iter()
            .map(|variant| {
                let variant_id = variant.variant_id.as_str();
                let mut components =
                    bill_components(inputs, variant_id, &variant.bill_of_materials)?;
                components.other = other.ok_or_else(|| PriceError::OutOfRange {
                    variant_id: variant_id.to_string(),
                })? as f64;
                Ok(VariantQuote {
                    variant_id: variant.variant_id.clone(),
                    cost_price: to_minor_units(variant_id, components.cost())?,
                    sale_price: to_minor_units(variant_id, components.marked_up(&inputs.markup))?,
                })
            })
            .collect::<Result<Vec<_>, PriceError>>()?;
        Ok(ProductQuote { variants })
    }
}

fn bill_components(
    inputs: &PricingInputs,
    variant_id: &str,
    bill: &BillOfMaterials,
) -> Result<CostComponents, PriceError> {
    let mut components = CostComponents::default();
    if let Some(metal) = bill.metal.as_ref() {
        check_quantity(variant_id, "metal weight", metal.weight_grams)?;
        let purity = inputs.metal_purity(&metal.purity_id).ok_or_else(|| {
            PriceError::UnknownMetalPurity {
                variant_id: variant_id.to_string(),
                purity_id: metal.purity_id.clone(),
            }
        })?;
        components.metal = metal.weight_grams * purity.price_per_gram as f64;
        components.making = metal.weight_grams * purity.making_charge_per_gram as f64;
    }
    for stone in &bill.stones {
        check_quantity(variant_id, "stone quantity", stone.quantity)?;
        let unit_price = inputs
            .stone_price(stone.kind, &stone.price_key)
            .ok_or_else(|| PriceError::UnknownStonePrice {
                variant_id: variant_id.to_string(),
                kind: stone.kind.as_str(),
                price_key: stone.price_key.clone(),
            })?;
        components.stones += stone.quantity * unit_price as f64;
    }
    Ok(components)
}

fn check_quantity(variant_id: &str, field: &'static str, value: f64) -> Result<(), PriceError> {
    if value.is_finite() && value >= 0.0 {
        return Ok(());
    }
    Err(PriceError::InvalidQuantity {
        variant_id: variant_id.to_string(),
        field,
        value,
    })
}

fn apply_markup(amount: f64, percent: f64) -> f64 {
    amount * (1.0 + percent / 100.0)
}

fn to_minor_units(variant_id: &str, amount: f64) -> Result<i64, PriceError> {
    let rounded = amount.round();
    if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
        return Err(PriceError::OutOfRange {
            variant_id: variant_id.to_string(),
        });
    }
    Ok(rounded as i64)
}
