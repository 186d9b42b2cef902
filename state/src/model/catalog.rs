use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoneKind {
    Diamond,
    Gemstone,
    Pearl,
    Stone,
}

impl StoneKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            StoneKind::Diamond => "diamond",
            StoneKind::Gemstone => "gemstone",
            StoneKind::Pearl => "pearl",
            StoneKind::Stone => "stone",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "diamond" => Ok(Self::Diamond),
            "gemstone" => Ok(Self::Gemstone),
            "pearl" => Ok(Self::Pearl),
            "stone" => Ok(Self::Stone),
            _ => Err(anyhow::anyhow!("invalid stone kind: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetalComponent {
    pub purity_id: String,
    pub weight_grams: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoneComponent {
    pub kind: StoneKind,
    /// Key into the stone price table for `kind` (shape/quality/size bucket).
    pub price_key: String,
    /// Pieces for pearls and plain stones, carats for diamonds and gemstones.
    pub quantity: f64,
}

/// What one variant is made of. Stored as JSON on the variant row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BillOfMaterials {
    #[serde(default)]
    pub metal: Option<MetalComponent>,
    #[serde(default)]
    pub stones: Vec<StoneComponent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantBill {
    pub variant_id: String,
    pub sku: String,
    pub bill_of_materials: BillOfMaterials,
}

/// A product together with every variant's bill of materials.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductBill {
    pub product_id: String,
    pub name: String,
    pub variants: Vec<VariantBill>,
}

/// Derived prices for one variant, in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantPrice<'a> {
    pub variant_id: &'a str,
    pub cost_price: i64,
    pub sale_price: i64,
}

/// Prices as currently stored on a variant row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVariantPrice {
    pub variant_id: String,
    pub cost_price: Option<i64>,
    pub sale_price: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewVariant {
    pub id: String,
    pub sku: String,
    pub bill_of_materials: BillOfMaterials,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub id: String,
    pub name: String,
    pub variants: Vec<NewVariant>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct VariantBillRow {
    pub(crate) id: String,
    pub(crate) sku: String,
    pub(crate) bill_of_materials_json: String,
}

impl TryFrom<VariantBillRow> for VariantBill {
    type Error = anyhow::Error;

    fn try_from(value: VariantBillRow) -> Result<Self, Self::Error> {
        let bill_of_materials = serde_json::from_str(value.bill_of_materials_json.as_str())
            .map_err(|err| {
                anyhow::anyhow!("invalid bill of materials on variant {}: {err}", value.id)
            })?;
        Ok(Self {
            variant_id: value.id,
            sku: value.sku,
            bill_of_materials,
        })
    }
}
