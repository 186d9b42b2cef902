use serde::Deserialize;
use serde::Serialize;

use crate::supervisor::JobSupervisor;

/// Which kind of pricing input changed. Recorded on the run it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    MetalPurity,
    MetalType,
    MetalColor,
    MrpMarkup,
    MakingCharge,
    OtherCharge,
    StonePrice,
    GemstonePrice,
    PearlPrice,
    DiamondPrice,
    Manual,
}

impl TriggerSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            TriggerSource::MetalPurity => "metal_purity",
            TriggerSource::MetalType => "metal_type",
            TriggerSource::MetalColor => "metal_color",
            TriggerSource::MrpMarkup => "mrp_markup",
            TriggerSource::MakingCharge => "making_charge",
            TriggerSource::OtherCharge => "other_charge",
            TriggerSource::StonePrice => "stone_price",
            TriggerSource::GemstonePrice => "gemstone_price",
            TriggerSource::PearlPrice => "pearl_price",
            TriggerSource::DiamondPrice => "diamond_price",
            TriggerSource::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "metal_purity" => Ok(Self::MetalPurity),
            "metal_type" => Ok(Self::MetalType),
            "metal_color" => Ok(Self::MetalColor),
            "mrp_markup" => Ok(Self::MrpMarkup),
            "making_charge" => Ok(Self::MakingCharge),
            "other_charge" => Ok(Self::OtherCharge),
            "stone_price" => Ok(Self::StonePrice),
            "gemstone_price" => Ok(Self::GemstonePrice),
            "pearl_price" => Ok(Self::PearlPrice),
            "diamond_price" => Ok(Self::DiamondPrice),
            "manual" => Ok(Self::Manual),
            _ => Err(anyhow::anyhow!("invalid trigger source: {value}")),
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub source: TriggerSource,
    pub triggered_by: String,
}

/// Entry point for collaborators that just committed a pricing-input change.
///
/// Cloning is cheap; every clone feeds the same supervisor.
#[derive(Clone)]
pub struct TriggerGateway {
    supervisor: JobSupervisor,
}

impl TriggerGateway {
    pub(crate) fn new(supervisor: JobSupervisor) -> Self {
        Self { supervisor }
    }

    /// Request a full-catalog recalculation.
    ///
    /// Returns immediately and never fails; the outcome is only observable
    /// through the job ledger. Must be called from within a Tokio runtime.
    pub fn trigger(&self, source: TriggerSource, user_id: impl Into<String>) {
        self.supervisor.submit(TriggerRequest {
            source,
            triggered_by: user_id.into(),
        });
    }
}
