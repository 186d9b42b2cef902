use std::sync::Arc;

use tempfile::TempDir;

use crate::BillOfMaterials;
use crate::MetalComponent;
use crate::NewProduct;
use crate::NewVariant;
use crate::RecalculationJobCreateParams;
use crate::StateRuntime;

pub(super) async fn test_runtime() -> (TempDir, Arc<StateRuntime>) {
    let home = tempfile::tempdir().expect("tempdir");
    let runtime = StateRuntime::init(home.path().to_path_buf())
        .await
        .expect("initialize runtime");
    (home, runtime)
}

pub(super) fn create_params(
    id: &str,
    trigger_source: &str,
    triggered_by: &str,
) -> RecalculationJobCreateParams {
    RecalculationJobCreateParams {
        id: id.to_string(),
        trigger_source: trigger_source.to_string(),
        triggered_by: triggered_by.to_string(),
    }
}

pub(super) fn gold_ring(id: &str, purity_id: &str) -> NewProduct {
    NewProduct {
        id: id.to_string(),
        name: format!("Ring {id}"),
        variants: vec![NewVariant {
            id: format!("{id}-v1"),
            sku: format!("SKU-{id}"),
            bill_of_materials: BillOfMaterials {
                metal: Some(MetalComponent {
                    purity_id: purity_id.to_string(),
                    weight_grams: 4.5,
                }),
                stones: Vec::new(),
            },
        }],
    }
}
