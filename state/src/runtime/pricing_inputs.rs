use super::*;
use std::collections::HashMap;

impl StateRuntime {
    /// Read every pricing input inside one transaction so a run prices the
    /// whole catalog against a single consistent view.
    pub async fn load_pricing_inputs(&self) -> anyhow::Result<PricingInputs> {
        let mut tx = self.pool.begin().await?;

        let metal_purities = sqlx::query(
            r#"
SELECT id, label, price_per_gram, making_charge_per_gram
FROM metal_purities
            "#,
        )
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| -> anyhow::Result<(String, MetalPurityPrice)> {
            let purity = MetalPurityPrice {
                id: row.try_get("id")?,
                label: row.try_get("label")?,
                price_per_gram: row.try_get("price_per_gram")?,
                making_charge_per_gram: row.try_get("making_charge_per_gram")?,
            };
            Ok((purity.id.clone(), purity))
        })
        .collect::<anyhow::Result<HashMap<_, _>>>()?;

        let markup = sqlx::query(
            r#"
SELECT metal_percent, making_percent, stone_percent, other_charge_percent
FROM mrp_markup
WHERE id = 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| -> anyhow::Result<MrpMarkup> {
            Ok(MrpMarkup {
                metal_percent: row.try_get("metal_percent")?,
                making_percent: row.try_get("making_percent")?,
                stone_percent: row.try_get("stone_percent")?,
                other_charge_percent: row.try_get("other_charge_percent")?,
            })
        })
        .transpose()?
        .unwrap_or_default();

        let other_charges = sqlx::query("SELECT id, name, amount FROM other_charges ORDER BY id ASC")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| -> anyhow::Result<OtherCharge> {
                Ok(OtherCharge {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    amount: row.try_get("amount")?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let stone_prices = sqlx::query("SELECT kind, price_key, price_per_unit FROM stone_prices")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| -> anyhow::Result<((StoneKind, String), i64)> {
                let kind: String = row.try_get("kind")?;
                Ok((
                    (StoneKind::parse(kind.as_str())?, row.try_get("price_key")?),
                    row.try_get("price_per_unit")?,
                ))
            })
            .collect::<anyhow::Result<HashMap<_, _>>>()?;

        tx.commit().await?;
        Ok(PricingInputs {
            metal_purities,
            markup,
            other_charges,
            stone_prices,
        })
    }

    pub async fn upsert_metal_purity(&self, purity: &MetalPurityPrice) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO metal_purities (id, label, price_per_gram, making_charge_per_gram, updated_at)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    label = excluded.label,
    price_per_gram = excluded.price_per_gram,
    making_charge_per_gram = excluded.making_charge_per_gram,
    updated_at = excluded.updated_at
            "#,
        )
        .bind(purity.id.as_str())
        .bind(purity.label.as_str())
        .bind(purity.price_per_gram)
        .bind(purity.making_charge_per_gram)
        .bind(Utc::now().timestamp())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn set_mrp_markup(&self, markup: MrpMarkup) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO mrp_markup (id, metal_percent, making_percent, stone_percent, other_charge_percent, updated_at)
VALUES (1, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    metal_percent = excluded.metal_percent,
    making_percent = excluded.making_percent,
    stone_percent = excluded.stone_percent,
    other_charge_percent = excluded.other_charge_percent,
    updated_at = excluded.updated_at
            "#,
        )
        .bind(markup.metal_percent)
        .bind(markup.making_percent)
        .bind(markup.stone_percent)
        .bind(markup.other_charge_percent)
        .bind(Utc::now().timestamp())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn upsert_other_charge(&self, charge: &OtherCharge) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO other_charges (id, name, amount, updated_at)
VALUES (?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    amount = excluded.amount,
    updated_at = excluded.updated_at
            "#,
        )
        .bind(charge.id.as_str())
        .bind(charge.name.as_str())
        .bind(charge.amount)
        .bind(Utc::now().timestamp())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    pub async fn delete_other_charge(&self, charge_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM other_charges WHERE id = ?")
            .bind(charge_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_stone_price(
        &self,
        kind: StoneKind,
        price_key: &str,
        price_per_unit: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO stone_prices (kind, price_key, price_per_unit, updated_at)
VALUES (?, ?, ?, ?)
ON CONFLICT(kind, price_key) DO UPDATE SET
    price_per_unit = excluded.price_per_unit,
    updated_at = excluded.updated_at
            "#,
        )
        .bind(kind.as_str())
        .bind(price_key)
        .bind(price_per_unit)
        .bind(Utc::now().timestamp())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}
