use super::*;

impl StateRuntime {
    /// Ids of every product a recalculation run should price, in a stable order.
    pub async fn eligible_product_ids(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
SELECT id
FROM products
WHERE archived = 0
ORDER BY id ASC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("id").map_err(anyhow::Error::from))
            .collect()
    }

    pub async fn get_product_bill(&self, product_id: &str) -> anyhow::Result<Option<ProductBill>> {
        let row = sqlx::query("SELECT id, name FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let variants = sqlx::query_as::<_, VariantBillRow>(
            r#"
SELECT id, sku, bill_of_materials_json
FROM product_variants
WHERE product_id = ?
ORDER BY id ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(self.pool.as_ref())
        .await?
        .into_iter()
        .map(VariantBill::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Some(ProductBill {
            product_id: row.try_get("id")?,
            name: row.try_get("name")?,
            variants,
        }))
    }

    /// Write derived prices for every listed variant and the product's own
    /// sale price (cheapest variant) in one transaction.
    pub async fn save_product_prices(
        &self,
        product_id: &str,
        prices: &[VariantPrice<'_>],
    ) -> anyhow::Result<()> {
        let Some(product_sale_price) = prices.iter().map(|price| price.sale_price).min() else {
            anyhow::bail!("no variant prices to save for product {product_id}");
        };
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for price in prices {
            let result = sqlx::query(
                r#"
UPDATE product_variants
SET cost_price = ?, sale_price = ?, prices_updated_at = ?
WHERE id = ? AND product_id = ?
                "#,
            )
            .bind(price.cost_price)
            .bind(price.sale_price)
            .bind(now)
            .bind(price.variant_id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                anyhow::bail!(
                    "variant {} does not belong to product {product_id}",
                    price.variant_id
                );
            }
        }
        let result = sqlx::query(
            r#"
UPDATE products
SET sale_price = ?, prices_updated_at = ?
WHERE id = ?
            "#,
        )
        .bind(product_sale_price)
        .bind(now)
        .bind(product_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("product {product_id} no longer exists");
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_variant_prices(
        &self,
        product_id: &str,
    ) -> anyhow::Result<Vec<StoredVariantPrice>> {
        let rows = sqlx::query(
            r#"
SELECT id, cost_price, sale_price
FROM product_variants
WHERE product_id = ?
ORDER BY id ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter()
            .map(|row| -> anyhow::Result<StoredVariantPrice> {
                Ok(StoredVariantPrice {
                    variant_id: row.try_get("id")?,
                    cost_price: row.try_get("cost_price")?,
                    sale_price: row.try_get("sale_price")?,
                })
            })
            .collect()
    }

    pub async fn get_product_sale_price(&self, product_id: &str) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query("SELECT sale_price FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        match row {
            Some(row) => Ok(row.try_get("sale_price")?),
            None => Ok(None),
        }
    }

    /// Insert or replace a product and its variants. Variants missing from
    /// `product` are removed; surviving variants keep their stored prices.
    pub async fn upsert_product(&self, product: &NewProduct) -> anyhow::Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
INSERT INTO products (id, name, archived, sale_price, prices_updated_at, created_at, updated_at)
VALUES (?, ?, 0, NULL, NULL, ?, ?)
ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at
            "#,
        )
        .bind(product.id.as_str())
        .bind(product.name.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        delete_stale_variants(&mut tx, product).await?;

        for variant in &product.variants {
            let bill_of_materials_json = bill_of_materials_json(&variant.bill_of_materials)?;
            sqlx::query(
                r#"
INSERT INTO product_variants (id, product_id, sku, bill_of_materials_json)
VALUES (?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    product_id = excluded.product_id,
    sku = excluded.sku,
    bill_of_materials_json = excluded.bill_of_materials_json
                "#,
            )
            .bind(variant.id.as_str())
            .bind(product.id.as_str())
            .bind(variant.sku.as_str())
            .bind(bill_of_materials_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_product_archived(
        &self,
        product_id: &str,
        archived: bool,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE products SET archived = ?, updated_at = ? WHERE id = ?")
            .bind(i64::from(archived))
            .bind(Utc::now().timestamp())
            .bind(product_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn delete_stale_variants(
    tx: &mut SqliteConnection,
    product: &NewProduct,
) -> anyhow::Result<()> {
    let mut builder =
        QueryBuilder::<Sqlite>::new("DELETE FROM product_variants WHERE product_id = ");
    builder.push_bind(product.id.as_str());
    if !product.variants.is_empty() {
        builder.push(" AND id NOT IN (");
        let mut separated = builder.separated(", ");
        for variant in &product.variants {
            separated.push_bind(variant.id.as_str());
        }
        separated.push_unseparated(")");
    }
    builder.build().execute(tx).await?;
    Ok(())
}

/// Serialize a bill of materials the way variant rows store it.
pub(crate) fn bill_of_materials_json(bill: &BillOfMaterials) -> anyhow::Result<String> {
    Ok(serde_json::to_string(bill)?)
}
