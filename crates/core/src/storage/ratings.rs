use crate::domain::rating::Rating;
use crate::error::TransactionError;
use sqlx::{Postgres, QueryBuilder};

/// Builds one multi-row `INSERT ... ON CONFLICT (ticker, time) DO UPDATE` for `batch`.
///
/// `table` must already be validated as a plain identifier.
pub fn upsert_query<'a>(table: &str, batch: &'a [Rating]) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {table} (ticker, company, brokerage, action, rating_from, rating_to, \
         target_from, target_to, time) "
    ));
    qb.push_values(batch, |mut b, r| {
        b.push_bind(r.ticker.trim())
            .push_bind(r.company.as_str())
            .push_bind(r.brokerage.as_str())
            .push_bind(r.action.as_str())
            .push_bind(r.rating_from.as_str())
            .push_bind(r.rating_to.as_str())
            .push_bind(r.target_from.as_deref())
            .push_bind(r.target_to.as_deref())
            .push_bind(r.time.as_str());
    });
    qb.push(
        " ON CONFLICT (ticker, time) DO UPDATE SET \
           company = EXCLUDED.company, \
           brokerage = EXCLUDED.brokerage, \
           action = EXCLUDED.action, \
           rating_from = EXCLUDED.rating_from, \
           rating_to = EXCLUDED.rating_to, \
           target_from = EXCLUDED.target_from, \
           target_to = EXCLUDED.target_to",
    );
    qb
}

/// Runs the batch upsert in a single transaction. Nothing is written unless every row is.
pub async fn upsert_ratings_atomic(
    pool: &sqlx::PgPool,
    table: &str,
    batch: &[Rating],
) -> Result<u64, TransactionError> {
    if batch.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.map_err(TransactionError::Begin)?;

    let t0 = std::time::Instant::now();
    let res = upsert_query(table, batch)
        .build()
        .persistent(false)
        .execute(&mut *tx)
        .await;

    let affected = match res {
        Ok(res) => res.rows_affected(),
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::debug!(error = %rollback_err, "rollback after failed upsert also failed");
            }
            return Err(TransactionError::Execute(err));
        }
    };

    tx.commit().await.map_err(TransactionError::Commit)?;

    tracing::debug!(
        table,
        batch_size = batch.len(),
        affected,
        elapsed_ms = t0.elapsed().as_millis(),
        "ratings batch committed"
    );
    Ok(affected)
}
