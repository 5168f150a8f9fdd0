//! Runs against a live Postgres when `DATABASE_URL` is set; otherwise each test returns early.

use sismo_core::{NormalizedRow, QuakeReport, SnapshotRow};
use sismo_storage::{PgTableStore, TableStore};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

fn row(code: &str, position: usize) -> SnapshotRow {
    SnapshotRow::assign(
        NormalizedRow::from(QuakeReport {
            report_code: code.to_string(),
            ..Default::default()
        }),
        position,
    )
}

async fn scratch_store() -> Option<(PgTableStore, sqlx::PgPool)> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect DATABASE_URL");
    let table = format!("sismos_test_{}", Uuid::new_v4().simple());
    let store = PgTableStore::with_pool(pool.clone(), &table).expect("table name");
    store.ensure_table().await.expect("create table");
    Some((store, pool))
}

async fn drop_table(store: &PgTableStore, pool: &sqlx::PgPool) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", store.table()))
        .execute(pool)
        .await
        .expect("drop table");
}

#[tokio::test]
async fn pg_store_put_scan_and_batch_delete() {
    let Some((store, pool)) = scratch_store().await else {
        return;
    };

    let a = row("IGP001", 1);
    let b = row("IGP002", 2);
    store.put(&a).await.unwrap();
    store.put(&b).await.unwrap();
    store.put(&a).await.unwrap();

    let mut rows = store.scan_all().await.unwrap();
    sismo_core::sort_by_sequence(&mut rows);
    assert_eq!(rows, vec![a.clone(), b.clone()]);

    let removed = store
        .delete_batch(&[a.record_id.clone(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    store.delete("missing").await.unwrap();
    assert_eq!(store.scan_all().await.unwrap(), vec![b]);

    drop_table(&store, &pool).await;
}
