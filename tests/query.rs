use memdb::catalog::{Column, DataType};
use memdb::optimizer::JoinCondition;
use memdb::storage::index::IndexKind;
use memdb::storage::tuple::Tuple;
use memdb::storage::TableDefinition;
use memdb::utils::scalar::ScalarValue;
use memdb::{Database, MemDbError};

const KINDS: [&str; 4] = ["metal", "polymer", "ceramic", "composite"];

fn materials_db() -> Database {
    let mut db = Database::default();
    let definition = TableDefinition::new(
        "materials",
        vec![
            Column::new("id", DataType::Int64, false),
            Column::new("name", DataType::Varchar(Some(32)), false),
            Column::new("kind", DataType::Varchar(Some(16)), false),
            Column::new("density", DataType::Float64, true),
        ],
    )
    .with_index("pk_materials", "id", IndexKind::BTree, true)
    .with_index("idx_kind", "kind", IndexKind::Hash, false);
    db.create_table_from(&definition).unwrap();

    let table = db.table_mut("materials").unwrap();
    for i in 0..400i64 {
        let density = if i % 50 == 0 {
            ScalarValue::Float64(None)
        } else {
            ScalarValue::from(1.0 + (i % 20) as f64 * 0.5)
        };
        table
            .insert(vec![
                i.into(),
                format!("mat-{i:03}").into(),
                KINDS[(i % 4) as usize].into(),
                density,
            ])
            .unwrap();
    }
    db
}

fn ints(tuples: &[Tuple], column: usize) -> Vec<i64> {
    tuples
        .iter()
        .map(|t| match t.data[column] {
            ScalarValue::Int64(Some(v)) => v,
            ref other => panic!("expected an integer, got {other}"),
        })
        .collect()
}

#[test]
fn point_query_through_primary_key() {
    let db = materials_db();
    let rows = db
        .query("SELECT name, density FROM materials WHERE id = 42")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data[0], "mat-042".into());
    assert_eq!(rows[0].schema.columns[0].name, "name");

    let plan = db
        .explain("SELECT name FROM materials WHERE id = 42")
        .unwrap();
    assert!(plan.contains("IndexScan"), "{plan}");
    assert!(plan.contains("pk_materials"), "{plan}");
}

#[test]
fn range_and_compound_predicates_agree_with_a_scan() {
    let db = materials_db();
    let by_index = db
        .query("SELECT id FROM materials WHERE id >= 100 AND id < 120 ORDER BY id")
        .unwrap();
    assert_eq!(ints(&by_index, 0), (100..120).collect::<Vec<_>>());

    let between = db
        .query("SELECT id FROM materials WHERE id BETWEEN 10 AND 13")
        .unwrap();
    assert_eq!(between.len(), 4);

    let in_list = db
        .query("SELECT id FROM materials WHERE kind IN ('metal', 'ceramic') AND id < 8 ORDER BY id")
        .unwrap();
    assert_eq!(ints(&in_list, 0), vec![0, 2, 4, 6]);

    let like = db
        .query("SELECT id FROM materials WHERE name LIKE 'mat-39%' ORDER BY id DESC")
        .unwrap();
    assert_eq!(ints(&like, 0), (390..400).rev().collect::<Vec<_>>());

    let nulls = db
        .query("SELECT id FROM materials WHERE density IS NULL")
        .unwrap();
    assert_eq!(nulls.len(), 8);
}

#[test]
fn order_limit_offset_and_aliases() {
    let db = materials_db();
    let rows = db
        .query("SELECT id AS material_id, density FROM materials WHERE kind = 'polymer' ORDER BY id DESC LIMIT 3 OFFSET 1")
        .unwrap();
    assert_eq!(ints(&rows, 0), vec![393, 389, 385]);
    assert_eq!(rows[0].schema.columns[0].name, "material_id");

    let all = db.query("SELECT * FROM materials LIMIT 5").unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[0].data.len(), 4);
}

#[test]
fn grouped_aggregates() {
    let db = materials_db();
    let rows = db
        .query("SELECT kind, COUNT(*) AS n, MIN(id), MAX(id) FROM materials GROUP BY kind ORDER BY kind")
        .unwrap();
    let kinds: Vec<String> = rows.iter().map(|t| t.data[0].to_string()).collect();
    assert_eq!(kinds, vec!["ceramic", "composite", "metal", "polymer"]);
    assert_eq!(ints(&rows, 1), vec![100, 100, 100, 100]);
    assert_eq!(ints(&rows, 2), vec![2, 3, 0, 1]);
    assert_eq!(ints(&rows, 3), vec![398, 399, 396, 397]);
    assert_eq!(rows[0].schema.columns[1].name, "n");

    // COUNT(col) skips NULLs
    let density = db
        .query("SELECT COUNT(density), COUNT(*) FROM materials")
        .unwrap();
    assert_eq!(ints(&density, 0), vec![392]);
    assert_eq!(ints(&density, 1), vec![400]);

    let empty = db
        .query("SELECT COUNT(*), SUM(id) FROM materials WHERE id < 0")
        .unwrap();
    assert_eq!(empty.len(), 1);
    assert_eq!(ints(&empty, 0), vec![0]);
    assert!(empty[0].data[1].is_null());
}

#[test]
fn query_errors() {
    let db = materials_db();
    assert!(matches!(
        db.query("SELECT * FROM missing"),
        Err(MemDbError::NotFound(_))
    ));
    assert!(matches!(
        db.query("SELECT nope FROM materials"),
        Err(MemDbError::Plan(_)) | Err(MemDbError::NotFound(_))
    ));
    assert!(matches!(
        db.query("DELETE FROM materials"),
        Err(MemDbError::NotSupport(_))
    ));
    assert!(matches!(
        db.query("SELEC * FROM materials"),
        Err(MemDbError::Parser(_))
    ));
}

#[test]
fn three_way_join_through_the_optimizer() {
    let mut db = materials_db();
    let suppliers = TableDefinition::new(
        "suppliers",
        vec![
            Column::new("id", DataType::Int64, false),
            Column::new("kind", DataType::Varchar(None), false),
        ],
    );
    let offers = TableDefinition::new(
        "offers",
        vec![
            Column::new("supplier_id", DataType::Int64, false),
            Column::new("material_id", DataType::Int64, false),
        ],
    );
    db.create_table_from(&suppliers).unwrap();
    db.create_table_from(&offers).unwrap();
    let table = db.table_mut("suppliers").unwrap();
    for (i, kind) in KINDS.iter().enumerate() {
        table.insert(vec![(i as i64).into(), (*kind).into()]).unwrap();
    }
    let table = db.table_mut("offers").unwrap();
    for m in 0..40i64 {
        table.insert(vec![(m % 4).into(), (m * 10).into()]).unwrap();
    }

    let conditions = [
        JoinCondition::parse("offers.supplier_id = suppliers.id").unwrap(),
        JoinCondition::parse("offers.material_id = materials.id").unwrap(),
        JoinCondition::parse("suppliers.kind = materials.kind").unwrap(),
    ];
    let rows = db
        .join_query(&["materials", "suppliers", "offers"], &conditions, None)
        .unwrap();
    // material m*10 has kind (m*10) % 4 and is offered by supplier m % 4
    let expected = (0..40i64)
        .filter(|m| (m * 10) % 4 == m % 4)
        .count();
    assert_eq!(rows.len(), expected);
    for row in rows.iter() {
        assert_eq!(
            row.value_by_name(Some("suppliers"), "kind").unwrap(),
            row.value_by_name(Some("materials"), "kind").unwrap()
        );
    }
    let report = db.statistics();
    assert!(report.rows_processed > 0);
    assert_eq!(report.tables.len(), 3);
}
