use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strum::IntoEnumIterator;

use crate::catalog::{Column, DataType, Schema};
use crate::config::{DatabaseOptions, OptimizerConfig};
use crate::cost::JoinAlgorithm;
use crate::database::Database;
use crate::execution::{ExecutionContext, ExecutionEngine};
use crate::expression::{col, lit};
use crate::optimizer::{JoinCondition, JoinTree};
use crate::plan::PhysicalPlanner;
use crate::storage::index::IndexKind;
use crate::storage::tuple::Row;
use crate::storage::Table;
use crate::utils::scalar::ScalarValue;

fn orders_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Int64, false),
        Column::new("customer_id", DataType::Int64, true),
        Column::new("region", DataType::Varchar(None), false),
    ])
}

fn customers_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Int64, false),
        Column::new("region", DataType::Varchar(None), false),
    ])
}

const REGIONS: [&str; 3] = ["north", "south", "east"];

fn order_rows(rng: &mut StdRng, count: i64) -> Vec<Row> {
    (0..count)
        .map(|id| {
            // some orders reference no customer, some a missing one
            let customer = if rng.random_bool(0.1) {
                ScalarValue::Int64(None)
            } else {
                rng.random_range(0..40i64).into()
            };
            let region = REGIONS[rng.random_range(0..REGIONS.len())];
            vec![id.into(), customer, region.into()]
        })
        .collect()
}

fn customer_rows(rng: &mut StdRng) -> Vec<Row> {
    // ids repeat so both sides carry duplicate keys
    (0..30i64)
        .map(|i| {
            let region = REGIONS[rng.random_range(0..REGIONS.len())];
            vec![(i % 25).into(), region.into()]
        })
        .collect()
}

fn build_tables(orders: &[Row], customers: &[Row]) -> HashMap<String, Table> {
    let options = DatabaseOptions::default();
    let mut order_table = Table::new("orders", orders_schema(), options);
    for row in orders {
        order_table.insert(row.clone()).expect("insert order");
    }
    let mut customer_table = Table::new("customers", customers_schema(), options);
    for row in customers {
        customer_table.insert(row.clone()).expect("insert customer");
    }
    customer_table
        .create_index("idx_customers_id", "id", IndexKind::BTree)
        .expect("index");
    HashMap::from([
        ("orders".to_string(), order_table),
        ("customers".to_string(), customer_table),
    ])
}

/// Concatenated rows whose columns match pairwise under every `(left, right)` position.
fn reference_join(left: &[Row], right: &[Row], keys: &[(usize, usize)]) -> Vec<Row> {
    let mut out = Vec::new();
    for l in left {
        for r in right {
            let matched = keys.iter().all(|(li, ri)| {
                !l[*li].is_null() && !r[*ri].is_null() && l[*li] == r[*ri]
            });
            if matched {
                let mut row = l.clone();
                row.extend(r.iter().cloned());
                out.push(row);
            }
        }
    }
    out.sort();
    out
}

fn leaf(name: &str, rows: usize) -> Box<JoinTree> {
    Box::new(JoinTree::Table {
        name: name.to_string(),
        rows: rows as f64,
    })
}

fn run_tree(
    tables: &HashMap<String, Table>,
    tree: &JoinTree,
    config: OptimizerConfig,
) -> (Vec<Row>, u64) {
    let plan = PhysicalPlanner::new(tables, config)
        .plan_join_tree(tree, None)
        .expect("plan");
    let counter = Arc::new(AtomicU64::new(0));
    let context = ExecutionContext::new(tables, counter.clone());
    let mut engine = ExecutionEngine::new(context);
    let mut rows: Vec<Row> = engine
        .execute(Arc::new(plan))
        .expect("execute")
        .into_iter()
        .map(|t| t.data)
        .collect();
    rows.sort();
    (rows, engine.context.rows_processed())
}

fn small_blocks() -> OptimizerConfig {
    OptimizerConfig {
        block_size: 7,
        grace_partitions: 3,
        ..OptimizerConfig::default()
    }
}

#[test]
fn every_algorithm_produces_the_same_join() {
    let mut rng = StdRng::seed_from_u64(7);
    let orders = order_rows(&mut rng, 120);
    let customers = customer_rows(&mut rng);
    let tables = build_tables(&orders, &customers);
    let expected = reference_join(&orders, &customers, &[(1, 0)]);
    assert!(!expected.is_empty());

    for algorithm in JoinAlgorithm::iter() {
        let tree = JoinTree::Join {
            left: leaf("orders", orders.len()),
            right: leaf("customers", customers.len()),
            algorithm,
            conditions: vec![JoinCondition::new("orders", "customer_id", "customers", "id")],
            rows: 0.0,
            cost: 0.0,
        };
        let (rows, processed) = run_tree(&tables, &tree, small_blocks());
        assert_eq!(rows, expected, "{algorithm} join differs from the reference");
        assert!(processed >= rows.len() as u64);
    }
}

#[test]
fn residual_conditions_apply_to_every_algorithm() {
    let mut rng = StdRng::seed_from_u64(11);
    let orders = order_rows(&mut rng, 90);
    let customers = customer_rows(&mut rng);
    let tables = build_tables(&orders, &customers);
    let expected = reference_join(&orders, &customers, &[(1, 0), (2, 1)]);

    for algorithm in JoinAlgorithm::iter() {
        let tree = JoinTree::Join {
            left: leaf("orders", orders.len()),
            right: leaf("customers", customers.len()),
            algorithm,
            conditions: vec![
                JoinCondition::new("orders", "customer_id", "customers", "id"),
                JoinCondition::new("orders", "region", "customers", "region"),
            ],
            rows: 0.0,
            cost: 0.0,
        };
        let (rows, _) = run_tree(&tables, &tree, OptimizerConfig::default());
        assert_eq!(rows, expected, "{algorithm} join ignores the residual");
    }
}

#[test]
fn empty_inputs_join_to_nothing() {
    let customers = vec![vec![1.into(), "north".into()]];
    let tables = build_tables(&[], &customers);
    for algorithm in JoinAlgorithm::iter() {
        let tree = JoinTree::Join {
            left: leaf("orders", 0),
            right: leaf("customers", 1),
            algorithm,
            conditions: vec![JoinCondition::new("orders", "customer_id", "customers", "id")],
            rows: 0.0,
            cost: 0.0,
        };
        let (rows, _) = run_tree(&tables, &tree, OptimizerConfig::default());
        assert!(rows.is_empty(), "{algorithm} produced rows from an empty input");
    }
}

#[test]
fn equi_algorithms_need_a_key() {
    let tables = build_tables(&[], &[]);
    let tree = JoinTree::Join {
        left: leaf("orders", 0),
        right: leaf("customers", 0),
        algorithm: JoinAlgorithm::Hash,
        conditions: vec![],
        rows: 0.0,
        cost: 0.0,
    };
    let planner = PhysicalPlanner::new(&tables, OptimizerConfig::default());
    assert!(planner.plan_join_tree(&tree, None).is_err());
}

#[test]
fn optimized_join_matches_reference() {
    let mut rng = StdRng::seed_from_u64(3);
    let orders = order_rows(&mut rng, 200);
    let customers = customer_rows(&mut rng);

    let mut db = Database::default();
    db.create_table("orders", orders_schema()).expect("orders");
    db.create_table("customers", customers_schema()).expect("customers");
    for row in orders.iter() {
        db.table_mut("orders").expect("orders").insert(row.clone()).expect("insert");
    }
    let customer_table = db.table_mut("customers").expect("customers");
    for row in customers.iter() {
        customer_table.insert(row.clone()).expect("insert");
    }
    customer_table
        .create_index("idx_customers_id", "id", IndexKind::Hash)
        .expect("index");

    let conditions = [JoinCondition::parse("orders.customer_id = customers.id").expect("parse")];
    // the optimizer may put either table on the outer side, so read columns by name
    let layout = [
        ("orders", "id"),
        ("orders", "customer_id"),
        ("orders", "region"),
        ("customers", "id"),
        ("customers", "region"),
    ];
    let mut rows: Vec<Row> = db
        .join_query(&["orders", "customers"], &conditions, None)
        .expect("join")
        .into_iter()
        .map(|t| {
            layout
                .iter()
                .map(|(relation, name)| {
                    t.value_by_name(Some(relation), name)
                        .cloned()
                        .expect("joined column")
                })
                .collect()
        })
        .collect();
    rows.sort();
    assert_eq!(rows, reference_join(&orders, &customers, &[(1, 0)]));

    let filtered = db
        .join_query(
            &["orders", "customers"],
            &conditions,
            Some(&col("orders.region").eq(lit("north"))),
        )
        .expect("filtered join");
    let north = rows.iter().filter(|r| r[2] == "north".into()).count();
    assert_eq!(filtered.len(), north);
}
