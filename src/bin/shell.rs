use clap::Parser;
use log::info;
use memdb::catalog::{Column, DataType};
use memdb::config::{BufferPoolConfig, DatabaseOptions, LockConfig};
use memdb::storage::index::IndexKind;
use memdb::storage::TableDefinition;
use memdb::utils::scalar::ScalarValue;
use memdb::utils::util::pretty_format_tuples;
use memdb::{Database, DatabaseReport, MemDbResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(Debug, Parser, PartialEq)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, help = "Load the sample materials table")]
    demo: bool,
    #[clap(long, default_value_t = 2000, help = "Rows in the sample table")]
    demo_rows: usize,
    #[clap(long, help = "Buffer pool capacity in pages")]
    buffer_pool_size: Option<usize>,
    #[clap(long, help = "Rows stored on one heap page")]
    rows_per_page: Option<u64>,
    #[clap(long, help = "Seed for the sample data")]
    seed: Option<u64>,
}

const KINDS: [&str; 5] = ["metal", "polymer", "ceramic", "composite", "glass"];

fn load_demo(db: &mut Database, rows: usize, seed: u64) -> MemDbResult<()> {
    let definition = TableDefinition::new(
        "materials",
        vec![
            Column::new("id", DataType::Int64, false),
            Column::new("name", DataType::Varchar(Some(32)), false),
            Column::new("kind", DataType::Varchar(Some(16)), false),
            Column::new("density", DataType::Float64, true),
            Column::new("recyclable", DataType::Boolean, false),
        ],
    )
    .with_index("pk_materials", "id", IndexKind::BTree, true)
    .with_index("idx_materials_kind", "kind", IndexKind::Hash, false);
    db.create_table_from(&definition)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let table = db.table_mut("materials")?;
    for id in 0..rows as i64 {
        let kind = KINDS[rng.random_range(0..KINDS.len())];
        let density = if rng.random_bool(0.05) {
            ScalarValue::Float64(None)
        } else {
            rng.random_range(0.5..20.0f64).into()
        };
        table.insert(vec![
            id.into(),
            format!("{kind}-{id}").into(),
            kind.into(),
            density,
            rng.random_bool(0.6).into(),
        ])?;
    }
    info!("loaded {rows} sample rows into materials");
    Ok(())
}

fn print_report(report: &DatabaseReport) {
    let pool = &report.buffer_pool;
    println!(
        "buffer pool: {}/{} resident, {} hits, {} misses, {} evictions",
        pool.resident, pool.capacity, pool.hits, pool.misses, pool.evictions
    );
    let wal = &report.wal;
    println!(
        "wal: next lsn {}, durable lsn {}, {} bytes, {} checkpoints",
        wal.next_lsn, wal.durable_lsn, wal.log_bytes, wal.checkpoints
    );
    let txns = &report.transactions;
    println!(
        "transactions: {} active, {} commits, {} aborts, {} versions",
        txns.active, txns.commits, txns.aborts, txns.versions
    );
    for table in report.tables.iter() {
        println!(
            "table {}: {} rows on {} pages, {} seq scans, {} index scans",
            table.name, table.row_count, table.page_count, table.seq_scans, table.index_scans
        );
    }
    println!("rows processed: {}", report.rows_processed);
}

fn run_line(db: &Database, line: &str) -> MemDbResult<()> {
    if let Some(prefix) = line.get(..8) {
        if prefix.eq_ignore_ascii_case("explain ") {
            println!("{}", db.explain(&line[8..])?);
            return Ok(());
        }
    }
    let tuples = db.query(line)?;
    if tuples.is_empty() {
        println!("(0 rows)");
    } else {
        println!("{}", pretty_format_tuples(&tuples));
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut buffer_pool = BufferPoolConfig::default();
    if let Some(size) = args.buffer_pool_size {
        buffer_pool.buffer_pool_size = size;
    }
    if let Some(rows) = args.rows_per_page {
        buffer_pool.rows_per_page = rows;
    }
    let options = DatabaseOptions::default()
        .with_buffer_pool(buffer_pool)
        .with_lock(LockConfig::no_wait());
    let mut db = Database::new(options);
    if args.demo {
        load_demo(&mut db, args.demo_rows, args.seed.unwrap_or(42))?;
    }

    println!(":) Welcome to memdb. Type SELECT statements, \\stats, \\checkpoint or \\q.");
    let mut rl = DefaultEditor::new()?;
    rl.load_history(".memdb_history").ok();

    loop {
        match rl.readline("memdb=# ") {
            Ok(line) => {
                let line = line.trim().trim_end_matches(';');
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                match line {
                    "exit" | "\\q" => {
                        println!("bye!");
                        break;
                    }
                    "\\stats" => print_report(&db.statistics()),
                    "\\tables" => {
                        for name in db.table_names() {
                            println!("{name}");
                        }
                    }
                    "\\checkpoint" => match db.checkpoint() {
                        Ok(lsn) => println!("checkpoint at lsn {lsn}"),
                        Err(e) => println!("{e}"),
                    },
                    _ => {
                        if let Err(e) = run_line(&db, line) {
                            println!("{e}");
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    rl.save_history(".memdb_history").ok();
    Ok(())
}
