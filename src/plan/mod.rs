mod binder;
mod physical_planner;
mod select;

pub use binder::{parse_sql, Binder};
pub use physical_planner::PhysicalPlanner;
pub use select::{SelectItem, SelectStatement};
