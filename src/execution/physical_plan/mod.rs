mod aggregate;
mod block_nested_loop_join;
mod filter;
mod grace_hash_join;
mod hash_join;
mod index_nested_loop_join;
mod index_scan;
mod join;
mod limit;
mod nested_loop_join;
mod project;
mod seq_scan;
mod sort;
mod sort_merge_join;

pub use aggregate::PhysicalAggregate;
pub use block_nested_loop_join::PhysicalBlockNestedLoopJoin;
pub use filter::PhysicalFilter;
pub use grace_hash_join::PhysicalGraceHashJoin;
pub use hash_join::PhysicalHashJoin;
pub use index_nested_loop_join::PhysicalIndexNestedLoopJoin;
pub use index_scan::{PhysicalIndexRangeScan, PhysicalIndexScan};
pub use limit::PhysicalLimit;
pub use nested_loop_join::PhysicalNestedLoopJoin;
pub use project::PhysicalProject;
pub use seq_scan::PhysicalSeqScan;
pub use sort::{OrderByExpr, PhysicalSort};
pub use sort_merge_join::PhysicalSortMergeJoin;

use crate::catalog::SchemaRef;
use crate::{
    error::MemDbResult,
    execution::{ExecutionContext, VolcanoExecutor},
    storage::tuple::Tuple,
};

#[derive(Debug)]
pub enum PhysicalPlan {
    SeqScan(PhysicalSeqScan),
    IndexScan(PhysicalIndexScan),
    IndexRangeScan(PhysicalIndexRangeScan),
    Limit(PhysicalLimit),
    Sort(PhysicalSort),
    Project(PhysicalProject),
    Filter(PhysicalFilter),
    Aggregate(PhysicalAggregate),
    NestedLoopJoin(PhysicalNestedLoopJoin),
    BlockNestedLoopJoin(PhysicalBlockNestedLoopJoin),
    HashJoin(PhysicalHashJoin),
    GraceHashJoin(PhysicalGraceHashJoin),
    SortMergeJoin(PhysicalSortMergeJoin),
    IndexNestedLoopJoin(PhysicalIndexNestedLoopJoin),
}

impl PhysicalPlan {
    pub fn inputs(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::Project(PhysicalProject { input, .. }) => vec![input],
            PhysicalPlan::Filter(PhysicalFilter { input, .. }) => vec![input],
            PhysicalPlan::Limit(PhysicalLimit { input, .. }) => vec![input],
            PhysicalPlan::Sort(PhysicalSort { input, .. }) => vec![input],
            PhysicalPlan::Aggregate(PhysicalAggregate { input, .. }) => vec![input],
            PhysicalPlan::NestedLoopJoin(PhysicalNestedLoopJoin {
                left_input,
                right_input,
                ..
            })
            | PhysicalPlan::BlockNestedLoopJoin(PhysicalBlockNestedLoopJoin {
                left_input,
                right_input,
                ..
            })
            | PhysicalPlan::HashJoin(PhysicalHashJoin {
                left_input,
                right_input,
                ..
            })
            | PhysicalPlan::GraceHashJoin(PhysicalGraceHashJoin {
                left_input,
                right_input,
                ..
            })
            | PhysicalPlan::SortMergeJoin(PhysicalSortMergeJoin {
                left_input,
                right_input,
                ..
            }) => vec![left_input, right_input],
            PhysicalPlan::IndexNestedLoopJoin(PhysicalIndexNestedLoopJoin { left_input, .. }) => {
                vec![left_input]
            }
            PhysicalPlan::SeqScan(_)
            | PhysicalPlan::IndexScan(_)
            | PhysicalPlan::IndexRangeScan(_) => vec![],
        }
    }
}

impl VolcanoExecutor for PhysicalPlan {
    fn init(&self, context: &mut ExecutionContext) -> MemDbResult<()> {
        match self {
            PhysicalPlan::SeqScan(op) => op.init(context),
            PhysicalPlan::IndexScan(op) => op.init(context),
            PhysicalPlan::IndexRangeScan(op) => op.init(context),
            PhysicalPlan::Limit(op) => op.init(context),
            PhysicalPlan::Sort(op) => op.init(context),
            PhysicalPlan::Project(op) => op.init(context),
            PhysicalPlan::Filter(op) => op.init(context),
            PhysicalPlan::Aggregate(op) => op.init(context),
            PhysicalPlan::NestedLoopJoin(op) => op.init(context),
            PhysicalPlan::BlockNestedLoopJoin(op) => op.init(context),
            PhysicalPlan::HashJoin(op) => op.init(context),
            PhysicalPlan::GraceHashJoin(op) => op.init(context),
            PhysicalPlan::SortMergeJoin(op) => op.init(context),
            PhysicalPlan::IndexNestedLoopJoin(op) => op.init(context),
        }
    }

    fn next(&self, context: &mut ExecutionContext) -> MemDbResult<Option<Tuple>> {
        match self {
            PhysicalPlan::SeqScan(op) => op.next(context),
            PhysicalPlan::IndexScan(op) => op.next(context),
            PhysicalPlan::IndexRangeScan(op) => op.next(context),
            PhysicalPlan::Limit(op) => op.next(context),
            PhysicalPlan::Sort(op) => op.next(context),
            PhysicalPlan::Project(op) => op.next(context),
            PhysicalPlan::Filter(op) => op.next(context),
            PhysicalPlan::Aggregate(op) => op.next(context),
            PhysicalPlan::NestedLoopJoin(op) => op.next(context),
            PhysicalPlan::BlockNestedLoopJoin(op) => op.next(context),
            PhysicalPlan::HashJoin(op) => op.next(context),
            PhysicalPlan::GraceHashJoin(op) => op.next(context),
            PhysicalPlan::SortMergeJoin(op) => op.next(context),
            PhysicalPlan::IndexNestedLoopJoin(op) => op.next(context),
        }
    }

    fn output_schema(&self) -> SchemaRef {
        match self {
            Self::SeqScan(op) => op.output_schema(),
            Self::IndexScan(op) => op.output_schema(),
            Self::IndexRangeScan(op) => op.output_schema(),
            Self::Limit(op) => op.output_schema(),
            Self::Sort(op) => op.output_schema(),
            Self::Project(op) => op.output_schema(),
            Self::Filter(op) => op.output_schema(),
            Self::Aggregate(op) => op.output_schema(),
            Self::NestedLoopJoin(op) => op.output_schema(),
            Self::BlockNestedLoopJoin(op) => op.output_schema(),
            Self::HashJoin(op) => op.output_schema(),
            Self::GraceHashJoin(op) => op.output_schema(),
            Self::SortMergeJoin(op) => op.output_schema(),
            Self::IndexNestedLoopJoin(op) => op.output_schema(),
        }
    }
}

impl std::fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SeqScan(op) => write!(f, "{op}"),
            Self::IndexScan(op) => write!(f, "{op}"),
            Self::IndexRangeScan(op) => write!(f, "{op}"),
            Self::Limit(op) => write!(f, "{op}"),
            Self::Sort(op) => write!(f, "{op}"),
            Self::Project(op) => write!(f, "{op}"),
            Self::Filter(op) => write!(f, "{op}"),
            Self::Aggregate(op) => write!(f, "{op}"),
            Self::NestedLoopJoin(op) => write!(f, "{op}"),
            Self::BlockNestedLoopJoin(op) => write!(f, "{op}"),
            Self::HashJoin(op) => write!(f, "{op}"),
            Self::GraceHashJoin(op) => write!(f, "{op}"),
            Self::SortMergeJoin(op) => write!(f, "{op}"),
            Self::IndexNestedLoopJoin(op) => write!(f, "{op}"),
        }
    }
}
