use crate::query::filter::{Filter, JsonPath, SortSpec};

/// One step of an aggregation pipeline. Stages execute in exactly the
/// order they were appended; no reordering or fusion is performed.
#[derive(Clone, Debug)]
pub enum PipelineStage {
    /// Keep only documents matching the filter.
    Match(Filter),
    /// Partition documents by key fields and fold accumulators over each
    /// partition. The output documents carry the key aliases and the
    /// accumulator aliases as their fields.
    Group(GroupSpec),
    /// Re-order the stream by the given keys.
    Sort(Vec<SortSpec>),
    /// Rebuild each document from the listed `(alias, path)` projections.
    Project(ProjectSpec),
    /// Drop the first `n` documents.
    Skip(u64),
    /// Keep at most `n` documents; `0` means unbounded.
    Limit(u64),
    /// Collapse the stream into a single `{alias: <count>}` document.
    Count(String),
    /// Fan the stream out into independent sub-pipelines sharing the same
    /// input; yields one document with one array field per branch. Must be
    /// the final stage.
    Facet(FacetSpec),
    /// Escape hatch: a SQL fragment selecting a `doc` column, with an
    /// `{input}` placeholder for the upstream relation.
    Raw(String),
}

#[derive(Clone, Debug)]
pub(crate) enum AccumulatorOp {
    Count,
    Sum(JsonPath),
    Avg(JsonPath),
    Min(JsonPath),
    Max(JsonPath),
}

#[derive(Clone, Debug)]
pub(crate) struct Accumulator {
    pub(crate) alias: String,
    pub(crate) op: AccumulatorOp,
}

/// Grouping specification: key fields plus folded accumulators.
#[derive(Clone, Debug, Default)]
pub struct GroupSpec {
    pub(crate) keys: Vec<(String, JsonPath)>,
    pub(crate) accumulators: Vec<Accumulator>,
}

impl GroupSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(mut self, alias: impl Into<String>, path: impl Into<JsonPath>) -> Self {
        self.keys.push((alias.into(), path.into()));
        self
    }

    pub fn count(mut self, alias: impl Into<String>) -> Self {
        self.accumulators.push(Accumulator {
            alias: alias.into(),
            op: AccumulatorOp::Count,
        });
        self
    }

    pub fn sum(mut self, alias: impl Into<String>, path: impl Into<JsonPath>) -> Self {
        self.accumulators.push(Accumulator {
            alias: alias.into(),
            op: AccumulatorOp::Sum(path.into()),
        });
        self
    }

    pub fn avg(mut self, alias: impl Into<String>, path: impl Into<JsonPath>) -> Self {
        self.accumulators.push(Accumulator {
            alias: alias.into(),
            op: AccumulatorOp::Avg(path.into()),
        });
        self
    }

    pub fn min(mut self, alias: impl Into<String>, path: impl Into<JsonPath>) -> Self {
        self.accumulators.push(Accumulator {
            alias: alias.into(),
            op: AccumulatorOp::Min(path.into()),
        });
        self
    }

    pub fn max(mut self, alias: impl Into<String>, path: impl Into<JsonPath>) -> Self {
        self.accumulators.push(Accumulator {
            alias: alias.into(),
            op: AccumulatorOp::Max(path.into()),
        });
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.accumulators.is_empty()
    }
}

/// Projection: the output document is rebuilt from `(alias, path)` pairs.
#[derive(Clone, Debug, Default)]
pub struct ProjectSpec {
    pub(crate) fields: Vec<(String, JsonPath)>,
}

impl ProjectSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, alias: impl Into<String>, path: impl Into<JsonPath>) -> Self {
        self.fields.push((alias.into(), path.into()));
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Named sub-pipelines evaluated against the same upstream input.
#[derive(Clone, Debug, Default)]
pub struct FacetSpec {
    pub(crate) branches: Vec<(String, Vec<PipelineStage>)>,
}

impl FacetSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch(mut self, name: impl Into<String>, stages: Vec<PipelineStage>) -> Self {
        self.branches.push((name.into(), stages));
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}
