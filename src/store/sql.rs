//! Compilation of filters and pipelines into single SQL statements over a
//! collection's `doc jsonb` column.

use sqlx::{Postgres, QueryBuilder};

use crate::error::{Error, Result};
use crate::query::filter::{Filter, Predicate, SortSpec, push_json_expr, push_text_expr};
use crate::query::pipeline::{AccumulatorOp, FacetSpec, PipelineStage};
use crate::store::FindOptions;

pub fn quote_ident(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Collection names become table identifiers; keep them to the safe
/// subset even though they are always quoted.
pub(crate) fn validate_collection(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::InvalidCollection(name.to_string()))
    }
}

pub(crate) fn compile_find(
    collection: &str,
    filter: &Filter,
    options: &FindOptions,
) -> Result<QueryBuilder<'static, Postgres>> {
    validate_collection(collection)?;

    let mut builder = QueryBuilder::new("select doc from ");
    builder.push(quote_ident(collection));

    if !filter.is_empty() {
        builder.push(" where ");
        filter.push_sql(&mut builder);
    }

    if !options.sort.is_empty() {
        builder.push(" order by ");
        let mut first = true;
        for spec in &options.sort {
            if !first {
                builder.push(", ");
            }
            first = false;
            spec.push_sql(&mut builder);
        }
    }

    if options.skip > 0 {
        builder.push(" offset ");
        builder.push_bind(options.skip as i64);
    }

    if options.limit > 0 {
        builder.push(" limit ");
        builder.push_bind(options.limit as i64);
    }

    Ok(builder)
}

pub(crate) fn compile_pipeline(
    collection: &str,
    stages: &[PipelineStage],
) -> Result<QueryBuilder<'static, Postgres>> {
    validate_collection(collection)?;

    let (segments, facet) = plan(stages)?;
    let mut builder = QueryBuilder::new("");

    match facet {
        None => render_chain(&mut builder, &segments, &SqlInput::Collection(collection)),
        Some(spec) => {
            builder.push("with base as (");
            render_chain(&mut builder, &segments, &SqlInput::Collection(collection));
            builder.push(") select jsonb_build_object(");
            let mut first = true;
            for (name, branch_stages) in &spec.branches {
                if !first {
                    builder.push(", ");
                }
                first = false;
                builder.push_bind(name.clone());
                builder.push(", (select coalesce(jsonb_agg(doc), '[]'::jsonb) from (");
                let (branch_segments, branch_facet) = plan(branch_stages)?;
                if branch_facet.is_some() {
                    return Err(Error::Pipeline("facet stages cannot nest".into()));
                }
                render_chain(&mut builder, &branch_segments, &SqlInput::Relation("base"));
                builder.push(") as branch)");
            }
            builder.push(") as doc");
        }
    }

    Ok(builder)
}

enum SqlInput<'a> {
    Collection(&'a str),
    Relation(&'a str),
}

/// One SELECT level. Stages fold into the current segment as long as the
/// fold cannot change sequential semantics; otherwise a new segment opens
/// and the previous one becomes a nested subquery.
#[derive(Default)]
struct Segment {
    filters: Vec<Predicate>,
    group: Option<crate::query::pipeline::GroupSpec>,
    sort: Vec<SortSpec>,
    skip: Option<u64>,
    limit: Option<u64>,
    project: Option<crate::query::pipeline::ProjectSpec>,
    count: Option<String>,
    raw: Option<String>,
}

impl Segment {
    fn is_empty(&self) -> bool {
        self.filters.is_empty()
            && self.group.is_none()
            && self.sort.is_empty()
            && self.skip.is_none()
            && self.limit.is_none()
            && self.project.is_none()
            && self.count.is_none()
            && self.raw.is_none()
    }

    fn accepts_match(&self) -> bool {
        self.group.is_none()
            && self.project.is_none()
            && self.count.is_none()
            && self.skip.is_none()
            && self.limit.is_none()
            && self.raw.is_none()
    }

    fn accepts_sort(&self) -> bool {
        self.sort.is_empty()
            && self.group.is_none()
            && self.project.is_none()
            && self.count.is_none()
            && self.skip.is_none()
            && self.limit.is_none()
            && self.raw.is_none()
    }

    fn accepts_group(&self) -> bool {
        self.group.is_none()
            && self.sort.is_empty()
            && self.project.is_none()
            && self.count.is_none()
            && self.skip.is_none()
            && self.limit.is_none()
            && self.raw.is_none()
    }

    fn accepts_skip(&self) -> bool {
        self.skip.is_none() && self.limit.is_none() && self.count.is_none() && self.raw.is_none()
    }

    fn accepts_limit(&self) -> bool {
        self.limit.is_none() && self.count.is_none() && self.raw.is_none()
    }

    fn accepts_project(&self) -> bool {
        self.project.is_none()
            && self.group.is_none()
            && self.count.is_none()
            && self.raw.is_none()
    }

    fn accepts_count(&self) -> bool {
        self.group.is_none()
            && self.sort.is_empty()
            && self.project.is_none()
            && self.count.is_none()
            && self.skip.is_none()
            && self.limit.is_none()
            && self.raw.is_none()
    }
}

fn plan(stages: &[PipelineStage]) -> Result<(Vec<Segment>, Option<FacetSpec>)> {
    let mut segments = vec![Segment::default()];
    let mut facet: Option<FacetSpec> = None;

    for stage in stages {
        if facet.is_some() {
            return Err(Error::Pipeline("facet must be the final stage".into()));
        }
        match stage {
            PipelineStage::Match(filter) => {
                if !segments.last().expect("segment").accepts_match() {
                    segments.push(Segment::default());
                }
                segments
                    .last_mut()
                    .expect("segment")
                    .filters
                    .extend(filter.predicates().iter().cloned());
            }
            PipelineStage::Group(spec) => {
                if spec.is_empty() {
                    return Err(Error::Pipeline("group stage has no keys or accumulators".into()));
                }
                if !segments.last().expect("segment").accepts_group() {
                    segments.push(Segment::default());
                }
                segments.last_mut().expect("segment").group = Some(spec.clone());
            }
            PipelineStage::Sort(keys) => {
                if keys.is_empty() {
                    return Err(Error::Pipeline("sort stage has no keys".into()));
                }
                if !segments.last().expect("segment").accepts_sort() {
                    segments.push(Segment::default());
                }
                segments.last_mut().expect("segment").sort = keys.clone();
            }
            PipelineStage::Project(spec) => {
                if spec.is_empty() {
                    return Err(Error::Pipeline("project stage has no fields".into()));
                }
                if !segments.last().expect("segment").accepts_project() {
                    segments.push(Segment::default());
                }
                segments.last_mut().expect("segment").project = Some(spec.clone());
            }
            PipelineStage::Skip(n) => {
                if *n == 0 {
                    continue;
                }
                if !segments.last().expect("segment").accepts_skip() {
                    segments.push(Segment::default());
                }
                segments.last_mut().expect("segment").skip = Some(*n);
            }
            PipelineStage::Limit(n) => {
                // limit 0 follows the find path convention: unbounded.
                if *n == 0 {
                    continue;
                }
                if !segments.last().expect("segment").accepts_limit() {
                    segments.push(Segment::default());
                }
                segments.last_mut().expect("segment").limit = Some(*n);
            }
            PipelineStage::Count(alias) => {
                if !segments.last().expect("segment").accepts_count() {
                    segments.push(Segment::default());
                }
                segments.last_mut().expect("segment").count = Some(alias.clone());
            }
            PipelineStage::Facet(spec) => {
                if spec.is_empty() {
                    return Err(Error::Pipeline("facet stage has no branches".into()));
                }
                facet = Some(spec.clone());
            }
            PipelineStage::Raw(sql) => {
                if !sql.contains("{input}") {
                    return Err(Error::Pipeline(
                        "raw stage must reference the {input} placeholder".into(),
                    ));
                }
                if !segments.last().expect("segment").is_empty() {
                    segments.push(Segment::default());
                }
                segments.last_mut().expect("segment").raw = Some(sql.clone());
            }
        }
    }

    Ok((segments, facet))
}

fn render_chain(builder: &mut QueryBuilder<'static, Postgres>, segments: &[Segment], input: &SqlInput<'_>) {
    let (last, rest) = segments.split_last().expect("at least one segment");

    if let Some(raw) = &last.raw {
        let (prefix, suffix) = raw.split_once("{input}").expect("validated at plan time");
        builder.push(prefix.to_string());
        render_input(builder, rest, input);
        builder.push(suffix.to_string());
        return;
    }

    if let Some(alias) = &last.count {
        builder.push("select jsonb_build_object(");
        builder.push_bind(alias.clone());
        builder.push(", count(*)) as doc");
    } else if let Some(group) = &last.group {
        // Group keys are rendered as literal path expressions: Postgres
        // matches GROUP BY entries against the select list syntactically,
        // so the two occurrences must be textually identical, which bound
        // parameters cannot guarantee.
        builder.push("select jsonb_build_object(");
        let mut first = true;
        for (alias, path) in &group.keys {
            if !first {
                builder.push(", ");
            }
            first = false;
            builder.push_bind(alias.clone());
            builder.push(", ");
            push_path_literal(builder, path);
        }
        for accumulator in &group.accumulators {
            if !first {
                builder.push(", ");
            }
            first = false;
            builder.push_bind(accumulator.alias.clone());
            builder.push(", ");
            match &accumulator.op {
                AccumulatorOp::Count => {
                    builder.push("count(*)");
                }
                AccumulatorOp::Sum(path) => {
                    builder.push("sum((");
                    push_text_expr(builder, path);
                    builder.push(")::numeric)");
                }
                AccumulatorOp::Avg(path) => {
                    builder.push("avg((");
                    push_text_expr(builder, path);
                    builder.push(")::numeric)");
                }
                AccumulatorOp::Min(path) => {
                    builder.push("min((");
                    push_text_expr(builder, path);
                    builder.push(")::numeric)");
                }
                AccumulatorOp::Max(path) => {
                    builder.push("max((");
                    push_text_expr(builder, path);
                    builder.push(")::numeric)");
                }
            }
        }
        builder.push(") as doc");
    } else if let Some(project) = &last.project {
        builder.push("select jsonb_build_object(");
        let mut first = true;
        for (alias, path) in &project.fields {
            if !first {
                builder.push(", ");
            }
            first = false;
            builder.push_bind(alias.clone());
            builder.push(", ");
            push_json_expr(builder, path);
        }
        builder.push(") as doc");
    } else {
        builder.push("select doc");
    }

    builder.push(" from ");
    render_input(builder, rest, input);

    if !last.filters.is_empty() {
        builder.push(" where ");
        let mut iter = last.filters.iter();
        if let Some(first) = iter.next() {
            first.push_sql(builder);
        }
        for predicate in iter {
            builder.push(" and ");
            predicate.push_sql(builder);
        }
    }

    if let Some(group) = &last.group {
        if !group.keys.is_empty() {
            builder.push(" group by ");
            let mut first = true;
            for (_, path) in &group.keys {
                if !first {
                    builder.push(", ");
                }
                first = false;
                push_path_literal(builder, path);
            }
        }
    }

    if !last.sort.is_empty() {
        builder.push(" order by ");
        let mut first = true;
        for spec in &last.sort {
            if !first {
                builder.push(", ");
            }
            first = false;
            spec.push_sql(builder);
        }
    }

    if let Some(skip) = last.skip {
        builder.push(" offset ");
        builder.push_bind(skip as i64);
    }

    if let Some(limit) = last.limit {
        builder.push(" limit ");
        builder.push_bind(limit as i64);
    }
}

fn push_path_literal(builder: &mut QueryBuilder<'static, Postgres>, path: &crate::query::filter::JsonPath) {
    if path.parts().is_empty() {
        builder.push("doc");
        return;
    }
    builder.push("doc #> array[");
    for (i, part) in path.parts().iter().enumerate() {
        if i > 0 {
            builder.push(",");
        }
        builder.push("'");
        builder.push(part.replace('\'', "''"));
        builder.push("'");
    }
    builder.push("]");
}

fn render_input(builder: &mut QueryBuilder<'static, Postgres>, rest: &[Segment], input: &SqlInput<'_>) {
    if rest.is_empty() {
        match input {
            SqlInput::Collection(name) => {
                builder.push(quote_ident(name));
            }
            SqlInput::Relation(name) => {
                builder.push(name.to_string());
            }
        }
    } else {
        builder.push("(");
        render_chain(builder, rest, input);
        builder.push(") as q");
        builder.push(rest.len().to_string());
    }
}
