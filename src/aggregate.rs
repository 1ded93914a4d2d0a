//! The aggregation pipeline executor.
//!
//! A pipeline is parsed into a list of typed stages, then documents are run
//! through the stages in order. `$sort` and `$group` are blocking stages and
//! buffer their whole input; everything else transforms documents one at a
//! time. `$lookup` reads the foreign collection through the storage layer.

use bson::{Bson, Document};
use log::trace;

use crate::db::CancellationToken;
use crate::error::{Error, Result};
use crate::expr::{Expr, Scope};
use crate::filter::{Filter, FilterEnv};
use crate::path;
use crate::store::{ScanPlan, Store};
use crate::value;

/// A stage as assembled by an interactive editor: the stage document plus
/// an enabled toggle.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub stage: Document,
    pub enabled: bool,
}

/// Flattens editor stages into an executable pipeline, dropping disabled
/// stages and preserving order.
pub fn build_pipeline(stages: &[PipelineStage]) -> Vec<Document> {
    stages
        .iter()
        .filter(|entry| entry.enabled)
        .map(|entry| entry.stage.clone())
        .collect()
}

/// Everything a pipeline run needs besides its input documents.
pub struct PipelineContext<'a> {
    pub store: &'a Store,
    pub db_name: &'a str,
    pub env: FilterEnv,
    pub cancel: CancellationToken,
    pub max_buffered: Option<usize>,
}

impl<'a> PipelineContext<'a> {
    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    fn guard_buffer(&self, stage: &str, buffered: usize) -> Result<()> {
        if let Some(bound) = self.max_buffered {
            if buffered > bound {
                return Err(Error::OperationError(format!(
                    "{} buffered {} documents, exceeding the configured bound of {}",
                    stage, buffered, bound
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
enum Stage {
    Match(Filter),
    Project(Projection),
    AddFields(Vec<(String, Expr)>),
    Group {
        id: Expr,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(Vec<SortKey>),
    Limit(usize),
    Skip(usize),
    Unwind {
        field: String,
        preserve_empty: bool,
        index_field: Option<String>,
    },
    Lookup(Lookup),
    Count(String),
}

#[derive(Debug, Clone)]
enum Lookup {
    Equality {
        from: String,
        local_field: String,
        foreign_field: String,
        target: String,
    },
    Pipeline {
        from: String,
        bindings: Vec<(String, Expr)>,
        inner: Pipeline,
        target: String,
    },
}

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    First(Expr),
    Last(Expr),
    Push(Expr),
    AddToSet(Expr),
}

/// A `$sort` key with its direction.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub path: String,
    pub ascending: bool,
}

/// Parses a sort specification document: `{path: 1 | -1, ...}`.
pub fn parse_sort(spec: &Document) -> Result<Vec<SortKey>> {
    if spec.is_empty() {
        return Err(Error::BadQuery("a sort specification cannot be empty".to_owned()));
    }
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec.iter() {
        let ascending = match value::as_number(direction).map(|n| n.as_f64()) {
            Some(d) if d == 1.0 => true,
            Some(d) if d == -1.0 => false,
            _ => {
                return Err(Error::BadQuery(format!(
                    "the sort direction for '{}' must be 1 or -1",
                    field
                )));
            }
        };
        keys.push(SortKey {
            path: field.to_owned(),
            ascending,
        });
    }
    Ok(keys)
}

/// Stable sort under the value-model ordering, missing before null before
/// everything else; ties keep input order.
pub fn sort_documents(docs: &mut Vec<Document>, keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let left = path::resolve_direct(a, &key.path);
            let right = path::resolve_direct(b, &key.path);
            let ord = value::cmp_sort_keys(left, right);
            if ord != std::cmp::Ordering::Equal {
                return if key.ascending { ord } else { ord.reverse() };
            }
        }
        std::cmp::Ordering::Equal
    });
}

impl Pipeline {
    pub fn parse(stages: &[Document]) -> Result<Pipeline> {
        let mut parsed = Vec::with_capacity(stages.len());
        for stage in stages {
            parsed.push(Stage::parse(stage)?);
        }
        Ok(Pipeline { stages: parsed })
    }

    /// The filter of a leading `$match`, which the caller may use to push
    /// the scan down into storage.
    pub(crate) fn leading_match(&self) -> Option<&Filter> {
        match self.stages.first() {
            Some(&Stage::Match(ref filter)) => Some(filter),
            _ => None,
        }
    }

    pub fn run(&self, mut docs: Vec<Document>, ctx: &PipelineContext) -> Result<Vec<Document>> {
        for stage in &self.stages {
            ctx.checkpoint()?;
            docs = stage.run(docs, ctx)?;
            trace!("pipeline stage produced {} documents", docs.len());
        }
        Ok(docs)
    }
}

impl Stage {
    fn parse(stage: &Document) -> Result<Stage> {
        if stage.len() != 1 {
            return Err(Error::InvalidPipeline(format!(
                "a pipeline stage must have exactly one field: {}",
                stage
            )));
        }
        let (name, operand) = stage.iter().next().unwrap();
        match name.as_str() {
            "$match" => match *operand {
                Bson::Document(ref doc) => Ok(Stage::Match(Filter::parse(doc)?)),
                _ => Err(Error::InvalidPipeline("$match requires a document".to_owned())),
            },
            "$project" => match *operand {
                Bson::Document(ref doc) => {
                    let projection = Projection::parse(doc)
                        .map_err(|err| Error::InvalidPipeline(format!("$project: {}", err)))?;
                    Ok(Stage::Project(projection))
                }
                _ => Err(Error::InvalidPipeline("$project requires a document".to_owned())),
            },
            "$addFields" | "$set" => match *operand {
                Bson::Document(ref doc) => {
                    let mut fields = Vec::with_capacity(doc.len());
                    for (field, spec) in doc.iter() {
                        fields.push((field.clone(), Expr::parse(spec)?));
                    }
                    Ok(Stage::AddFields(fields))
                }
                _ => Err(Error::InvalidPipeline(format!(
                    "{} requires a document",
                    name
                ))),
            },
            "$group" => Stage::parse_group(operand),
            "$sort" => match *operand {
                Bson::Document(ref doc) => {
                    let keys = parse_sort(doc)
                        .map_err(|err| Error::InvalidPipeline(format!("$sort: {}", err)))?;
                    Ok(Stage::Sort(keys))
                }
                _ => Err(Error::InvalidPipeline("$sort requires a document".to_owned())),
            },
            "$limit" => match value::as_number(operand) {
                Some(value::Number::Int(n)) if n > 0 => Ok(Stage::Limit(n as usize)),
                _ => Err(Error::InvalidPipeline(
                    "$limit must be a positive integer".to_owned(),
                )),
            },
            "$skip" => match value::as_number(operand) {
                Some(value::Number::Int(n)) if n >= 0 => Ok(Stage::Skip(n as usize)),
                _ => Err(Error::InvalidPipeline(
                    "$skip must be a non-negative integer".to_owned(),
                )),
            },
            "$unwind" => Stage::parse_unwind(operand),
            "$lookup" => Stage::parse_lookup(operand),
            "$count" => match *operand {
                Bson::String(ref field)
                    if !field.is_empty() && !field.starts_with('$') && !field.contains('.') =>
                {
                    Ok(Stage::Count(field.clone()))
                }
                _ => Err(Error::InvalidPipeline(
                    "$count requires a plain, non-empty field name".to_owned(),
                )),
            },
            unknown => Err(Error::InvalidPipeline(format!(
                "unknown pipeline stage: {}",
                unknown
            ))),
        }
    }

    fn parse_group(operand: &Bson) -> Result<Stage> {
        let doc = match *operand {
            Bson::Document(ref doc) => doc,
            _ => return Err(Error::InvalidPipeline("$group requires a document".to_owned())),
        };
        let id = match doc.get("_id") {
            Some(spec) => Expr::parse(spec)?,
            None => {
                return Err(Error::InvalidPipeline(
                    "$group requires an _id expression".to_owned(),
                ));
            }
        };
        let mut accumulators = Vec::new();
        for (field, spec) in doc.iter() {
            if field == "_id" {
                continue;
            }
            let inner = match *spec {
                Bson::Document(ref inner) if inner.len() == 1 => inner,
                _ => {
                    return Err(Error::InvalidPipeline(format!(
                        "the $group field '{}' must be an accumulator document",
                        field
                    )));
                }
            };
            let (acc_name, acc_operand) = inner.iter().next().unwrap();
            let accumulator = match acc_name.as_str() {
                "$sum" => Accumulator::Sum(Expr::parse(acc_operand)?),
                "$avg" => Accumulator::Avg(Expr::parse(acc_operand)?),
                "$min" => Accumulator::Min(Expr::parse(acc_operand)?),
                "$max" => Accumulator::Max(Expr::parse(acc_operand)?),
                "$first" => Accumulator::First(Expr::parse(acc_operand)?),
                "$last" => Accumulator::Last(Expr::parse(acc_operand)?),
                "$push" => Accumulator::Push(Expr::parse(acc_operand)?),
                "$addToSet" => Accumulator::AddToSet(Expr::parse(acc_operand)?),
                // `$count: {}` is shorthand for `{$sum: 1}`.
                "$count" => Accumulator::Sum(Expr::Literal(Bson::I64(1))),
                unknown => {
                    return Err(Error::InvalidPipeline(format!(
                        "unknown $group accumulator: {}",
                        unknown
                    )));
                }
            };
            accumulators.push((field.clone(), accumulator));
        }
        Ok(Stage::Group { id, accumulators })
    }

    fn parse_unwind(operand: &Bson) -> Result<Stage> {
        let (raw_path, preserve_empty, index_field) = match *operand {
            Bson::String(ref p) => (p.clone(), false, None),
            Bson::Document(ref doc) => {
                let p = match doc.get("path") {
                    Some(&Bson::String(ref p)) => p.clone(),
                    _ => {
                        return Err(Error::InvalidPipeline(
                            "$unwind requires a string path".to_owned(),
                        ));
                    }
                };
                let preserve = match doc.get("preserveNullAndEmptyArrays") {
                    Some(&Bson::Boolean(b)) => b,
                    None => false,
                    _ => {
                        return Err(Error::InvalidPipeline(
                            "preserveNullAndEmptyArrays must be a boolean".to_owned(),
                        ));
                    }
                };
                let index = match doc.get("includeArrayIndex") {
                    Some(&Bson::String(ref field)) if !field.starts_with('$') => {
                        Some(field.clone())
                    }
                    None => None,
                    _ => {
                        return Err(Error::InvalidPipeline(
                            "includeArrayIndex must be a plain field name".to_owned(),
                        ));
                    }
                };
                (p, preserve, index)
            }
            _ => {
                return Err(Error::InvalidPipeline(
                    "$unwind requires a path or an options document".to_owned(),
                ));
            }
        };
        if !raw_path.starts_with('$') || raw_path.len() < 2 {
            return Err(Error::InvalidPipeline(
                "the $unwind path must start with $".to_owned(),
            ));
        }
        Ok(Stage::Unwind {
            field: raw_path[1..].to_owned(),
            preserve_empty,
            index_field,
        })
    }

    fn parse_lookup(operand: &Bson) -> Result<Stage> {
        let doc = match *operand {
            Bson::Document(ref doc) => doc,
            _ => return Err(Error::InvalidPipeline("$lookup requires a document".to_owned())),
        };
        let from = match doc.get("from") {
            Some(&Bson::String(ref from)) => from.clone(),
            _ => {
                return Err(Error::InvalidPipeline(
                    "$lookup requires a 'from' collection name".to_owned(),
                ));
            }
        };
        let target = match doc.get("as") {
            Some(&Bson::String(ref target)) => target.clone(),
            _ => {
                return Err(Error::InvalidPipeline(
                    "$lookup requires an 'as' output field".to_owned(),
                ));
            }
        };
        if let Some(&Bson::Array(ref stages)) = doc.get("pipeline") {
            let mut bindings = Vec::new();
            if let Some(&Bson::Document(ref lets)) = doc.get("let") {
                for (name, spec) in lets.iter() {
                    bindings.push((name.clone(), Expr::parse(spec)?));
                }
            }
            let mut stage_docs = Vec::with_capacity(stages.len());
            for stage in stages {
                match *stage {
                    Bson::Document(ref inner) => stage_docs.push(inner.clone()),
                    _ => {
                        return Err(Error::InvalidPipeline(
                            "$lookup pipeline entries must be documents".to_owned(),
                        ));
                    }
                }
            }
            return Ok(Stage::Lookup(Lookup::Pipeline {
                from,
                bindings,
                inner: Pipeline::parse(&stage_docs)?,
                target,
            }));
        }
        let local_field = match doc.get("localField") {
            Some(&Bson::String(ref field)) => field.clone(),
            _ => {
                return Err(Error::InvalidPipeline(
                    "$lookup requires 'localField' (or a 'pipeline')".to_owned(),
                ));
            }
        };
        let foreign_field = match doc.get("foreignField") {
            Some(&Bson::String(ref field)) => field.clone(),
            _ => {
                return Err(Error::InvalidPipeline(
                    "$lookup requires 'foreignField' (or a 'pipeline')".to_owned(),
                ));
            }
        };
        Ok(Stage::Lookup(Lookup::Equality {
            from,
            local_field,
            foreign_field,
            target,
        }))
    }

    fn run(&self, docs: Vec<Document>, ctx: &PipelineContext) -> Result<Vec<Document>> {
        match *self {
            Stage::Match(ref filter) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if filter.matches(&doc, &ctx.env)? {
                        kept.push(doc);
                    }
                }
                Ok(kept)
            }
            Stage::Project(ref projection) => {
                let mut projected = Vec::with_capacity(docs.len());
                for doc in docs {
                    projected.push(projection.apply(&doc, &ctx.env)?);
                }
                Ok(projected)
            }
            Stage::AddFields(ref fields) => {
                let mut merged = Vec::with_capacity(docs.len());
                for doc in docs {
                    let mut out = doc.clone();
                    let scope = Scope::new(&doc, &ctx.env.vars, ctx.env.now);
                    for (field, expr) in fields {
                        if let Some(computed) = expr.eval(&scope)? {
                            path::set(&mut out, field, computed)?;
                        }
                    }
                    merged.push(out);
                }
                Ok(merged)
            }
            Stage::Group {
                ref id,
                ref accumulators,
            } => self.run_group(id, accumulators, docs, ctx),
            Stage::Sort(ref keys) => {
                ctx.guard_buffer("$sort", docs.len())?;
                let mut sorted = docs;
                sort_documents(&mut sorted, keys);
                Ok(sorted)
            }
            Stage::Limit(n) => {
                let mut limited = docs;
                limited.truncate(n);
                Ok(limited)
            }
            Stage::Skip(n) => Ok(docs.into_iter().skip(n).collect()),
            Stage::Unwind {
                ref field,
                preserve_empty,
                ref index_field,
            } => {
                let mut fanned = Vec::with_capacity(docs.len());
                for doc in docs {
                    unwind_one(&doc, field, preserve_empty, index_field.as_deref(), &mut fanned)?;
                }
                Ok(fanned)
            }
            Stage::Lookup(ref lookup) => self.run_lookup(lookup, docs, ctx),
            Stage::Count(ref field) => {
                let mut out = Document::new();
                out.insert(field.clone(), Bson::I64(docs.len() as i64));
                Ok(vec![out])
            }
        }
    }

    fn run_group(
        &self,
        id: &Expr,
        accumulators: &[(String, Accumulator)],
        docs: Vec<Document>,
        ctx: &PipelineContext,
    ) -> Result<Vec<Document>> {
        ctx.guard_buffer("$group", docs.len())?;
        let mut groups: Vec<(Bson, Vec<AccState>)> = Vec::new();
        for doc in &docs {
            let scope = Scope::new(doc, &ctx.env.vars, ctx.env.now);
            // Missing group keys collapse into the null group.
            let key = id.eval(&scope)?.unwrap_or(Bson::Null);
            let position = groups
                .iter()
                .position(|(existing, _)| value::values_equal(existing, &key));
            let index = match position {
                Some(index) => index,
                None => {
                    let states = accumulators
                        .iter()
                        .map(|(_, acc)| AccState::new(acc))
                        .collect();
                    groups.push((key, states));
                    groups.len() - 1
                }
            };
            for (slot, (_, acc)) in groups[index].1.iter_mut().zip(accumulators.iter()) {
                slot.observe(acc, &scope)?;
            }
        }
        let mut out = Vec::with_capacity(groups.len());
        for (key, states) in groups {
            let mut doc = Document::new();
            doc.insert("_id".to_owned(), key);
            for (state, (field, _)) in states.into_iter().zip(accumulators.iter()) {
                doc.insert(field.clone(), state.finalize());
            }
            out.push(doc);
        }
        Ok(out)
    }

    fn run_lookup(
        &self,
        lookup: &Lookup,
        docs: Vec<Document>,
        ctx: &PipelineContext,
    ) -> Result<Vec<Document>> {
        let from = match *lookup {
            Lookup::Equality { ref from, .. } | Lookup::Pipeline { ref from, .. } => from,
        };
        let foreign = match ctx.store.collection_id(ctx.db_name, from)? {
            Some(collection_id) => ctx.store.scan(collection_id, &ScanPlan::full())?,
            None => Vec::new(),
        };
        let mut joined = Vec::with_capacity(docs.len());
        for doc in docs {
            ctx.checkpoint()?;
            let matches = match *lookup {
                Lookup::Equality {
                    ref local_field,
                    ref foreign_field,
                    ..
                } => {
                    let local_values = join_values(&doc, local_field);
                    let mut matched = Vec::new();
                    for candidate in &foreign {
                        let foreign_values = join_values(candidate, foreign_field);
                        let hit = local_values.iter().any(|lv| {
                            foreign_values.iter().any(|fv| value::values_equal(lv, fv))
                        });
                        if hit {
                            matched.push(Bson::Document(candidate.clone()));
                        }
                    }
                    matched
                }
                Lookup::Pipeline {
                    ref bindings,
                    ref inner,
                    ..
                } => {
                    let scope = Scope::new(&doc, &ctx.env.vars, ctx.env.now);
                    let mut vars = ctx.env.vars.clone();
                    for (name, expr) in bindings {
                        vars.insert(name.clone(), expr.eval(&scope)?.unwrap_or(Bson::Null));
                    }
                    let inner_ctx = PipelineContext {
                        store: ctx.store,
                        db_name: ctx.db_name,
                        env: FilterEnv::with_vars(vars, ctx.env.now),
                        cancel: ctx.cancel.clone(),
                        max_buffered: ctx.max_buffered,
                    };
                    inner
                        .run(foreign.clone(), &inner_ctx)?
                        .into_iter()
                        .map(Bson::Document)
                        .collect()
                }
            };
            let target = match *lookup {
                Lookup::Equality { ref target, .. } | Lookup::Pipeline { ref target, .. } => target,
            };
            let mut out = doc;
            path::set(&mut out, target, Bson::Array(matches))?;
            joined.push(out);
        }
        Ok(joined)
    }
}

/// The local/foreign value set a `$lookup` equality join compares: the
/// resolved values with arrays flattened, and null standing in for missing.
fn join_values(doc: &Document, field: &str) -> Vec<Bson> {
    let resolved = path::resolve(doc, field);
    if resolved.is_empty() {
        return vec![Bson::Null];
    }
    let mut values = Vec::with_capacity(resolved.len());
    for value in resolved {
        match *value {
            Bson::Array(ref items) => values.extend(items.iter().cloned()),
            ref single => values.push(single.clone()),
        }
    }
    values
}

fn unwind_one(
    doc: &Document,
    field: &str,
    preserve_empty: bool,
    index_field: Option<&str>,
    out: &mut Vec<Document>,
) -> Result<()> {
    let current = path::resolve_direct(doc, field).cloned();
    match current {
        Some(Bson::Array(items)) if !items.is_empty() => {
            for (index, element) in items.into_iter().enumerate() {
                let mut copy = doc.clone();
                path::set(&mut copy, field, element)?;
                if let Some(index_field) = index_field {
                    path::set(&mut copy, index_field, Bson::I64(index as i64))?;
                }
                out.push(copy);
            }
        }
        Some(Bson::Array(_)) | Some(Bson::Null) | None => {
            if preserve_empty {
                let mut copy = doc.clone();
                path::unset(&mut copy, field);
                if let Some(index_field) = index_field {
                    path::set(&mut copy, index_field, Bson::Null)?;
                }
                out.push(copy);
            }
        }
        Some(single) => {
            // A non-array value unwinds to itself.
            let mut copy = doc.clone();
            path::set(&mut copy, field, single)?;
            if let Some(index_field) = index_field {
                path::set(&mut copy, index_field, Bson::Null)?;
            }
            out.push(copy);
        }
    }
    Ok(())
}

#[derive(Debug)]
enum AccState {
    Sum(value::Number),
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    FirstUnset,
    Last(Option<Bson>),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl AccState {
    fn new(acc: &Accumulator) -> AccState {
        match *acc {
            Accumulator::Sum(_) => AccState::Sum(value::Number::Int(0)),
            Accumulator::Avg(_) => AccState::Avg {
                total: 0.0,
                count: 0,
            },
            Accumulator::Min(_) => AccState::Min(None),
            Accumulator::Max(_) => AccState::Max(None),
            Accumulator::First(_) => AccState::FirstUnset,
            Accumulator::Last(_) => AccState::Last(None),
            Accumulator::Push(_) => AccState::Push(Vec::new()),
            Accumulator::AddToSet(_) => AccState::AddToSet(Vec::new()),
        }
    }

    fn observe(&mut self, acc: &Accumulator, scope: &Scope) -> Result<()> {
        let expr = match *acc {
            Accumulator::Sum(ref expr)
            | Accumulator::Avg(ref expr)
            | Accumulator::Min(ref expr)
            | Accumulator::Max(ref expr)
            | Accumulator::First(ref expr)
            | Accumulator::Last(ref expr)
            | Accumulator::Push(ref expr)
            | Accumulator::AddToSet(ref expr) => expr,
        };
        let evaluated = expr.eval(scope)?;
        match *self {
            AccState::Sum(ref mut total) => {
                // Non-numeric values are ignored by $sum.
                if let Some(number) = evaluated.as_ref().and_then(value::as_number) {
                    *total = total.add(number);
                }
            }
            AccState::Avg {
                ref mut total,
                ref mut count,
            } => {
                if let Some(number) = evaluated.as_ref().and_then(value::as_number) {
                    *total += number.as_f64();
                    *count += 1;
                }
            }
            AccState::Min(ref mut current) => {
                if let Some(candidate) = non_null(evaluated) {
                    let smaller = current
                        .as_ref()
                        .map_or(true, |held| {
                            value::cmp_values(&candidate, held) == std::cmp::Ordering::Less
                        });
                    if smaller {
                        *current = Some(candidate);
                    }
                }
            }
            AccState::Max(ref mut current) => {
                if let Some(candidate) = non_null(evaluated) {
                    let larger = current
                        .as_ref()
                        .map_or(true, |held| {
                            value::cmp_values(&candidate, held) == std::cmp::Ordering::Greater
                        });
                    if larger {
                        *current = Some(candidate);
                    }
                }
            }
            AccState::FirstUnset => {
                *self = AccState::First(evaluated);
            }
            AccState::First(_) => {}
            AccState::Last(ref mut current) => {
                *current = evaluated;
            }
            AccState::Push(ref mut items) => {
                if let Some(candidate) = evaluated {
                    items.push(candidate);
                }
            }
            AccState::AddToSet(ref mut items) => {
                if let Some(candidate) = evaluated {
                    if !items.iter().any(|held| value::values_equal(held, &candidate)) {
                        items.push(candidate);
                    }
                }
            }
        }
        Ok(())
    }

    fn finalize(self) -> Bson {
        match self {
            AccState::Sum(total) => total.to_bson(),
            AccState::Avg { total, count } => {
                if count == 0 {
                    Bson::Null
                } else {
                    Bson::FloatingPoint(total / count as f64)
                }
            }
            AccState::Min(current) | AccState::Max(current) => current.unwrap_or(Bson::Null),
            AccState::First(value) | AccState::Last(value) => value.unwrap_or(Bson::Null),
            AccState::FirstUnset => Bson::Null,
            AccState::Push(items) | AccState::AddToSet(items) => Bson::Array(items),
        }
    }
}

fn non_null(value: Option<Bson>) -> Option<Bson> {
    match value {
        Some(Bson::Null) | None => None,
        present => present,
    }
}

/// A projection in one of the three modes: inclusion, exclusion, or
/// inclusion with computed fields. `_id` is kept in inclusion mode unless
/// explicitly excluded.
#[derive(Debug, Clone)]
pub struct Projection {
    id_excluded: bool,
    mode: ProjectionMode,
}

#[derive(Debug, Clone)]
enum ProjectionMode {
    /// Nothing listed besides `_id` handling.
    IdOnly,
    Inclusion(Vec<(String, Option<Expr>)>),
    Exclusion(Vec<String>),
}

impl Projection {
    pub fn parse(spec: &Document) -> Result<Projection> {
        let mut id_excluded = false;
        let mut included: Vec<(String, Option<Expr>)> = Vec::new();
        let mut excluded: Vec<String> = Vec::new();
        for (field, setting) in spec.iter() {
            let flag = match *setting {
                Bson::Boolean(b) => Some(b),
                ref other => value::as_number(other).map(|n| n.as_f64() != 0.0),
            };
            if field == "_id" {
                match flag {
                    Some(false) => id_excluded = true,
                    Some(true) => {}
                    None => included.push((field.clone(), Some(Expr::parse(setting)?))),
                }
                continue;
            }
            match flag {
                Some(true) => included.push((field.clone(), None)),
                Some(false) => excluded.push(field.clone()),
                None => included.push((field.clone(), Some(Expr::parse(setting)?))),
            }
        }
        if !included.is_empty() && !excluded.is_empty() {
            return Err(Error::BadQuery(
                "cannot mix inclusion and exclusion in one projection".to_owned(),
            ));
        }
        let mode = if !included.is_empty() {
            ProjectionMode::Inclusion(included)
        } else if !excluded.is_empty() {
            ProjectionMode::Exclusion(excluded)
        } else {
            ProjectionMode::IdOnly
        };
        Ok(Projection {
            id_excluded,
            mode,
        })
    }

    pub fn apply(&self, doc: &Document, env: &FilterEnv) -> Result<Document> {
        let mut out = match self.mode {
            ProjectionMode::IdOnly => doc.clone(),
            ProjectionMode::Exclusion(ref paths) => {
                let mut trimmed = doc.clone();
                for p in paths {
                    exclude_path(&mut trimmed, p);
                }
                trimmed
            }
            ProjectionMode::Inclusion(ref entries) => {
                let mut kept = Document::new();
                if !self.id_excluded {
                    if let Some(id) = doc.get("_id") {
                        kept.insert("_id".to_owned(), id.clone());
                    }
                }
                let tree = IncludeNode::build(
                    entries
                        .iter()
                        .filter(|(_, expr)| expr.is_none())
                        .map(|(p, _)| p.as_str()),
                );
                include_walk(doc, &tree, &mut kept);
                let scope = Scope::new(doc, &env.vars, env.now);
                for (field, expr) in entries {
                    if let Some(expr) = expr {
                        if let Some(computed) = expr.eval(&scope)? {
                            path::set(&mut kept, field, computed)?;
                        }
                    }
                }
                kept
            }
        };
        if self.id_excluded {
            out.remove("_id");
        }
        Ok(out)
    }
}

/// The tree of dotted inclusion paths: `{"a.b": 1, "a.c": 1}` becomes one
/// `a` node with `b` and `c` leaves.
#[derive(Debug, Default)]
struct IncludeNode {
    children: Vec<(String, IncludeNode)>,
    leaf: bool,
}

impl IncludeNode {
    fn build<'a>(paths: impl Iterator<Item = &'a str>) -> IncludeNode {
        let mut root = IncludeNode::default();
        for p in paths {
            let mut node = &mut root;
            for segment in p.split('.') {
                let position = node
                    .children
                    .iter()
                    .position(|(name, _)| name == segment);
                let index = match position {
                    Some(index) => index,
                    None => {
                        node.children
                            .push((segment.to_owned(), IncludeNode::default()));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[index].1;
            }
            node.leaf = true;
        }
        root
    }
}

fn include_walk(src: &Document, node: &IncludeNode, out: &mut Document) {
    for (key, value) in src.iter() {
        let child = match node.children.iter().find(|(name, _)| name == key) {
            Some((_, child)) => child,
            None => continue,
        };
        if child.leaf {
            out.insert(key.clone(), value.clone());
            continue;
        }
        match *value {
            Bson::Document(ref inner) => {
                let mut kept = Document::new();
                include_walk(inner, child, &mut kept);
                out.insert(key.clone(), Bson::Document(kept));
            }
            Bson::Array(ref items) => {
                let mut kept_items = Vec::new();
                for item in items {
                    if let Bson::Document(ref inner) = *item {
                        let mut kept = Document::new();
                        include_walk(inner, child, &mut kept);
                        kept_items.push(Bson::Document(kept));
                    }
                }
                out.insert(key.clone(), Bson::Array(kept_items));
            }
            _ => {}
        }
    }
}

fn exclude_path(doc: &mut Document, p: &str) {
    let segments: Vec<&str> = p.split('.').collect();
    exclude_in_document(doc, &segments);
}

fn exclude_in_document(doc: &mut Document, segments: &[&str]) {
    if segments.len() == 1 {
        doc.remove(segments[0]);
        return;
    }
    match doc.get_mut(segments[0]) {
        Some(&mut Bson::Document(ref mut inner)) => exclude_in_document(inner, &segments[1..]),
        Some(&mut Bson::Array(ref mut items)) => {
            for item in items {
                if let Bson::Document(ref mut inner) = *item {
                    exclude_in_document(inner, &segments[1..]);
                }
            }
        }
        _ => {}
    }
}
