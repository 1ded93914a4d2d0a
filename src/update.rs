//! The update-document interpreter.
//!
//! An update document is parsed into an `UpdateSpec` and applied to one
//! document at a time, producing a fresh document. Application order is
//! fixed regardless of the order operators appear in: `$rename` first, then
//! `$min`, `$max`, `$inc`, `$mul`, `$set`, `$unset`, then the array
//! operators. An update either applies completely or leaves the document
//! untouched.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterEnv};
use crate::path;
use crate::value;

#[derive(Debug, Clone)]
pub struct UpdateSpec {
    renames: Vec<(String, String)>,
    mins: Vec<(String, Bson)>,
    maxs: Vec<(String, Bson)>,
    incs: Vec<(String, Bson)>,
    muls: Vec<(String, Bson)>,
    sets: Vec<(String, Bson)>,
    unsets: Vec<String>,
    pushes: Vec<(String, Vec<Bson>)>,
    add_to_sets: Vec<(String, Vec<Bson>)>,
    pulls: Vec<(String, PullCriterion)>,
    pops: Vec<(String, i64)>,
}

#[derive(Debug, Clone)]
enum PullCriterion {
    /// Remove elements deep-equal to the value.
    Equals(Bson),
    /// Remove elements matching the condition document.
    Matches(Filter),
    /// `{$pull: {arr: {$gt: 3}}}`: operators applied to the element itself.
    ElementConditions(Filter),
}

impl UpdateSpec {
    /// Whether the update document contains any `$`-operator keys. A plain
    /// document is a replacement, not an operator update.
    pub fn is_operator_document(doc: &Document) -> bool {
        doc.keys().any(|key| key.starts_with('$'))
    }

    pub fn parse(update: &Document) -> Result<UpdateSpec> {
        let mut spec = UpdateSpec {
            renames: Vec::new(),
            mins: Vec::new(),
            maxs: Vec::new(),
            incs: Vec::new(),
            muls: Vec::new(),
            sets: Vec::new(),
            unsets: Vec::new(),
            pushes: Vec::new(),
            add_to_sets: Vec::new(),
            pulls: Vec::new(),
            pops: Vec::new(),
        };
        for (operator, operand) in update.iter() {
            if !operator.starts_with('$') {
                return Err(Error::BadUpdate(format!(
                    "unexpected plain field '{}' in an operator update",
                    operator
                )));
            }
            let entries = match *operand {
                Bson::Document(ref entries) => entries,
                _ => {
                    return Err(Error::BadUpdate(format!(
                        "the {} operator requires a document operand",
                        operator
                    )));
                }
            };
            for (field, argument) in entries.iter() {
                guard_id(field)?;
                match operator.as_str() {
                    "$set" => spec.sets.push((field.clone(), argument.clone())),
                    "$unset" => spec.unsets.push(field.clone()),
                    "$inc" => {
                        require_numeric_argument(operator, argument)?;
                        spec.incs.push((field.clone(), argument.clone()));
                    }
                    "$mul" => {
                        require_numeric_argument(operator, argument)?;
                        spec.muls.push((field.clone(), argument.clone()));
                    }
                    "$min" => spec.mins.push((field.clone(), argument.clone())),
                    "$max" => spec.maxs.push((field.clone(), argument.clone())),
                    "$rename" => {
                        let target = match *argument {
                            Bson::String(ref target) => target.clone(),
                            _ => {
                                return Err(Error::BadUpdate(
                                    "$rename target must be a string path".to_owned(),
                                ));
                            }
                        };
                        guard_id(&target)?;
                        spec.renames.push((field.clone(), target));
                    }
                    "$push" => spec.pushes.push((field.clone(), parse_each(argument)?)),
                    "$addToSet" => {
                        spec.add_to_sets.push((field.clone(), parse_each(argument)?));
                    }
                    "$pull" => spec.pulls.push((field.clone(), parse_pull(argument)?)),
                    "$pop" => match value::as_number(argument) {
                        Some(value::Number::Int(1)) => spec.pops.push((field.clone(), 1)),
                        Some(value::Number::Int(-1)) => spec.pops.push((field.clone(), -1)),
                        _ => {
                            return Err(Error::BadUpdate(
                                "$pop expects 1 or -1".to_owned(),
                            ));
                        }
                    },
                    unknown => {
                        return Err(Error::BadUpdate(format!(
                            "unknown update operator: {}",
                            unknown
                        )));
                    }
                }
            }
        }
        spec.check_conflicts()?;
        Ok(spec)
    }

    fn touched_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        for (source, target) in &self.renames {
            paths.push(source);
            paths.push(target);
        }
        for (p, _) in self
            .mins
            .iter()
            .chain(&self.maxs)
            .chain(&self.incs)
            .chain(&self.muls)
            .chain(&self.sets)
        {
            paths.push(p);
        }
        paths.extend(self.unsets.iter().map(String::as_str));
        for (p, _) in &self.pushes {
            paths.push(p);
        }
        for (p, _) in &self.add_to_sets {
            paths.push(p);
        }
        for (p, _) in &self.pulls {
            paths.push(p);
        }
        for (p, _) in &self.pops {
            paths.push(p);
        }
        paths
    }

    fn check_conflicts(&self) -> Result<()> {
        let paths = self.touched_paths();
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                if path::paths_conflict(a, b) {
                    return Err(Error::BadUpdate(format!(
                        "updating the path '{}' would create a conflict at '{}'",
                        b, a
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies the update to a copy of `doc`, returning the new document
    /// and whether its content actually changed.
    pub fn apply(&self, doc: &Document) -> Result<(Document, bool)> {
        let mut updated = doc.clone();

        for (source, target) in &self.renames {
            if let Some(moved) = path::unset(&mut updated, source) {
                path::set(&mut updated, target, moved)?;
            }
        }
        for (field, operand) in &self.mins {
            let replace = match path::resolve_direct(&updated, field) {
                Some(existing) => value::cmp_values(operand, existing) == Ordering::Less,
                None => true,
            };
            if replace {
                path::set(&mut updated, field, operand.clone())?;
            }
        }
        for (field, operand) in &self.maxs {
            let replace = match path::resolve_direct(&updated, field) {
                Some(existing) => value::cmp_values(operand, existing) == Ordering::Greater,
                None => true,
            };
            if replace {
                path::set(&mut updated, field, operand.clone())?;
            }
        }
        for (field, operand) in &self.incs {
            let amount = value::as_number(operand).unwrap();
            let next = match path::resolve_direct(&updated, field) {
                Some(existing) => match value::as_number(existing) {
                    Some(current) => current.add(amount),
                    None => {
                        return Err(Error::TypeMismatch(format!(
                            "cannot apply $inc to the non-numeric field '{}'",
                            field
                        )));
                    }
                },
                None => amount,
            };
            path::set(&mut updated, field, next.to_bson())?;
        }
        for (field, operand) in &self.muls {
            let factor = value::as_number(operand).unwrap();
            let next = match path::resolve_direct(&updated, field) {
                Some(existing) => match value::as_number(existing) {
                    Some(current) => current.mul(factor),
                    None => {
                        return Err(Error::TypeMismatch(format!(
                            "cannot apply $mul to the non-numeric field '{}'",
                            field
                        )));
                    }
                },
                // An absent field materialises as zero of the operand's tag.
                None => factor.zero(),
            };
            path::set(&mut updated, field, next.to_bson())?;
        }
        for (field, operand) in &self.sets {
            path::set(&mut updated, field, operand.clone())?;
        }
        for field in &self.unsets {
            path::unset(&mut updated, field);
        }
        for (field, values) in &self.pushes {
            let mut items = take_array(&mut updated, field, "$push")?;
            items.extend(values.iter().cloned());
            path::set(&mut updated, field, Bson::Array(items))?;
        }
        for (field, values) in &self.add_to_sets {
            let mut items = take_array(&mut updated, field, "$addToSet")?;
            for value in values {
                if !items.iter().any(|existing| value::values_equal(existing, value)) {
                    items.push(value.clone());
                }
            }
            path::set(&mut updated, field, Bson::Array(items))?;
        }
        for (field, criterion) in &self.pulls {
            let mut items = take_array(&mut updated, field, "$pull")?;
            let env = FilterEnv::new();
            let mut kept = Vec::with_capacity(items.len());
            for element in items.drain(..) {
                if !pull_matches(criterion, &element, &env)? {
                    kept.push(element);
                }
            }
            path::set(&mut updated, field, Bson::Array(kept))?;
        }
        for (field, direction) in &self.pops {
            let mut items = take_array(&mut updated, field, "$pop")?;
            if !items.is_empty() {
                if *direction == 1 {
                    items.pop();
                } else {
                    items.remove(0);
                }
            }
            path::set(&mut updated, field, Bson::Array(items))?;
        }

        let modified = updated != *doc;
        Ok((updated, modified))
    }
}

fn guard_id(field: &str) -> Result<()> {
    if field == "_id" || field.starts_with("_id.") {
        return Err(Error::BadUpdate(
            "the _id field cannot be changed by an update".to_owned(),
        ));
    }
    Ok(())
}

fn require_numeric_argument(operator: &str, argument: &Bson) -> Result<()> {
    if value::as_number(argument).is_none() {
        return Err(Error::TypeMismatch(format!(
            "{} requires a numeric argument",
            operator
        )));
    }
    Ok(())
}

/// Expands a `$push`/`$addToSet` operand: `{$each: [..]}` appends several
/// values, anything else appends the operand itself.
fn parse_each(argument: &Bson) -> Result<Vec<Bson>> {
    if let Bson::Document(ref doc) = *argument {
        if let Some(each) = doc.get("$each") {
            if doc.len() != 1 {
                return Err(Error::BadUpdate(
                    "unexpected modifiers alongside $each".to_owned(),
                ));
            }
            return match *each {
                Bson::Array(ref items) => Ok(items.clone()),
                _ => Err(Error::BadUpdate("$each must be an array".to_owned())),
            };
        }
        if doc.keys().any(|key| key.starts_with('$')) {
            return Err(Error::BadUpdate(
                "unknown modifier in a $push/$addToSet operand".to_owned(),
            ));
        }
    }
    Ok(vec![argument.clone()])
}

fn parse_pull(argument: &Bson) -> Result<PullCriterion> {
    if let Bson::Document(ref doc) = *argument {
        let operator_keyed = doc.keys().next().map_or(false, |key| key.starts_with('$'));
        if operator_keyed {
            // Wrap the operators under a synthetic path so the element can
            // be matched as the value of that path.
            let wrapped = {
                let mut outer = Document::new();
                outer.insert("element".to_owned(), argument.clone());
                outer
            };
            return Ok(PullCriterion::ElementConditions(Filter::parse(&wrapped)?));
        }
        return Ok(PullCriterion::Matches(Filter::parse(doc)?));
    }
    Ok(PullCriterion::Equals(argument.clone()))
}

fn pull_matches(criterion: &PullCriterion, element: &Bson, env: &FilterEnv) -> Result<bool> {
    match *criterion {
        PullCriterion::Equals(ref wanted) => Ok(value::values_equal(element, wanted)),
        PullCriterion::Matches(ref filter) => match *element {
            Bson::Document(ref doc) => filter.matches(doc, env),
            _ => Ok(false),
        },
        PullCriterion::ElementConditions(ref filter) => {
            let mut holder = Document::new();
            holder.insert("element".to_owned(), element.clone());
            filter.matches(&holder, env)
        }
    }
}

fn take_array(doc: &mut Document, field: &str, operator: &str) -> Result<Vec<Bson>> {
    match path::resolve_direct(doc, field) {
        Some(&Bson::Array(ref items)) => Ok(items.clone()),
        Some(_) => Err(Error::TypeMismatch(format!(
            "cannot apply {} to the non-array field '{}'",
            operator, field
        ))),
        None => Ok(Vec::new()),
    }
}

/// Validates a replacement document: no operator keys, and `_id` (when
/// present) must agree with the stored document's.
pub fn validate_replacement(replacement: &Document, existing_id: Option<&Bson>) -> Result<()> {
    if let Some(key) = replacement.keys().find(|key| key.starts_with('$')) {
        return Err(Error::BadUpdate(format!(
            "a replacement document cannot contain the update operator {}",
            key
        )));
    }
    if let (Some(new_id), Some(old_id)) = (replacement.get("_id"), existing_id) {
        if !value::values_equal(new_id, old_id) {
            return Err(Error::BadUpdate(
                "the _id field is immutable and cannot be replaced".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Builds the replacement image actually stored: the original `_id` first,
/// followed by every replacement field except `_id`.
pub fn replacement_image(replacement: &Document, id: Bson) -> Document {
    let mut image = Document::new();
    image.insert("_id".to_owned(), id);
    for (key, value) in replacement.iter() {
        if key != "_id" {
            image.insert(key.clone(), value.clone());
        }
    }
    image
}

/// Synthesises the document inserted by an upsert: the filter's equality
/// keys seeded first, then the update applied on top.
pub fn upsert_seed(filter: &Document, spec: &UpdateSpec) -> Result<Document> {
    let mut seed = Document::new();
    collect_equalities(filter, &mut seed)?;
    let (synthesised, _) = spec.apply(&seed)?;
    Ok(synthesised)
}

/// Extracts `{field: value}` and `{field: {$eq: value}}` pairs from a
/// filter document, recursing into `$and`.
pub fn collect_equalities(filter: &Document, seed: &mut Document) -> Result<()> {
    for (key, operand) in filter.iter() {
        if key == "$and" {
            if let Bson::Array(ref clauses) = *operand {
                for clause in clauses {
                    if let Bson::Document(ref inner) = *clause {
                        collect_equalities(inner, seed)?;
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        match *operand {
            Bson::Document(ref doc)
                if doc.keys().next().map_or(false, |inner| inner.starts_with('$')) =>
            {
                if let Some(wanted) = doc.get("$eq") {
                    path::set(seed, key, wanted.clone())?;
                }
            }
            Bson::RegExp(..) => {}
            ref plain => path::set(seed, key, plain.clone())?,
        }
    }
    Ok(())
}
