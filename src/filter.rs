//! Filter documents compiled into a typed operator tree.
//!
//! Parsing rejects unknown operators eagerly, so evaluation never has to
//! re-validate a node. Evaluation implements the array-implicit broadcast
//! rule: a leaf comparison against an array field matches if the array
//! itself or any of its elements would match, except inside `$elemMatch`
//! where every condition applies to one element.

use std::collections::HashMap;

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::expr::{Expr, Scope};
use crate::path;
use crate::value;

/// Per-operation evaluation environment shared with `$expr`: `let`
/// variables and the operation-start timestamp for `$$NOW`.
pub struct FilterEnv {
    pub vars: HashMap<String, Bson>,
    pub now: DateTime<Utc>,
}

impl FilterEnv {
    pub fn new() -> FilterEnv {
        FilterEnv {
            vars: HashMap::new(),
            now: Utc::now(),
        }
    }

    pub fn with_vars(vars: HashMap<String, Bson>, now: DateTime<Utc>) -> FilterEnv {
        FilterEnv { vars, now }
    }
}

impl Default for FilterEnv {
    fn default() -> FilterEnv {
        FilterEnv::new()
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Expr(Expr),
    Field(FieldFilter),
}

#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub path: String,
    conds: Vec<Cond>,
}

#[derive(Debug, Clone)]
enum Cond {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>, Vec<Regex>),
    Nin(Vec<Bson>, Vec<Regex>),
    Exists(bool),
    Type(String),
    All(Vec<Bson>),
    Size(i64),
    ElemMatch(ElemMatch),
    Regex(Regex),
    Mod { divisor: i64, remainder: i64 },
    Not(Vec<Cond>),
}

#[derive(Debug, Clone)]
enum ElemMatch {
    /// `{$elemMatch: {$gt: 5, $lt: 9}}`: conditions on the element value.
    Conditions(Vec<Cond>),
    /// `{$elemMatch: {x: 1, y: 2}}`: a sub-filter on a document element.
    Document(Box<Filter>),
}

impl Filter {
    /// Compiles a filter document. An empty document matches everything.
    pub fn parse(doc: &Document) -> Result<Filter> {
        let mut children = Vec::new();
        for (key, operand) in doc.iter() {
            match key.as_str() {
                "$and" => children.push(Filter::And(Filter::parse_clauses(operand, "$and")?)),
                "$or" => children.push(Filter::Or(Filter::parse_clauses(operand, "$or")?)),
                "$nor" => children.push(Filter::Nor(Filter::parse_clauses(operand, "$nor")?)),
                "$expr" => children.push(Filter::Expr(Expr::parse(operand)?)),
                "$comment" => {}
                other if other.starts_with('$') => {
                    return Err(Error::BadQuery(format!(
                        "unknown top level operator: {}",
                        other
                    )));
                }
                field => children.push(Filter::Field(FieldFilter {
                    path: field.to_owned(),
                    conds: parse_field_conds(operand)?,
                })),
            }
        }
        Ok(Filter::And(children))
    }

    fn parse_clauses(operand: &Bson, name: &str) -> Result<Vec<Filter>> {
        let items = match *operand {
            Bson::Array(ref items) if !items.is_empty() => items,
            _ => {
                return Err(Error::BadQuery(format!(
                    "{} must be a nonempty array",
                    name
                )));
            }
        };
        let mut clauses = Vec::with_capacity(items.len());
        for item in items {
            match *item {
                Bson::Document(ref doc) => clauses.push(Filter::parse(doc)?),
                _ => {
                    return Err(Error::BadQuery(format!(
                        "{} entries must be documents",
                        name
                    )));
                }
            }
        }
        Ok(clauses)
    }

    /// Evaluates the filter against a single document.
    pub fn matches(&self, doc: &Document, env: &FilterEnv) -> Result<bool> {
        Ok(match *self {
            Filter::And(ref children) => {
                for child in children {
                    if !child.matches(doc, env)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Or(ref children) => {
                for child in children {
                    if child.matches(doc, env)? {
                        return Ok(true);
                    }
                }
                false
            }
            Filter::Nor(ref children) => {
                for child in children {
                    if child.matches(doc, env)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Expr(ref expr) => {
                let scope = Scope::new(doc, &env.vars, env.now);
                expr.eval_truthy(&scope)?
            }
            Filter::Field(ref field) => {
                let resolved = path::resolve(doc, &field.path);
                for cond in &field.conds {
                    if !eval_cond(cond, &resolved, env)? {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    /// Top-level equality conjuncts `(path, scalar)` usable as a storage
    /// prefilter. Only scalar operands are reported; null is excluded
    /// because it also matches missing fields, which the store cannot see.
    pub(crate) fn pushdown_equalities(&self) -> Vec<(&str, &Bson)> {
        let mut out = Vec::new();
        self.collect_equalities(&mut out);
        out
    }

    fn collect_equalities<'a>(&'a self, out: &mut Vec<(&'a str, &'a Bson)>) {
        match *self {
            Filter::And(ref children) => {
                for child in children {
                    child.collect_equalities(out);
                }
            }
            Filter::Field(ref field) => {
                if let [Cond::Eq(ref operand)] = field.conds[..] {
                    if is_pushable_scalar(operand) {
                        out.push((&field.path, operand));
                    }
                }
            }
            _ => {}
        }
    }

    /// True when the whole filter consists of the pushdown equalities, so a
    /// prefilter that enforces them all leaves no residual work.
    pub(crate) fn is_only_equalities(&self) -> bool {
        match *self {
            Filter::And(ref children) => children.iter().all(Filter::is_only_equalities),
            Filter::Field(ref field) => match field.conds[..] {
                [Cond::Eq(ref operand)] => is_pushable_scalar(operand),
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_pushable_scalar(value: &Bson) -> bool {
    matches!(
        *value,
        Bson::String(_)
            | Bson::I32(_)
            | Bson::I64(_)
            | Bson::FloatingPoint(_)
            | Bson::Boolean(_)
            | Bson::ObjectId(_)
    )
}

fn parse_field_conds(operand: &Bson) -> Result<Vec<Cond>> {
    match *operand {
        Bson::RegExp(ref pattern, ref options) => {
            Ok(vec![Cond::Regex(compile_regex(pattern, options)?)])
        }
        Bson::Document(ref doc)
            if doc.keys().next().map_or(false, |key| key.starts_with('$')) =>
        {
            parse_operator_doc(doc)
        }
        ref literal => Ok(vec![Cond::Eq(literal.clone())]),
    }
}

fn parse_operator_doc(doc: &Document) -> Result<Vec<Cond>> {
    let mut conds = Vec::with_capacity(doc.len());
    // $options modifies the $regex entry of the same operator document.
    let options = match doc.get("$options") {
        Some(&Bson::String(ref options)) => options.clone(),
        Some(_) => return Err(Error::BadQuery("$options must be a string".to_owned())),
        None => String::new(),
    };
    for (key, operand) in doc.iter() {
        match key.as_str() {
            "$eq" => conds.push(Cond::Eq(operand.clone())),
            "$ne" => conds.push(Cond::Ne(operand.clone())),
            "$gt" => conds.push(Cond::Gt(operand.clone())),
            "$gte" => conds.push(Cond::Gte(operand.clone())),
            "$lt" => conds.push(Cond::Lt(operand.clone())),
            "$lte" => conds.push(Cond::Lte(operand.clone())),
            "$in" => {
                let (values, regexes) = parse_value_list(operand, "$in")?;
                conds.push(Cond::In(values, regexes));
            }
            "$nin" => {
                let (values, regexes) = parse_value_list(operand, "$nin")?;
                conds.push(Cond::Nin(values, regexes));
            }
            "$exists" => conds.push(Cond::Exists(value::is_truthy(Some(operand)))),
            "$type" => match *operand {
                Bson::String(ref name) => {
                    // Validate the alias eagerly.
                    value::matches_type(name, &Bson::Null)?;
                    conds.push(Cond::Type(name.clone()));
                }
                _ => return Err(Error::BadQuery("$type must be a string alias".to_owned())),
            },
            "$all" => match *operand {
                Bson::Array(ref items) => conds.push(Cond::All(items.clone())),
                _ => return Err(Error::BadQuery("$all must be an array".to_owned())),
            },
            "$size" => match value::as_number(operand) {
                Some(value::Number::Int(n)) if n >= 0 => conds.push(Cond::Size(n)),
                _ => {
                    return Err(Error::BadQuery(
                        "$size must be a non-negative integer".to_owned(),
                    ));
                }
            },
            "$elemMatch" => match *operand {
                Bson::Document(ref inner) => conds.push(Cond::ElemMatch(parse_elem_match(inner)?)),
                _ => return Err(Error::BadQuery("$elemMatch must be a document".to_owned())),
            },
            "$regex" => {
                let pattern = match *operand {
                    Bson::String(ref pattern) => pattern.clone(),
                    Bson::RegExp(ref pattern, _) => pattern.clone(),
                    _ => return Err(Error::BadQuery("$regex must be a string".to_owned())),
                };
                conds.push(Cond::Regex(compile_regex(&pattern, &options)?));
            }
            "$options" => {}
            "$mod" => conds.push(parse_mod(operand)?),
            "$not" => {
                let inner = match *operand {
                    Bson::Document(ref inner)
                        if inner.keys().next().map_or(false, |key| key.starts_with('$')) =>
                    {
                        parse_operator_doc(inner)?
                    }
                    Bson::RegExp(ref pattern, ref opts) => {
                        vec![Cond::Regex(compile_regex(pattern, opts)?)]
                    }
                    _ => {
                        return Err(Error::BadQuery(
                            "$not needs a regex or an operator document".to_owned(),
                        ));
                    }
                };
                conds.push(Cond::Not(inner));
            }
            other if other.starts_with('$') => {
                return Err(Error::BadQuery(format!("unknown operator: {}", other)));
            }
            _ => {
                return Err(Error::BadQuery(
                    "cannot mix operators and plain fields in a condition".to_owned(),
                ));
            }
        }
    }
    Ok(conds)
}

fn parse_value_list(operand: &Bson, name: &str) -> Result<(Vec<Bson>, Vec<Regex>)> {
    let items = match *operand {
        Bson::Array(ref items) => items,
        _ => return Err(Error::BadQuery(format!("{} must be an array", name))),
    };
    let mut values = Vec::new();
    let mut regexes = Vec::new();
    for item in items {
        match *item {
            Bson::RegExp(ref pattern, ref options) => {
                regexes.push(compile_regex(pattern, options)?);
            }
            ref plain => values.push(plain.clone()),
        }
    }
    Ok((values, regexes))
}

fn parse_elem_match(doc: &Document) -> Result<ElemMatch> {
    let operator_keyed = doc.keys().next().map_or(false, |key| key.starts_with('$'));
    if operator_keyed {
        Ok(ElemMatch::Conditions(parse_operator_doc(doc)?))
    } else {
        Ok(ElemMatch::Document(Box::new(Filter::parse(doc)?)))
    }
}

fn parse_mod(operand: &Bson) -> Result<Cond> {
    let items = match *operand {
        Bson::Array(ref items) if items.len() == 2 => items,
        _ => {
            return Err(Error::BadQuery(
                "$mod must be an array of [divisor, remainder]".to_owned(),
            ));
        }
    };
    let divisor = value::as_number(&items[0])
        .map(|n| n.as_f64() as i64)
        .ok_or_else(|| Error::BadQuery("$mod divisor must be numeric".to_owned()))?;
    let remainder = value::as_number(&items[1])
        .map(|n| n.as_f64() as i64)
        .ok_or_else(|| Error::BadQuery("$mod remainder must be numeric".to_owned()))?;
    if divisor == 0 {
        return Err(Error::BadQuery("$mod divisor cannot be 0".to_owned()));
    }
    Ok(Cond::Mod { divisor, remainder })
}

fn compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(Error::BadQuery(format!("invalid $regex option: {}", other)));
            }
        };
    }
    builder
        .build()
        .map_err(|err| Error::BadQuery(format!("invalid $regex pattern: {}", err)))
}

/// The resolved values plus one level of array elements: the candidate set
/// a leaf comparison is checked against.
fn candidates<'a>(resolved: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::with_capacity(resolved.len());
    for value in resolved {
        out.push(*value);
        if let Bson::Array(ref items) = **value {
            out.extend(items.iter());
        }
    }
    out
}

fn eval_cond(cond: &Cond, resolved: &[&Bson], env: &FilterEnv) -> Result<bool> {
    let matched = match *cond {
        Cond::Eq(ref operand) => eval_eq(operand, resolved),
        Cond::Ne(ref operand) => !eval_eq(operand, resolved),
        Cond::Gt(ref operand) => eval_ordered(operand, resolved, |ord| ord > 0),
        Cond::Gte(ref operand) => eval_ordered(operand, resolved, |ord| ord >= 0),
        Cond::Lt(ref operand) => eval_ordered(operand, resolved, |ord| ord < 0),
        Cond::Lte(ref operand) => eval_ordered(operand, resolved, |ord| ord <= 0),
        Cond::In(ref values, ref regexes) => eval_in(values, regexes, resolved),
        Cond::Nin(ref values, ref regexes) => !eval_in(values, regexes, resolved),
        Cond::Exists(wanted) => !resolved.is_empty() == wanted,
        Cond::Type(ref name) => {
            let mut found = false;
            for candidate in candidates(resolved) {
                if value::matches_type(name, candidate)? {
                    found = true;
                    break;
                }
            }
            found
        }
        Cond::All(ref required) => {
            if required.is_empty() {
                return Ok(false);
            }
            required.iter().all(|wanted| eval_eq(wanted, resolved))
        }
        Cond::Size(wanted) => resolved.iter().any(|value| match **value {
            Bson::Array(ref items) => items.len() as i64 == wanted,
            _ => false,
        }),
        Cond::ElemMatch(ref inner) => {
            for value in resolved {
                if let Bson::Array(ref items) = **value {
                    for element in items {
                        if elem_matches(inner, element, env)? {
                            return Ok(true);
                        }
                    }
                }
            }
            false
        }
        Cond::Regex(ref regex) => candidates(resolved).iter().any(|candidate| match **candidate {
            Bson::String(ref s) => regex.is_match(s),
            _ => false,
        }),
        Cond::Mod { divisor, remainder } => {
            candidates(resolved).iter().any(|candidate| {
                value::as_number(candidate)
                    .map(|n| (n.as_f64() as i64) % divisor == remainder)
                    .unwrap_or(false)
            })
        }
        Cond::Not(ref inner) => {
            for cond in inner {
                if !eval_cond(cond, resolved, env)? {
                    return Ok(true);
                }
            }
            false
        }
    };
    Ok(matched)
}

fn eval_eq(operand: &Bson, resolved: &[&Bson]) -> bool {
    // Null equality also covers the missing field.
    if matches!(*operand, Bson::Null) && resolved.is_empty() {
        return true;
    }
    candidates(resolved)
        .iter()
        .any(|candidate| value::values_equal(candidate, operand))
}

fn eval_ordered<F>(operand: &Bson, resolved: &[&Bson], accept: F) -> bool
where
    F: Fn(i32) -> bool,
{
    // Comparisons are type-bracketed: only candidates sharing the
    // operand's type rank participate. A null operand treats a missing
    // field as null.
    let operand_rank = value::type_rank(operand);
    if matches!(*operand, Bson::Null) && resolved.is_empty() {
        return accept(0);
    }
    candidates(resolved).iter().any(|candidate| {
        if value::type_rank(candidate) != operand_rank {
            return false;
        }
        let ord = match value::cmp_values(candidate, operand) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
        accept(ord)
    })
}

fn eval_in(values: &[Bson], regexes: &[Regex], resolved: &[&Bson]) -> bool {
    if values.iter().any(|wanted| eval_eq(wanted, resolved)) {
        return true;
    }
    candidates(resolved).iter().any(|candidate| match **candidate {
        Bson::String(ref s) => regexes.iter().any(|regex| regex.is_match(s)),
        _ => false,
    })
}

fn elem_matches(inner: &ElemMatch, element: &Bson, env: &FilterEnv) -> Result<bool> {
    match *inner {
        ElemMatch::Conditions(ref conds) => {
            // All conditions bind to this one element.
            let single = [element];
            for cond in conds {
                if !eval_cond(cond, &single, env)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        ElemMatch::Document(ref filter) => match *element {
            Bson::Document(ref doc) => filter.matches(doc, env),
            _ => Ok(false),
        },
    }
}
