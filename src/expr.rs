//! Aggregation expression trees.
//!
//! Used by `$project`, `$group` accumulators, `$addFields`/`$set`, `$expr`,
//! and `$lookup` `let` bindings. Expressions are parsed eagerly into a typed
//! tree; unknown operator names are rejected at parse time.

use std::collections::HashMap;

use bson::{Bson, Document};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::path;
use crate::value::{self, Number};

/// Evaluation environment: the root document, user variables from `let`
/// frames, and the evaluation-start timestamp exposed as `$$NOW`.
pub struct Scope<'a> {
    pub root: &'a Document,
    pub vars: &'a HashMap<String, Bson>,
    pub now: DateTime<Utc>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a Document, vars: &'a HashMap<String, Bson>, now: DateTime<Utc>) -> Scope<'a> {
        Scope { root, vars, now }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Bson),
    /// A `"$path"` field reference against the current document.
    FieldPath(String),
    /// A `"$$name"` variable reference.
    Variable(String),
    /// A document whose fields are themselves expressions.
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Add(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Cond {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Concat(Vec<Expr>),
    IfNull(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parses an expression operand: a literal, a `"$path"`/`"$$var"`
    /// reference, an array, or an operator/expression document.
    pub fn parse(operand: &Bson) -> Result<Expr> {
        Ok(match *operand {
            Bson::String(ref s) if s.starts_with("$$") => Expr::Variable(s[2..].to_owned()),
            Bson::String(ref s) if s.starts_with('$') => Expr::FieldPath(s[1..].to_owned()),
            Bson::Array(ref items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(Expr::parse(item)?);
                }
                Expr::Array(parsed)
            }
            Bson::Document(ref doc) => Expr::parse_document(doc)?,
            ref literal => Expr::Literal(literal.clone()),
        })
    }

    fn parse_document(doc: &Document) -> Result<Expr> {
        let operator_keyed = doc.keys().next().map_or(false, |key| key.starts_with('$'));
        if !operator_keyed {
            let mut fields = Vec::with_capacity(doc.len());
            for (key, value) in doc.iter() {
                fields.push((key.clone(), Expr::parse(value)?));
            }
            return Ok(Expr::Object(fields));
        }
        if doc.len() != 1 {
            return Err(Error::BadQuery(format!(
                "an expression specification must contain exactly one field: {}",
                doc
            )));
        }
        let (name, operand) = doc.iter().next().unwrap();
        match name.as_str() {
            "$literal" => Ok(Expr::Literal(operand.clone())),
            "$add" => Ok(Expr::Add(Expr::parse_many(operand, "$add")?)),
            "$subtract" => {
                let (lhs, rhs) = Expr::parse_pair(operand, "$subtract")?;
                Ok(Expr::Subtract(Box::new(lhs), Box::new(rhs)))
            }
            "$multiply" => Ok(Expr::Multiply(Expr::parse_many(operand, "$multiply")?)),
            "$divide" => {
                let (lhs, rhs) = Expr::parse_pair(operand, "$divide")?;
                Ok(Expr::Divide(Box::new(lhs), Box::new(rhs)))
            }
            "$eq" => Expr::parse_cmp(operand, "$eq", Expr::Eq),
            "$ne" => Expr::parse_cmp(operand, "$ne", Expr::Ne),
            "$gt" => Expr::parse_cmp(operand, "$gt", Expr::Gt),
            "$gte" => Expr::parse_cmp(operand, "$gte", Expr::Gte),
            "$lt" => Expr::parse_cmp(operand, "$lt", Expr::Lt),
            "$lte" => Expr::parse_cmp(operand, "$lte", Expr::Lte),
            "$and" => Ok(Expr::And(Expr::parse_many(operand, "$and")?)),
            "$or" => Ok(Expr::Or(Expr::parse_many(operand, "$or")?)),
            "$not" => {
                let inner = match *operand {
                    Bson::Array(ref items) if items.len() == 1 => Expr::parse(&items[0])?,
                    ref single => Expr::parse(single)?,
                };
                Ok(Expr::Not(Box::new(inner)))
            }
            "$cond" => Expr::parse_cond(operand),
            "$concat" => Ok(Expr::Concat(Expr::parse_many(operand, "$concat")?)),
            "$ifNull" => {
                let (lhs, rhs) = Expr::parse_pair(operand, "$ifNull")?;
                Ok(Expr::IfNull(Box::new(lhs), Box::new(rhs)))
            }
            unknown => Err(Error::BadQuery(format!(
                "unknown expression operator: {}",
                unknown
            ))),
        }
    }

    fn parse_many(operand: &Bson, _name: &str) -> Result<Vec<Expr>> {
        match *operand {
            Bson::Array(ref items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(Expr::parse(item)?);
                }
                Ok(parsed)
            }
            ref single => Ok(vec![Expr::parse(single)?]),
        }
    }

    fn parse_pair(operand: &Bson, name: &str) -> Result<(Expr, Expr)> {
        match *operand {
            Bson::Array(ref items) if items.len() == 2 => {
                Ok((Expr::parse(&items[0])?, Expr::parse(&items[1])?))
            }
            _ => Err(Error::BadQuery(format!(
                "{} requires an array of exactly two operands",
                name
            ))),
        }
    }

    fn parse_cmp<F>(operand: &Bson, name: &str, build: F) -> Result<Expr>
    where
        F: FnOnce(Box<Expr>, Box<Expr>) -> Expr,
    {
        let (lhs, rhs) = Expr::parse_pair(operand, name)?;
        Ok(build(Box::new(lhs), Box::new(rhs)))
    }

    fn parse_cond(operand: &Bson) -> Result<Expr> {
        match *operand {
            Bson::Array(ref items) if items.len() == 3 => Ok(Expr::Cond {
                condition: Box::new(Expr::parse(&items[0])?),
                then: Box::new(Expr::parse(&items[1])?),
                otherwise: Box::new(Expr::parse(&items[2])?),
            }),
            Bson::Document(ref doc) => {
                let condition = doc
                    .get("if")
                    .ok_or_else(|| Error::BadQuery("$cond is missing 'if'".to_owned()))?;
                let then = doc
                    .get("then")
                    .ok_or_else(|| Error::BadQuery("$cond is missing 'then'".to_owned()))?;
                let otherwise = doc
                    .get("else")
                    .ok_or_else(|| Error::BadQuery("$cond is missing 'else'".to_owned()))?;
                Ok(Expr::Cond {
                    condition: Box::new(Expr::parse(condition)?),
                    then: Box::new(Expr::parse(then)?),
                    otherwise: Box::new(Expr::parse(otherwise)?),
                })
            }
            _ => Err(Error::BadQuery(
                "$cond requires a 3-element array or an {if, then, else} document".to_owned(),
            )),
        }
    }

    /// Evaluates the expression. `None` means "missing": a field path that
    /// resolved to nothing, which callers either omit (projection) or
    /// collapse to null (arithmetic, comparisons).
    pub fn eval(&self, scope: &Scope) -> Result<Option<Bson>> {
        Ok(match *self {
            Expr::Literal(ref value) => Some(value.clone()),
            Expr::FieldPath(ref p) => path::resolve_direct(scope.root, p).cloned(),
            Expr::Variable(ref name) => match name.as_str() {
                "ROOT" => Some(Bson::Document(scope.root.clone())),
                "NOW" => Some(Bson::UtcDatetime(scope.now)),
                other => match scope.vars.get(other) {
                    Some(value) => Some(value.clone()),
                    None => {
                        return Err(Error::BadQuery(format!("undefined variable: $${}", other)));
                    }
                },
            },
            Expr::Object(ref fields) => {
                let mut doc = Document::new();
                for (key, expr) in fields {
                    if let Some(value) = expr.eval(scope)? {
                        doc.insert(key.clone(), value);
                    }
                }
                Some(Bson::Document(doc))
            }
            Expr::Array(ref items) => {
                let mut array = Vec::with_capacity(items.len());
                for item in items {
                    array.push(item.eval(scope)?.unwrap_or(Bson::Null));
                }
                Some(Bson::Array(array))
            }
            Expr::Add(ref operands) => Expr::fold_numeric(operands, scope, "$add", Number::add)?,
            Expr::Multiply(ref operands) => {
                Expr::fold_numeric(operands, scope, "$multiply", Number::mul)?
            }
            Expr::Subtract(ref lhs, ref rhs) => {
                match (Expr::numeric_operand(lhs, scope, "$subtract")?,
                       Expr::numeric_operand(rhs, scope, "$subtract")?) {
                    (Some(a), Some(b)) => Some(a.sub(b).to_bson()),
                    _ => Some(Bson::Null),
                }
            }
            Expr::Divide(ref lhs, ref rhs) => {
                match (Expr::numeric_operand(lhs, scope, "$divide")?,
                       Expr::numeric_operand(rhs, scope, "$divide")?) {
                    (Some(a), Some(b)) => Some(a.div(b)?.to_bson()),
                    _ => Some(Bson::Null),
                }
            }
            Expr::Eq(ref lhs, ref rhs) => Some(Bson::Boolean(Expr::compare(lhs, rhs, scope)? == 0)),
            Expr::Ne(ref lhs, ref rhs) => Some(Bson::Boolean(Expr::compare(lhs, rhs, scope)? != 0)),
            Expr::Gt(ref lhs, ref rhs) => Some(Bson::Boolean(Expr::compare(lhs, rhs, scope)? > 0)),
            Expr::Gte(ref lhs, ref rhs) => Some(Bson::Boolean(Expr::compare(lhs, rhs, scope)? >= 0)),
            Expr::Lt(ref lhs, ref rhs) => Some(Bson::Boolean(Expr::compare(lhs, rhs, scope)? < 0)),
            Expr::Lte(ref lhs, ref rhs) => Some(Bson::Boolean(Expr::compare(lhs, rhs, scope)? <= 0)),
            Expr::And(ref operands) => {
                for operand in operands {
                    let value = operand.eval(scope)?;
                    if !value::is_truthy(value.as_ref()) {
                        return Ok(Some(Bson::Boolean(false)));
                    }
                }
                Some(Bson::Boolean(true))
            }
            Expr::Or(ref operands) => {
                for operand in operands {
                    let value = operand.eval(scope)?;
                    if value::is_truthy(value.as_ref()) {
                        return Ok(Some(Bson::Boolean(true)));
                    }
                }
                Some(Bson::Boolean(false))
            }
            Expr::Not(ref operand) => {
                let value = operand.eval(scope)?;
                Some(Bson::Boolean(!value::is_truthy(value.as_ref())))
            }
            Expr::Cond {
                ref condition,
                ref then,
                ref otherwise,
            } => {
                let chosen = if value::is_truthy(condition.eval(scope)?.as_ref()) {
                    then
                } else {
                    otherwise
                };
                return chosen.eval(scope);
            }
            Expr::Concat(ref operands) => {
                let mut joined = String::new();
                for operand in operands {
                    match operand.eval(scope)? {
                        Some(Bson::String(part)) => joined.push_str(&part),
                        Some(Bson::Null) | None => return Ok(Some(Bson::Null)),
                        Some(other) => {
                            return Err(Error::BadQuery(format!(
                                "$concat only supports strings, not {:?}",
                                other
                            )));
                        }
                    }
                }
                Some(Bson::String(joined))
            }
            Expr::IfNull(ref lhs, ref rhs) => match lhs.eval(scope)? {
                Some(Bson::Null) | None => return rhs.eval(scope),
                present => present,
            },
        })
    }

    /// Evaluates to a boolean under aggregation truthiness, as `$expr` does.
    pub fn eval_truthy(&self, scope: &Scope) -> Result<bool> {
        let value = self.eval(scope)?;
        Ok(value::is_truthy(value.as_ref()))
    }

    fn numeric_operand(expr: &Expr, scope: &Scope, name: &str) -> Result<Option<Number>> {
        match expr.eval(scope)? {
            None | Some(Bson::Null) => Ok(None),
            Some(ref value) => match value::as_number(value) {
                Some(number) => Ok(Some(number)),
                None => Err(Error::BadQuery(format!(
                    "{} only supports numeric types, not {:?}",
                    name, value
                ))),
            },
        }
    }

    fn fold_numeric<F>(
        operands: &[Expr],
        scope: &Scope,
        name: &str,
        combine: F,
    ) -> Result<Option<Bson>>
    where
        F: Fn(Number, Number) -> Number,
    {
        let mut accumulated: Option<Number> = None;
        for operand in operands {
            let number = match Expr::numeric_operand(operand, scope, name)? {
                Some(number) => number,
                // A missing or null operand nulls the whole computation.
                None => return Ok(Some(Bson::Null)),
            };
            accumulated = Some(match accumulated {
                Some(so_far) => combine(so_far, number),
                None => number,
            });
        }
        Ok(Some(accumulated.map_or(Bson::Null, Number::to_bson)))
    }

    /// Three-way comparison under the value model, with missing treated as
    /// null so `$eq: ["$absent", null]` holds.
    fn compare(lhs: &Expr, rhs: &Expr, scope: &Scope) -> Result<i32> {
        let a = lhs.eval(scope)?.unwrap_or(Bson::Null);
        let b = rhs.eval(scope)?.unwrap_or(Bson::Null);
        Ok(match value::cmp_values(&a, &b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        })
    }
}
