//! Conversion between the document value model and the stored JSON payload.
//!
//! Non-JSON types round-trip through extended forms: `{"$oid": hex}`,
//! `{"$date": millis}`, `{"$binary": hex}`, `{"$timestamp": n}`, and
//! `{"$regex": {...}}`. Integer-valued JSON numbers decode as int64 and all
//! other numbers as doubles, so the numeric coercion at the storage
//! boundary is the same in both directions.

use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Bson, Document};
use chrono::offset::TimeZone;
use chrono::Utc;
use serde_json::map::Map;
use serde_json::{Number as JsonNumber, Value};

use crate::error::{Error, Result};

pub fn bson_to_json(value: &Bson) -> Value {
    match *value {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::I32(i) => Value::Number(JsonNumber::from(i)),
        Bson::I64(i) => Value::Number(JsonNumber::from(i)),
        Bson::FloatingPoint(f) => match JsonNumber::from_f64(f) {
            Some(number) => Value::Number(number),
            // NaN and infinities have no JSON literal.
            None => wrap("$numberDouble", Value::String(format!("{}", f))),
        },
        Bson::String(ref s) | Bson::Symbol(ref s) => Value::String(s.clone()),
        Bson::Array(ref items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(ref doc) => document_to_json(doc),
        Bson::ObjectId(ref oid) => wrap("$oid", Value::String(oid.to_hex())),
        Bson::UtcDatetime(ref when) => wrap(
            "$date",
            Value::Number(JsonNumber::from(when.timestamp_millis())),
        ),
        Bson::TimeStamp(t) => wrap("$timestamp", Value::Number(JsonNumber::from(t))),
        Bson::Binary(_, ref bytes) => wrap("$binary", Value::String(hex::encode(bytes))),
        Bson::RegExp(ref pattern, ref options) => {
            let mut inner = Map::new();
            inner.insert("pattern".to_owned(), Value::String(pattern.clone()));
            inner.insert("options".to_owned(), Value::String(options.clone()));
            wrap("$regex", Value::Object(inner))
        }
        Bson::JavaScriptCode(ref code) => Value::String(code.clone()),
        Bson::JavaScriptCodeWithScope(ref code, _) => Value::String(code.clone()),
    }
}

fn wrap(key: &str, inner: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_owned(), inner);
    Value::Object(map)
}

pub fn document_to_json(doc: &Document) -> Value {
    let mut map = Map::new();
    for (key, value) in doc.iter() {
        map.insert(key.clone(), bson_to_json(value));
    }
    Value::Object(map)
}

pub fn json_to_bson(value: &Value) -> Result<Bson> {
    Ok(match *value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(b),
        Value::Number(ref number) => {
            if let Some(i) = number.as_i64() {
                Bson::I64(i)
            } else {
                Bson::FloatingPoint(number.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(ref s) => Bson::String(s.clone()),
        Value::Array(ref items) => {
            let mut array = Vec::with_capacity(items.len());
            for item in items {
                array.push(json_to_bson(item)?);
            }
            Bson::Array(array)
        }
        Value::Object(ref map) => {
            if let Some(special) = decode_extended(map)? {
                special
            } else {
                Bson::Document(json_to_document(map)?)
            }
        }
    })
}

fn decode_extended(map: &Map<String, Value>) -> Result<Option<Bson>> {
    if map.len() != 1 {
        return Ok(None);
    }
    let (key, inner) = map.iter().next().unwrap();
    let special = match (key.as_str(), inner) {
        ("$oid", &Value::String(ref hex)) => {
            let oid = ObjectId::with_string(hex)
                .map_err(|_| Error::InvalidObjectId(format!("invalid ObjectId: {}", hex)))?;
            Bson::ObjectId(oid)
        }
        ("$date", &Value::Number(ref millis)) => {
            let millis = millis.as_i64().ok_or_else(|| {
                Error::OperationError("stored $date is not an integer".to_owned())
            })?;
            match Utc.timestamp_millis_opt(millis).single() {
                Some(when) => Bson::UtcDatetime(when),
                None => {
                    return Err(Error::OperationError(format!(
                        "stored $date out of range: {}",
                        millis
                    )));
                }
            }
        }
        ("$timestamp", &Value::Number(ref n)) => Bson::TimeStamp(n.as_i64().unwrap_or(0)),
        ("$binary", &Value::String(ref encoded)) => {
            let bytes = hex::decode(encoded).map_err(|_| {
                Error::OperationError("stored $binary is not valid hex".to_owned())
            })?;
            Bson::Binary(BinarySubtype::Generic, bytes)
        }
        ("$numberDouble", &Value::String(ref literal)) => {
            let parsed = literal.parse::<f64>().map_err(|_| {
                Error::OperationError("stored $numberDouble is not a double".to_owned())
            })?;
            Bson::FloatingPoint(parsed)
        }
        ("$regex", &Value::Object(ref inner)) => {
            let pattern = inner.get("pattern").and_then(Value::as_str).unwrap_or("");
            let options = inner.get("options").and_then(Value::as_str).unwrap_or("");
            Bson::RegExp(pattern.to_owned(), options.to_owned())
        }
        _ => return Ok(None),
    };
    Ok(Some(special))
}

fn json_to_document(map: &Map<String, Value>) -> Result<Document> {
    let mut doc = Document::new();
    for (key, value) in map.iter() {
        doc.insert(key.clone(), json_to_bson(value)?);
    }
    Ok(doc)
}

/// Encodes a document as the JSON payload stored in the `data` column.
pub fn encode_document(doc: &Document) -> Result<String> {
    serde_json::to_string(&document_to_json(doc)).map_err(Error::from)
}

/// Decodes a stored JSON payload back into a document.
pub fn decode_document(payload: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(payload)?;
    match value {
        Value::Object(ref map) => json_to_document(map),
        _ => Err(Error::OperationError(
            "stored payload is not a JSON object".to_owned(),
        )),
    }
}
