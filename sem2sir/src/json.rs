//! Ordered Stage-4 document model.
//!
//! serde_json does the actual parsing; the value tree here preserves
//! object field order, rejects duplicate keys outright, and numbers each
//! object in document order so diagnostics can point back into the raw
//! buffer.

use std::cell::Cell;
use std::fmt;

use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};

/// A JSON value with ordered, duplicate-free object fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Json {
    /// `null`
    Null,
    /// Boolean.
    Bool(bool),
    /// Any number; the Stage-4 schema never reads numeric values.
    Num(f64),
    /// String.
    Str(String),
    /// Array.
    Arr(Vec<Json>),
    /// Object.
    Obj(Obj),
}

/// An object: fields in document order plus the object's pre-order index
/// used to recover its byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Obj {
    /// 0-based pre-order index of this object's `{` in the document.
    pub index: u32,
    /// Fields in document order.
    pub fields: Vec<(String, Json)>,
}

impl Obj {
    /// A synthetic object with no document position.
    pub fn synthetic(fields: Vec<(String, Json)>) -> Self {
        Obj {
            index: u32::MAX,
            fields,
        }
    }

    /// Value of a field by key.
    pub fn get(&self, key: &str) -> Option<&Json> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// 0-based position of a field by key.
    pub fn key_pos(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == key)
    }

    /// The `k` string when this object carries one as its first field.
    pub fn kind(&self) -> Option<&str> {
        match self.fields.first() {
            Some((k, Json::Str(s))) if k == "k" => Some(s),
            _ => None,
        }
    }
}

impl Json {
    /// Object view.
    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Json::Obj(o) => Some(o),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Json::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Array view.
    pub fn as_arr(&self) -> Option<&[Json]> {
        match self {
            Json::Arr(a) => Some(a),
            _ => None,
        }
    }

    /// Whether this is `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Json::Null)
    }

    /// Short shape word for diagnostics.
    pub fn shape(&self) -> &'static str {
        match self {
            Json::Null => "null",
            Json::Bool(_) => "bool",
            Json::Num(_) => "number",
            Json::Str(_) => "string",
            Json::Arr(_) => "array",
            Json::Obj(_) => "object",
        }
    }
}

struct JsonSeed<'a> {
    counter: &'a Cell<u32>,
}

impl<'de> DeserializeSeed<'de> for JsonSeed<'_> {
    type Value = Json;

    fn deserialize<D>(self, deserializer: D) -> Result<Json, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(JsonVisitor {
            counter: self.counter,
        })
    }
}

struct JsonVisitor<'a> {
    counter: &'a Cell<u32>,
}

impl<'de> Visitor<'de> for JsonVisitor<'_> {
    type Value = Json;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Json, E> {
        Ok(Json::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Json, E> {
        Ok(Json::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Json, E> {
        Ok(Json::Num(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Json, E> {
        Ok(Json::Num(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Json, E> {
        Ok(Json::Num(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Json, E> {
        Ok(Json::Str(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Json, E> {
        Ok(Json::Str(v))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Json, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element_seed(JsonSeed {
            counter: self.counter,
        })? {
            items.push(item);
        }
        Ok(Json::Arr(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Json, A::Error>
    where
        A: MapAccess<'de>,
    {
        let index = self.counter.get();
        self.counter.set(index + 1);
        let mut fields: Vec<(String, Json)> = Vec::new();
        while let Some(key) = map.next_key::<String>()? {
            if fields.iter().any(|(k, _)| *k == key) {
                return Err(de::Error::custom(format!("duplicate object key {key:?}")));
            }
            let value = map.next_value_seed(JsonSeed {
                counter: self.counter,
            })?;
            fields.push((key, value));
        }
        Ok(Json::Obj(Obj { index, fields }))
    }
}

/// Parses a document into the ordered model. Fails on malformed JSON and
/// on duplicate object keys.
pub fn parse_document(text: &str) -> Result<Json, String> {
    let counter = Cell::new(0u32);
    let mut de = serde_json::Deserializer::from_str(text);
    let value = JsonSeed { counter: &counter }
        .deserialize(&mut de)
        .map_err(|e| e.to_string())?;
    de.end().map_err(|e| e.to_string())?;
    Ok(value)
}

/// Byte offsets of every object start in document order.
///
/// A string-aware scan of the raw buffer; the i-th `{` outside string
/// literals is the i-th object the deserializer visits, so an object's
/// `index` recovers its byte offset.
#[derive(Debug)]
pub struct DocIndex {
    obj_starts: Vec<usize>,
}

impl DocIndex {
    /// Scans the document once.
    pub fn scan(text: &str) -> Self {
        let mut obj_starts = Vec::new();
        let mut in_string = false;
        let mut escaped = false;
        for (i, b) in text.bytes().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => obj_starts.push(i),
                _ => {}
            }
        }
        Self { obj_starts }
    }

    /// Byte offset of an object by its pre-order index; synthetic objects
    /// map to offset 0.
    pub fn offset_of(&self, obj: &Obj) -> usize {
        self.obj_starts
            .get(obj.index as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Source position derived from a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    /// Byte offset into the document.
    pub offset: usize,
    /// 1-based line.
    pub line: u32,
    /// 1-based column (byte-based).
    pub col: u32,
    /// Up to 120 bytes of context with CR/LF/TAB folded to spaces.
    pub near: String,
}

impl Pos {
    /// Computes line/column and the `near` snippet for an offset.
    pub fn at(text: &str, offset: usize) -> Self {
        let offset = offset.min(text.len());
        let before = &text.as_bytes()[..offset];
        let line = before.iter().filter(|b| **b == b'\n').count() as u32 + 1;
        let line_start = before
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(0);
        let col = (offset - line_start) as u32 + 1;

        let mut end = (offset + 120).min(text.len());
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        let mut start = offset;
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        let near: String = text[start..end]
            .chars()
            .map(|c| match c {
                '\r' | '\n' | '\t' => ' ',
                other => other,
            })
            .collect();
        Pos {
            offset,
            line,
            col,
            near,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_field_order() {
        let doc = parse_document(r#"{"b":1,"a":2,"k":"tok"}"#).unwrap();
        let obj = doc.as_obj().unwrap();
        let keys: Vec<&str> = obj.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["b", "a", "k"]);
        assert_eq!(obj.key_pos("a"), Some(1));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = parse_document(r#"{"a":1,"a":2}"#).unwrap_err();
        assert!(err.contains("duplicate object key"), "{err}");
    }

    #[test]
    fn numbers_objects_in_preorder() {
        let text = r#"{"x":{"y":[{"z":1},{"w":"{not an object}"}]}}"#;
        let doc = parse_document(text).unwrap();
        let index = DocIndex::scan(text);
        let root = doc.as_obj().unwrap();
        assert_eq!(index.offset_of(root), 0);
        let x = root.get("x").unwrap().as_obj().unwrap();
        assert_eq!(index.offset_of(x), text.find(r#"{"y""#).unwrap());
        let arr = x.get("y").unwrap().as_arr().unwrap();
        let z = arr[0].as_obj().unwrap();
        assert_eq!(index.offset_of(z), text.find(r#"{"z""#).unwrap());
        let w = arr[1].as_obj().unwrap();
        assert_eq!(index.offset_of(w), text.find(r#"{"w""#).unwrap());
    }

    #[test]
    fn pos_computes_line_col_and_folds_near() {
        let text = "line one\n\tline\ttwo {\"k\":\"x\"}";
        let off = text.find('{').unwrap();
        let pos = Pos::at(text, off);
        assert_eq!(pos.line, 2);
        assert_eq!(pos.col as usize, off - 9 + 1);
        assert!(!pos.near.contains('\t'));
        assert!(pos.near.starts_with('{'));
    }

    #[test]
    fn kind_requires_k_as_first_field() {
        let doc = parse_document(r#"{"k":"Unit","items":[]}"#).unwrap();
        assert_eq!(doc.as_obj().unwrap().kind(), Some("Unit"));
        let doc = parse_document(r#"{"items":[],"k":"Unit"}"#).unwrap();
        assert_eq!(doc.as_obj().unwrap().kind(), None);
    }
}
