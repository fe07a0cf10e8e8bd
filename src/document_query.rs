//! Closed grammar for MongoDB queries produced by the LLM
//!
//! Generated document queries are never evaluated. They are parsed into a
//! [`DocumentQuery`] (collection + operation + literal documents) and then run
//! through typed driver calls. Anything outside the grammar is rejected.
//!
//! ```text
//! query     := handle "." operation modifier* ";"?
//! handle    := "db" "[" string "]" | "db" "." ident | "db" "." "getCollection" "(" string ")"
//! operation := find | find_one | findOne | aggregate | count_documents | countDocuments
//! modifier  := "." ("limit" | "skip" | "sort") "(" args ")"
//! ```
//!
//! Literal documents accept JSON plus the Python and shell relaxations models
//! tend to emit: single quotes, bare keys, `True`/`None`, trailing commas,
//! tuples, `ObjectId(..)`, `ISODate(..)` and `datetime(..)`.

use bson::{Bson, Document, oid::ObjectId};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;
use thiserror::Error;

/// Parsed, structured MongoDB request
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub collection: String,
    pub operation: DocumentOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOperation {
    Find {
        filter: Document,
        projection: Option<Document>,
        sort: Option<Document>,
        skip: Option<u64>,
        limit: Option<i64>,
        /// `find_one` / `findOne`: at most one document
        single: bool,
    },
    Aggregate {
        pipeline: Vec<Document>,
    },
    Count {
        filter: Document,
    },
}

impl DocumentOperation {
    pub fn name(&self) -> &'static str {
        match self {
            DocumentOperation::Find { single: true, .. } => "find_one",
            DocumentOperation::Find { .. } => "find",
            DocumentOperation::Aggregate { .. } => "aggregate",
            DocumentOperation::Count { .. } => "count_documents",
        }
    }
}

impl fmt::Display for DocumentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db[\"{}\"].{}(..)", self.collection, self.operation.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at position {position}")]
pub struct DocumentQueryError {
    pub position: usize,
    pub message: String,
}

/// Parse a document query into its structured form
pub fn parse_document_query(input: &str) -> Result<DocumentQuery, DocumentQueryError> {
    Parser::new(input).parse_query()
}

/// One call argument, positional or Python keyword form (`limit=5`)
struct Arg {
    name: Option<String>,
    value: Bson,
    position: usize,
}

/// Deepest literal nesting accepted before the parser gives up
const MAX_NESTING_DEPTH: usize = 50;

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, DocumentQueryError> {
        Err(DocumentQueryError {
            position: self.pos,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), DocumentQueryError> {
        if self.eat(expected) {
            Ok(())
        } else {
            match self.peek() {
                Some(found) => self.error(format!("expected '{expected}', found '{found}'")),
                None => self.error(format!("expected '{expected}', found end of input")),
            }
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_' || c == '$'
    }

    fn is_ident_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '$'
    }

    fn ident(&mut self) -> Result<String, DocumentQueryError> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            Some(c) if Self::is_ident_start(c) => {}
            _ => return self.error("expected identifier"),
        }
        while let Some(c) = self.peek() {
            if Self::is_ident_char(c) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_query(mut self) -> Result<DocumentQuery, DocumentQueryError> {
        self.skip_ws();
        let handle = self.ident()?;
        if handle != "db" {
            self.pos = 0;
            return self.error(format!("query must start with the 'db' handle, found '{handle}'"));
        }

        let collection = self.collection()?;
        let operation = self.operation()?;

        self.eat(';');
        self.skip_ws();
        if self.pos < self.src.len() {
            return self.error("unexpected trailing input");
        }

        Ok(DocumentQuery {
            collection,
            operation,
        })
    }

    fn collection(&mut self) -> Result<String, DocumentQueryError> {
        self.skip_ws();
        let name = if self.eat('[') {
            self.skip_ws();
            let name = self.string()?;
            self.expect(']')?;
            name
        } else if self.eat('.') {
            let name = self.ident()?;
            if matches!(name.as_str(), "getCollection" | "get_collection") {
                self.expect('(')?;
                self.skip_ws();
                let name = self.string()?;
                self.expect(')')?;
                name
            } else {
                name
            }
        } else {
            return self.error("expected collection access after 'db'");
        };

        if name.is_empty() {
            return self.error("collection name must not be empty");
        }
        Ok(name)
    }

    fn operation(&mut self) -> Result<DocumentOperation, DocumentQueryError> {
        self.expect('.')?;
        let method_pos = self.pos;
        let method = self.ident()?;
        let args = self.call_args()?;

        let mut operation = match method.as_str() {
            "find" | "find_one" | "findOne" => {
                let mut filter = Document::new();
                let mut projection = None;
                let mut sort = None;
                let mut skip = None;
                let mut limit = None;
                for (index, arg) in args.into_iter().enumerate() {
                    match (arg.name.as_deref(), index) {
                        (Some("filter"), _) | (None, 0) => filter = as_document(arg, "filter")?,
                        (Some("projection"), _) | (None, 1) => {
                            projection = Some(as_document(arg, "projection")?)
                        }
                        (Some("sort"), _) => sort = Some(sort_spec(vec![arg])?),
                        (Some("skip"), _) => skip = Some(as_count(arg, "skip")?),
                        (Some("limit"), _) if method == "find" => {
                            limit = Some(as_count(arg, "limit")? as i64)
                        }
                        (Some(other), _) => {
                            return Err(DocumentQueryError {
                                position: arg.position,
                                message: format!("unsupported argument '{other}' to {method}"),
                            });
                        }
                        (None, _) => {
                            return Err(DocumentQueryError {
                                position: arg.position,
                                message: format!("too many arguments to {method}"),
                            });
                        }
                    }
                }
                DocumentOperation::Find {
                    filter,
                    projection,
                    sort,
                    skip,
                    limit,
                    single: method != "find",
                }
            }
            "aggregate" => {
                let mut args = args.into_iter();
                let pipeline = match args.next() {
                    Some(arg) => pipeline(arg)?,
                    None => Vec::new(),
                };
                if let Some(extra) = args.next() {
                    return Err(DocumentQueryError {
                        position: extra.position,
                        message: "aggregate takes a single pipeline argument".to_string(),
                    });
                }
                DocumentOperation::Aggregate { pipeline }
            }
            "count_documents" | "countDocuments" => {
                let mut args = args.into_iter();
                let filter = match args.next() {
                    Some(arg) => as_document(arg, "filter")?,
                    None => Document::new(),
                };
                if let Some(extra) = args.next() {
                    return Err(DocumentQueryError {
                        position: extra.position,
                        message: format!("{method} takes a single filter argument"),
                    });
                }
                DocumentOperation::Count { filter }
            }
            other => {
                self.pos = method_pos;
                return self.error(format!(
                    "unsupported operation '{other}' (allowed: find, find_one, aggregate, count_documents)"
                ));
            }
        };

        self.modifiers(&mut operation)?;
        Ok(operation)
    }

    fn modifiers(&mut self, operation: &mut DocumentOperation) -> Result<(), DocumentQueryError> {
        loop {
            self.skip_ws();
            if self.peek() != Some('.') {
                return Ok(());
            }
            self.bump();
            let modifier_pos = self.pos;
            let modifier = self.ident()?;
            let args = self.call_args()?;

            let DocumentOperation::Find {
                sort, skip, limit, single, ..
            } = operation
            else {
                self.pos = modifier_pos;
                return self.error(format!(
                    "'{modifier}' can only follow find, not {}",
                    operation.name()
                ));
            };

            match modifier.as_str() {
                "sort" => *sort = Some(sort_spec(args)?),
                "skip" => *skip = Some(single_count(args, "skip", modifier_pos)?),
                "limit" if !*single => {
                    *limit = Some(single_count(args, "limit", modifier_pos)? as i64)
                }
                other => {
                    self.pos = modifier_pos;
                    return self.error(format!("unsupported cursor method '{other}'"));
                }
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, DocumentQueryError> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            if self.eat(')') {
                return Ok(args);
            }
            self.skip_ws();
            let position = self.pos;
            let name = self.keyword_name();
            let value = self.value()?;
            args.push(Arg {
                name,
                value,
                position,
            });
            if !self.eat(',') {
                self.expect(')')?;
                return Ok(args);
            }
        }
    }

    /// Consume `name=` when present, leaving the cursor on the value
    fn keyword_name(&mut self) -> Option<String> {
        let start = self.pos;
        let name = self.ident().ok()?;
        self.skip_ws();
        let rest = &self.src[self.pos..];
        if rest.starts_with('=') && !rest.starts_with("==") {
            self.bump();
            Some(name)
        } else {
            self.pos = start;
            None
        }
    }

    /// Every nested literal passes through here
    fn value(&mut self) -> Result<Bson, DocumentQueryError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return self.error(format!("nesting too deep (limit {MAX_NESTING_DEPTH})"));
        }
        self.depth += 1;
        let value = self.literal();
        self.depth -= 1;
        value
    }

    fn literal(&mut self) -> Result<Bson, DocumentQueryError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.object().map(Bson::Document),
            Some('[') => {
                self.bump();
                self.sequence(']').map(Bson::Array)
            }
            Some('(') => {
                self.bump();
                let (items, trailing_comma) = self.sequence_with_comma(')')?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.into_iter().next().unwrap_or(Bson::Null))
                } else {
                    Ok(Bson::Array(items))
                }
            }
            Some('"') | Some('\'') => self.string().map(Bson::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if Self::is_ident_start(c) => self.named_value(),
            Some(c) => self.error(format!("unexpected character '{c}'")),
            None => self.error("unexpected end of input"),
        }
    }

    fn object(&mut self) -> Result<Document, DocumentQueryError> {
        self.expect('{')?;
        let mut doc = Document::new();
        loop {
            if self.eat('}') {
                return Ok(doc);
            }
            self.skip_ws();
            let key = match self.peek() {
                Some('"') | Some('\'') => self.string()?,
                Some(c) if Self::is_ident_start(c) || c.is_ascii_digit() => {
                    let start = self.pos;
                    while let Some(c) = self.peek() {
                        if Self::is_ident_char(c) || c == '.' {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    self.src[start..self.pos].to_string()
                }
                _ => return self.error("expected document key"),
            };
            self.expect(':')?;
            let value = self.value()?;
            doc.insert(key, value);
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(doc);
            }
        }
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Bson>, DocumentQueryError> {
        self.sequence_with_comma(close).map(|(items, _)| items)
    }

    /// Parse items up to `close`; also reports whether the last item had a trailing comma
    fn sequence_with_comma(&mut self, close: char) -> Result<(Vec<Bson>, bool), DocumentQueryError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.value()?);
            trailing_comma = self.eat(',');
            if !trailing_comma {
                self.expect(close)?;
                return Ok((items, false));
            }
        }
    }

    fn string(&mut self) -> Result<String, DocumentQueryError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return self.error("expected string literal"),
        };
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('u') => self.unicode_escape()?,
                        Some(c) => c,
                        None => break,
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
                None => break,
            }
        }
        self.pos = start;
        self.error("unterminated string literal")
    }

    fn unicode_escape(&mut self) -> Result<char, DocumentQueryError> {
        let end = self.pos + 4;
        let hex = self.src.get(self.pos..end).unwrap_or("");
        let code = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
        match code {
            Some(c) if hex.len() == 4 => {
                self.pos = end;
                Ok(c)
            }
            _ => self.error("invalid \\u escape"),
        }
    }

    fn number(&mut self) -> Result<Bson, DocumentQueryError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        while let Some(c) = self.peek() {
            let exponent_sign = matches!(c, '-' | '+')
                && matches!(self.src[..self.pos].chars().last(), Some('e') | Some('E'));
            if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '_') || exponent_sign {
                self.bump();
            } else {
                break;
            }
        }
        let text: String = self.src[start..self.pos]
            .chars()
            .filter(|c| *c != '_' && *c != '+')
            .collect();

        if let Ok(int) = text.parse::<i64>() {
            return Ok(match i32::try_from(int) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(int),
            });
        }
        match text.parse::<f64>() {
            Ok(float) if float.is_finite() => Ok(Bson::Double(float)),
            _ => {
                self.pos = start;
                self.error(format!("invalid number '{text}'"))
            }
        }
    }

    /// Keywords and the few constructors the grammar admits
    fn named_value(&mut self) -> Result<Bson, DocumentQueryError> {
        let start = self.pos;
        let mut name = self.ident()?;
        if name == "new" {
            name = self.ident()?;
        }
        // datetime.datetime(...)
        while self.src[self.pos..].starts_with('.') {
            self.bump();
            name = self.ident()?;
        }

        match name.as_str() {
            "true" | "True" => Ok(Bson::Boolean(true)),
            "false" | "False" => Ok(Bson::Boolean(false)),
            "null" | "None" | "undefined" => Ok(Bson::Null),
            "ObjectId" => {
                let args = self.call_args()?;
                match args.as_slice() {
                    [Arg {
                        value: Bson::String(hex),
                        position,
                        ..
                    }] => ObjectId::parse_str(hex)
                        .map(Bson::ObjectId)
                        .map_err(|e| DocumentQueryError {
                            position: *position,
                            message: format!("invalid ObjectId: {e}"),
                        }),
                    [] => Ok(Bson::ObjectId(ObjectId::new())),
                    _ => {
                        self.pos = start;
                        self.error("ObjectId takes one hex string")
                    }
                }
            }
            "ISODate" | "Date" => {
                let args = self.call_args()?;
                match args.as_slice() {
                    [Arg {
                        value: Bson::String(text),
                        position,
                        ..
                    }] => parse_date(text).ok_or_else(|| DocumentQueryError {
                        position: *position,
                        message: format!("invalid date '{text}'"),
                    }),
                    _ => {
                        self.pos = start;
                        self.error(format!("{name} takes one date string"))
                    }
                }
            }
            "datetime" => {
                let args = self.call_args()?;
                let parts: Option<Vec<u32>> = args
                    .iter()
                    .map(|arg| match arg.value {
                        Bson::Int32(v) => u32::try_from(v).ok(),
                        Bson::Int64(v) => u32::try_from(v).ok(),
                        _ => None,
                    })
                    .collect();
                let date = parts.and_then(|p| {
                    let (year, month, day) = (*p.first()?, *p.get(1)?, *p.get(2)?);
                    let time = NaiveTime::from_hms_opt(
                        p.get(3).copied().unwrap_or(0),
                        p.get(4).copied().unwrap_or(0),
                        p.get(5).copied().unwrap_or(0),
                    )?;
                    let date = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?;
                    Some(date.and_time(time))
                });
                match date {
                    Some(dt) => Ok(naive_to_bson(dt)),
                    None => {
                        self.pos = start;
                        self.error("datetime takes year, month, day[, hour, minute, second]")
                    }
                }
            }
            other => {
                self.pos = start;
                self.error(format!("unknown name '{other}'"))
            }
        }
    }
}

fn naive_to_bson(dt: NaiveDateTime) -> Bson {
    Bson::DateTime(bson::DateTime::from_millis(dt.and_utc().timestamp_millis()))
}

fn parse_date(text: &str) -> Option<Bson> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis())));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive_to_bson(dt));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| naive_to_bson(d.and_time(NaiveTime::MIN)))
}

fn as_document(arg: Arg, what: &str) -> Result<Document, DocumentQueryError> {
    match arg.value {
        Bson::Document(doc) => Ok(doc),
        Bson::Null => Ok(Document::new()),
        other => Err(DocumentQueryError {
            position: arg.position,
            message: format!("{what} must be a document, found {other}"),
        }),
    }
}

fn as_count(arg: Arg, what: &str) -> Result<u64, DocumentQueryError> {
    let value = match arg.value {
        Bson::Int32(v) => u64::try_from(v).ok(),
        Bson::Int64(v) => u64::try_from(v).ok(),
        _ => None,
    };
    value.ok_or(DocumentQueryError {
        position: arg.position,
        message: format!("{what} must be a non-negative integer"),
    })
}

fn single_count(args: Vec<Arg>, what: &str, position: usize) -> Result<u64, DocumentQueryError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(arg), None) => as_count(arg, what),
        _ => Err(DocumentQueryError {
            position,
            message: format!("{what} takes exactly one argument"),
        }),
    }
}

fn pipeline(arg: Arg) -> Result<Vec<Document>, DocumentQueryError> {
    let stages = match arg.value {
        Bson::Array(stages) => stages,
        Bson::Document(single) => vec![Bson::Document(single)],
        _ => {
            return Err(DocumentQueryError {
                position: arg.position,
                message: "aggregate pipeline must be a list of stages".to_string(),
            });
        }
    };
    stages
        .into_iter()
        .map(|stage| match stage {
            Bson::Document(doc) => Ok(doc),
            _ => Err(DocumentQueryError {
                position: arg.position,
                message: "every pipeline stage must be a document".to_string(),
            }),
        })
        .collect()
}

/// Accepts `{"f": 1}`, `("f", -1)`, `"f"` and `[("f", 1), ("g", -1)]`
fn sort_spec(args: Vec<Arg>) -> Result<Document, DocumentQueryError> {
    let position = args.first().map(|a| a.position).unwrap_or(0);
    let invalid = || DocumentQueryError {
        position,
        message: "unsupported sort specification".to_string(),
    };

    let direction = |value: &Bson| -> Option<Bson> {
        match value {
            Bson::Int32(1) | Bson::Int32(-1) => Some(value.clone()),
            Bson::Int64(d @ (1 | -1)) => Some(Bson::Int32(*d as i32)),
            _ => None,
        }
    };
    let pair = |items: &[Bson]| -> Option<(String, Bson)> {
        match items {
            [Bson::String(field), dir] => Some((field.clone(), direction(dir)?)),
            _ => None,
        }
    };

    let values: Vec<Bson> = args.into_iter().map(|a| a.value).collect();
    let mut spec = Document::new();
    match values.as_slice() {
        [Bson::Document(doc)] => return Ok(doc.clone()),
        [Bson::String(field)] => {
            spec.insert(field.clone(), 1);
        }
        [Bson::String(_), _] => {
            let (field, dir) = pair(values.as_slice()).ok_or_else(invalid)?;
            spec.insert(field, dir);
        }
        [Bson::Array(items)] => {
            for item in items {
                let Bson::Array(inner) = item else {
                    return Err(invalid());
                };
                let (field, dir) = pair(inner.as_slice()).ok_or_else(invalid)?;
                spec.insert(field, dir);
            }
        }
        _ => return Err(invalid()),
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use rstest::rstest;

    fn find_parts(query: &DocumentQuery) -> (&Document, Option<&Document>) {
        match &query.operation {
            DocumentOperation::Find {
                filter, projection, ..
            } => (filter, projection.as_ref()),
            other => panic!("expected find, got {other:?}"),
        }
    }

    #[test]
    fn test_python_style_find() {
        let query =
            parse_document_query(r#"db["students"].find({"name": "Alice"}, {"_id": 0})"#).unwrap();
        assert_eq!(query.collection, "students");
        let (filter, projection) = find_parts(&query);
        assert_eq!(filter, &doc! { "name": "Alice" });
        assert_eq!(projection, Some(&doc! { "_id": 0 }));
    }

    #[test]
    fn test_shell_style_find_with_modifiers() {
        let query = parse_document_query(
            "db.city.find({ Population: { $gt: 1000000 } }, { Name: 1 }).sort({ Population: -1 }).limit(5);",
        )
        .unwrap();
        assert_eq!(query.collection, "city");
        match query.operation {
            DocumentOperation::Find {
                filter,
                projection,
                sort,
                limit,
                skip,
                single,
            } => {
                assert_eq!(filter, doc! { "Population": { "$gt": 1_000_000 } });
                assert_eq!(projection, Some(doc! { "Name": 1 }));
                assert_eq!(sort, Some(doc! { "Population": -1 }));
                assert_eq!(limit, Some(5));
                assert_eq!(skip, None);
                assert!(!single);
            }
            other => panic!("expected find, got {other:?}"),
        }
    }

    #[test]
    fn test_pymongo_sort_forms() {
        let query = parse_document_query(r#"db['city'].find().sort("Name", 1)"#).unwrap();
        let DocumentOperation::Find { sort, .. } = query.operation else {
            panic!("expected find");
        };
        assert_eq!(sort, Some(doc! { "Name": 1 }));

        let query =
            parse_document_query(r#"db['city'].find().sort([("Name", 1), ("ID", -1)])"#).unwrap();
        let DocumentOperation::Find { sort, .. } = query.operation else {
            panic!("expected find");
        };
        assert_eq!(sort, Some(doc! { "Name": 1, "ID": -1 }));
    }

    #[test]
    fn test_keyword_arguments() {
        let query = parse_document_query(
            r#"db["city"].find(filter={"CountryCode": "NLD"}, projection={"_id": False}, limit=3)"#,
        )
        .unwrap();
        match query.operation {
            DocumentOperation::Find {
                filter,
                projection,
                limit,
                ..
            } => {
                assert_eq!(filter, doc! { "CountryCode": "NLD" });
                assert_eq!(projection, Some(doc! { "_id": false }));
                assert_eq!(limit, Some(3));
            }
            other => panic!("expected find, got {other:?}"),
        }
    }

    #[test]
    fn test_aggregate_pipeline() {
        let query = parse_document_query(
            r#"db.orders.aggregate([{"$match": {"status": "A"}}, {"$group": {"_id": "$cust_id", "total": {"$sum": "$amount"}}},])"#,
        )
        .unwrap();
        assert_eq!(query.collection, "orders");
        match query.operation {
            DocumentOperation::Aggregate { pipeline } => {
                assert_eq!(pipeline.len(), 2);
                assert_eq!(pipeline[0], doc! { "$match": { "status": "A" } });
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn test_find_one_and_count() {
        let query = parse_document_query(r#"db.getCollection("users").findOne({'age': None})"#)
            .unwrap();
        assert_eq!(query.collection, "users");
        assert_eq!(query.operation.name(), "find_one");

        let query = parse_document_query(r#"db["users"].count_documents({"active": True})"#)
            .unwrap();
        assert_eq!(
            query.operation,
            DocumentOperation::Count {
                filter: doc! { "active": true }
            }
        );
    }

    #[test]
    fn test_constructors() {
        let query = parse_document_query(
            r#"db.events.find({"_id": ObjectId("507f1f77bcf86cd799439011"), "at": {"$gte": ISODate("2024-01-01T00:00:00Z")}, "day": datetime(2024, 2, 3)})"#,
        )
        .unwrap();
        let (filter, _) = find_parts(&query);
        assert!(matches!(filter.get("_id"), Some(Bson::ObjectId(_))));
        let at = filter.get_document("at").unwrap();
        assert_eq!(
            at.get("$gte"),
            Some(&Bson::DateTime(bson::DateTime::from_millis(1_704_067_200_000)))
        );
        assert!(matches!(filter.get("day"), Some(Bson::DateTime(_))));
    }

    #[rstest]
    #[case("db.users.find({'name': 'O\\'Brien'})", "O'Brien")]
    #[case("db.users.find({\"name\": \"caf\\u00e9\"})", "café")]
    fn test_string_escapes(#[case] input: &str, #[case] expected: &str) {
        let query = parse_document_query(input).unwrap();
        let (filter, _) = find_parts(&query);
        assert_eq!(filter.get_str("name").unwrap(), expected);
    }

    #[test]
    fn test_numbers() {
        let query =
            parse_document_query("db.t.find({'a': -1.5, 'b': 3000000000, 'c': 1e3, 'd': 7})")
                .unwrap();
        let (filter, _) = find_parts(&query);
        assert_eq!(filter.get("a"), Some(&Bson::Double(-1.5)));
        assert_eq!(filter.get("b"), Some(&Bson::Int64(3_000_000_000)));
        assert_eq!(filter.get("c"), Some(&Bson::Double(1000.0)));
        assert_eq!(filter.get("d"), Some(&Bson::Int32(7)));
    }

    #[rstest]
    #[case("")]
    #[case("__import__('os').system('rm -rf /')")]
    #[case("db['users'].drop()")]
    #[case("db.users.deleteMany({})")]
    #[case("db.users.find({'a': 1})); db.users.drop()")]
    #[case("db.users.find({'a': os.environ})")]
    #[case("db.users.find({'a': 1}")]
    #[case("db.users.find({'a': 'unterminated})")]
    #[case("db.users.aggregate([1, 2])")]
    #[case("db.users.aggregate([]).limit(5)")]
    #[case("db.users.find().limit(-1)")]
    #[case("db[''].find()")]
    #[case("client.db.users.find()")]
    #[case("SELECT * FROM users")]
    fn test_rejected_queries(#[case] input: &str) {
        assert!(
            parse_document_query(input).is_err(),
            "expected rejection for {input:?}"
        );
    }

    #[rstest]
    #[case("db.users.find_one({}, limit=5)")]
    #[case("db.users.findOne({}).limit(5)")]
    fn test_find_one_rejects_limit(#[case] input: &str) {
        let err = parse_document_query(input).unwrap_err();
        assert!(err.message.contains("limit"), "{err}");
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let input = format!("db.a.find({})", "[".repeat(20_000));
        let err = parse_document_query(&input).unwrap_err();
        assert!(err.message.contains("nesting too deep"));

        let input = format!("db.a.find({})", "ObjectId(".repeat(20_000));
        assert!(parse_document_query(&input).is_err());

        let nested = format!("db.a.find({}1{})", "{'a': ".repeat(20), "}".repeat(20));
        assert!(parse_document_query(&nested).is_ok());
    }

    #[test]
    fn test_error_reports_position() {
        let err = parse_document_query("db.users.remove({})").unwrap_err();
        assert_eq!(err.position, 9);
        assert!(err.message.contains("remove"));
    }
}
