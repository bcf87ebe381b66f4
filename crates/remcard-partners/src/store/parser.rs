//! Reading the record file: id allocation and record extraction.
//!
//! The store is the array literal that ends the file:
//!
//! ```text
//! export const partnersData = [
//!   { id: 1, ... },
//!   { id: 2, ... },
//! ];
//! ```
//!
//! The closing marker is the `]` followed by `;` with nothing but whitespace or
//! comments after it. The opening marker is the `[` that bracket-matches it.

use super::lexer::{Token, TokenKind, tokenize};
use crate::{Error, PartnerRecord, Result};
use serde_json::{Map, Number, Value};
use std::collections::BTreeSet;

/// Token indices of the store array's brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrayBounds {
    pub open: usize,
    pub close: usize,
}

/// Finds the store array in an already tokenized file.
pub(crate) fn locate_array(tokens: &[Token<'_>]) -> Result<ArrayBounds> {
    let [.., bracket, semicolon] = tokens else {
        return Err(missing_closing_marker());
    };
    if !bracket.is_punct(']') || !semicolon.is_punct(';') {
        return Err(missing_closing_marker());
    }
    let close = tokens.len() - 2;

    let mut depth = 0_usize;
    for index in (0..close).rev() {
        let token = &tokens[index];
        if token.is_punct(']') {
            depth += 1;
        } else if token.is_punct('[') {
            if depth == 0 {
                return Ok(ArrayBounds { open: index, close });
            }
            depth -= 1;
        }
    }

    Err(Error::MalformedStore {
        reason: "closing marker `];` has no matching `[`".to_string(),
    })
}

fn missing_closing_marker() -> Error {
    Error::MalformedStore {
        reason: "closing marker `];` not found at end of file".to_string(),
    }
}

/// Returns every integer that appears as the value of an `id` key.
///
/// Text inside strings and comments is ignored, so a description mentioning
/// `id: 7` does not count.
pub fn existing_ids(text: &str) -> Result<BTreeSet<u64>> {
    let tokens = tokenize(text)?;
    Ok(ids_in(&tokens))
}

pub(crate) fn ids_in(tokens: &[Token<'_>]) -> BTreeSet<u64> {
    tokens
        .windows(3)
        .filter_map(|window| match window {
            [key, colon, Token { kind: TokenKind::Number(digits), .. }]
                if key.is_key("id") && colon.is_punct(':') =>
            {
                digits.parse::<u64>().ok()
            }
            _ => None,
        })
        .collect()
}

/// The id the next appended record must use: one past the largest id in the
/// file, or `1` for a store without ids.
pub fn next_id(text: &str) -> Result<u64> {
    let ids = existing_ids(text)?;
    allocate_after(&ids)
}

pub(crate) fn allocate_after(ids: &BTreeSet<u64>) -> Result<u64> {
    match ids.last() {
        None => Ok(1),
        Some(max) => max.checked_add(1).ok_or_else(|| Error::MalformedStore {
            reason: "id space exhausted".to_string(),
        }),
    }
}

/// One object literal from the store, with its fields decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRecord {
    pub fields: Map<String, Value>,
}

impl StoredRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn id(&self) -> Option<u64> {
        self.get("id").and_then(Value::as_u64)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// The `phones` list; `null` or a missing field yields an empty list.
    pub fn phones(&self) -> Vec<String> {
        match self.get("phones") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }
}

impl TryFrom<&StoredRecord> for PartnerRecord {
    type Error = Error;

    fn try_from(stored: &StoredRecord) -> Result<Self> {
        let required = |key: &str| {
            stored
                .text(key)
                .map(str::to_owned)
                .ok_or_else(|| Error::Decode {
                    reason: format!("record is missing text field `{key}`"),
                })
        };
        let optional = |key: &str| stored.text(key).map(str::to_owned);

        Ok(Self {
            id: stored.id().ok_or_else(|| Error::Decode {
                reason: "record is missing a numeric `id`".to_string(),
            })?,
            name: required("name")?,
            category: required("category")?,
            address: required("address")?,
            website: optional("website"),
            phones: stored.phones(),
            description: required("description")?,
            logo: optional("logo"),
            extra_label: optional("extraLabel"),
        })
    }
}

/// Parses every object literal in the store array.
///
/// Values are decoded into JSON values: strings, numbers, `true`, `false`,
/// `null` (and `undefined` as `null`), arrays and nested objects. Anything
/// else, such as function calls or spreads, is rejected.
pub fn parse_records(text: &str) -> Result<Vec<StoredRecord>> {
    let tokens = tokenize(text)?;
    let bounds = locate_array(&tokens)?;
    let mut parser = LiteralParser {
        tokens: &tokens[bounds.open + 1..bounds.close],
        pos: 0,
    };

    let mut records = Vec::new();
    while !parser.at_end() {
        match parser.value()? {
            Value::Object(fields) => records.push(StoredRecord { fields }),
            other => {
                return Err(Error::MalformedStore {
                    reason: format!("store entry is not an object literal: {other}"),
                });
            }
        }
        if !parser.at_end() {
            parser.expect(',')?;
        }
    }
    Ok(records)
}

struct LiteralParser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl LiteralParser<'_, '_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token<'_>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&Token<'_>> {
        let token = self.tokens.get(self.pos).ok_or_else(|| Error::MalformedStore {
            reason: "unexpected end of store array".to_string(),
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, c: char) -> Result<()> {
        let token = self.next()?;
        if token.is_punct(c) {
            Ok(())
        } else {
            Err(unexpected(token, &format!("`{c}`")))
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<Value> {
        if self.eat('-') {
            return match self.value()? {
                Value::Number(n) => negate(&n),
                other => Err(Error::MalformedStore {
                    reason: format!("cannot negate {other}"),
                }),
            };
        }

        let token = self.next()?.clone();
        match &token.kind {
            TokenKind::Str(value) => Ok(Value::String(value.clone())),
            TokenKind::Number(digits) => number(digits).ok_or_else(|| unexpected(&token, "number")),
            TokenKind::Ident("null" | "undefined") => Ok(Value::Null),
            TokenKind::Ident("true") => Ok(Value::Bool(true)),
            TokenKind::Ident("false") => Ok(Value::Bool(false)),
            TokenKind::Punct('[') => self.array(),
            TokenKind::Punct('{') => self.object(),
            _ => Err(unexpected(&token, "a literal value")),
        }
    }

    fn array(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        loop {
            if self.eat(']') {
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            if !self.eat(',') {
                self.expect(']')?;
                return Ok(Value::Array(items));
            }
        }
    }

    fn object(&mut self) -> Result<Value> {
        let mut fields = Map::new();
        loop {
            if self.eat('}') {
                return Ok(Value::Object(fields));
            }
            let key = self.next()?;
            let key = match &key.kind {
                TokenKind::Ident(name) => (*name).to_string(),
                TokenKind::Str(name) => name.clone(),
                TokenKind::Number(digits) => (*digits).to_string(),
                _ => return Err(unexpected(key, "an object key")),
            };
            self.expect(':')?;
            let value = self.value()?;
            fields.insert(key, value);
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(Value::Object(fields));
            }
        }
    }
}

fn number(digits: &str) -> Option<Value> {
    if let Ok(n) = digits.parse::<u64>() {
        return Some(Value::Number(n.into()));
    }
    digits
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn negate(n: &Number) -> Result<Value> {
    if let Some(v) = n.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::Number(v.into()));
    }
    n.as_f64()
        .and_then(|v| Number::from_f64(-v))
        .map(Value::Number)
        .ok_or_else(|| Error::MalformedStore {
            reason: format!("cannot negate {n}"),
        })
}

fn unexpected(token: &Token<'_>, wanted: &str) -> Error {
    Error::MalformedStore {
        reason: format!(
            "expected {wanted} at byte {}, found {:?}",
            token.start, token.kind
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORE: &str = r#"// Partners shown on the marketplace page.
export const partnersData = [
  {
    id: 1,
    name: "Двери Юга",
    category: "doors",
    address: "Краснодар, ул. Северная, 1",
    website: null,
    phones: ["79990000001"],
    description: "Межкомнатные двери, id: 900",
    logo: null,
    extraLabel: null,
  },
  {
    id: 2,
    name: "Plitka",
    category: "tile",
    address: "Krasnodar",
    website: "https://plitka.example",
    phones: null,
    description: "Tile /* not a comment */",
    logo: "img/plitka.png",
    extraLabel: "-10%",
  },
  // { id: 77 } was removed
  {
    id: 5,
    name: "Gap",
    category: "misc",
    address: "-",
    description: "x",
  },
];
"#;

    #[test]
    fn next_id_is_one_past_max() {
        assert_eq!(
            existing_ids(STORE).unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 2, 5]
        );
        assert_eq!(next_id(STORE).unwrap(), 6);
    }

    #[test]
    fn empty_store_starts_at_one() {
        assert_eq!(next_id("export const partnersData = [\n];\n").unwrap(), 1);
        assert_eq!(next_id("").unwrap(), 1);
    }

    #[test]
    fn ids_are_recognised_with_quoted_keys_and_no_spacing() {
        let ids = existing_ids(r#"[{"id":3},{ id:10 }];"#).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![3, 10]);
    }

    #[test]
    fn keys_ending_in_id_are_not_ids() {
        let ids = existing_ids("[{ uuid: 40, android: 41, id: 2 }];").unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn locates_the_trailing_array() {
        let src = "const other = [1, [2]];\nexport default [\n  { id: 1 },\n];\n";
        let tokens = tokenize(src).unwrap();
        let bounds = locate_array(&tokens).unwrap();
        assert_eq!(tokens[bounds.open].start, src.find("[\n").unwrap());
        assert!(tokens[bounds.close].is_punct(']'));
    }

    #[test]
    fn missing_closing_marker_is_malformed() {
        for src in ["[{ id: 1 }]", "[{ id: 1 }];\nconsole.log(1);", "{ id: 1 };"] {
            let tokens = tokenize(src).unwrap();
            assert!(
                matches!(locate_array(&tokens), Err(Error::MalformedStore { .. })),
                "{src}"
            );
        }
    }

    #[test]
    fn parses_records() {
        let records = parse_records(STORE).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].text("name"), Some("Двери Юга"));
        assert_eq!(records[0].phones(), vec!["79990000001".to_string()]);
        assert_eq!(records[1].phones(), Vec::<String>::new());
        assert_eq!(records[1].text("extraLabel"), Some("-10%"));
        assert_eq!(records[2].id(), Some(5));

        let partner = PartnerRecord::try_from(&records[1]).unwrap();
        assert_eq!(partner.website.as_deref(), Some("https://plitka.example"));
        assert_eq!(partner.logo.as_deref(), Some("img/plitka.png"));
        assert_eq!(partner.extra_label.as_deref(), Some("-10%"));
    }

    #[test]
    fn parses_nested_and_negative_values() {
        let records = parse_records("[{ id: 1, geo: { lat: 45.03, lng: -38.97 }, tags: [] },];")
            .unwrap();
        let geo = records[0].get("geo").unwrap();
        assert_eq!(geo["lng"].as_f64(), Some(-38.97));
        assert_eq!(records[0].get("tags"), Some(&Value::Array(vec![])));
    }

    #[test]
    fn rejects_non_literal_entries() {
        assert!(matches!(
            parse_records("[{ id: 1, name: lookup() }];"),
            Err(Error::MalformedStore { .. })
        ));
        assert!(matches!(
            parse_records("[1, 2];"),
            Err(Error::MalformedStore { .. })
        ));
    }
}
