//! Encoding of [`NewsDocument`] into Firestore typed values
//! (<https://firebase.google.com/docs/firestore/reference/rest/v1/Value>).
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{Error, NewsDocument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) enum Value {
    StringValue(String),
    /// 64 bit integers travel as decimal strings.
    IntegerValue(String),
    DoubleValue(f64),
    BooleanValue(bool),
    /// RFC 3339 timestamp.
    TimestampValue(String),
    NullValue(()),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::StringValue(value.to_owned())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::IntegerValue(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::BooleanValue(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::TimestampValue(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

pub(super) type Fields = BTreeMap<String, Value>;

/// Fields as read from the wire. Values are only interpreted when the
/// projection needs them, documents may carry fields of any other type.
pub(super) type RawFields = BTreeMap<String, serde_json::Value>;

pub(super) fn encode(doc: &NewsDocument) -> Fields {
    let mut fields = Fields::new();
    fields.insert("id".to_owned(), doc.id.as_str().into());
    fields.insert("title".to_owned(), doc.title.as_str().into());
    fields.insert("content".to_owned(), doc.content.as_str().into());
    fields.insert("source".to_owned(), doc.source.as_str().into());
    fields.insert("sourceName".to_owned(), doc.source_name.as_str().into());
    fields.insert("sourceUrl".to_owned(), doc.source_url.as_str().into());
    fields.insert("category".to_owned(), doc.category.as_str().into());
    fields.insert("priority".to_owned(), doc.priority.into());
    fields.insert("isBreaking".to_owned(), doc.is_breaking.into());
    fields.insert("publishedAt".to_owned(), doc.published_at.into());
    fields.insert("expiresAt".to_owned(), doc.expires_at.into());
    fields.insert("createdAt".to_owned(), doc.created_at.into());
    fields.insert("updatedAt".to_owned(), doc.updated_at.into());
    fields
}

/// Rebuilds a document from its fields. Missing fields take the same zero
/// values used by the projection, projected fields holding an unexpected type
/// are an error, fields outside the projection are ignored.
pub(super) fn decode(id: &str, fields: &RawFields) -> Result<NewsDocument, Error> {
    let reader = FieldReader { id, fields };

    Ok(NewsDocument {
        id: id.to_owned(),
        title: reader.string("title")?,
        content: reader.string("content")?,
        source: reader.string("source")?,
        source_name: reader.string("sourceName")?,
        source_url: reader.string("sourceUrl")?,
        category: reader.string("category")?,
        priority: reader.integer("priority")?,
        is_breaking: reader.boolean("isBreaking")?,
        published_at: reader.timestamp("publishedAt")?,
        expires_at: reader.timestamp("expiresAt")?,
        created_at: reader.timestamp("createdAt")?,
        updated_at: reader.timestamp("updatedAt")?,
    })
}

struct FieldReader<'a> {
    id: &'a str,
    fields: &'a RawFields,
}

impl FieldReader<'_> {
    fn malformed(&self, field: &str, msg: impl std::fmt::Display) -> Error {
        Error::MalformedDocument {
            id: self.id.to_owned(),
            msg: format!("field `{field}`: {msg}"),
        }
    }

    fn get(&self, field: &str) -> Result<Option<Value>, Error> {
        self.fields
            .get(field)
            .map(|raw| Value::deserialize(raw).map_err(|e| self.malformed(field, e)))
            .transpose()
    }

    fn string(&self, field: &str) -> Result<String, Error> {
        match self.get(field)? {
            None | Some(Value::NullValue(_)) => Ok(String::new()),
            Some(Value::StringValue(v)) => Ok(v),
            Some(other) => Err(self.malformed(field, format!("expected string, got {other:?}"))),
        }
    }

    fn integer(&self, field: &str) -> Result<i64, Error> {
        match self.get(field)? {
            None | Some(Value::NullValue(_)) => Ok(0),
            Some(Value::IntegerValue(v)) => v.parse().map_err(|e| self.malformed(field, e)),
            // written by clients that only know about doubles
            Some(Value::DoubleValue(v)) if v.fract() == 0.0 => Ok(v as i64),
            Some(other) => Err(self.malformed(field, format!("expected integer, got {other:?}"))),
        }
    }

    fn boolean(&self, field: &str) -> Result<bool, Error> {
        match self.get(field)? {
            None | Some(Value::NullValue(_)) => Ok(false),
            Some(Value::BooleanValue(v)) => Ok(v),
            Some(other) => Err(self.malformed(field, format!("expected boolean, got {other:?}"))),
        }
    }

    fn timestamp(&self, field: &str) -> Result<DateTime<Utc>, Error> {
        match self.get(field)? {
            None | Some(Value::NullValue(_)) => Ok(DateTime::<Utc>::UNIX_EPOCH),
            Some(Value::TimestampValue(v)) => DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| self.malformed(field, e)),
            Some(other) => Err(self.malformed(field, format!("expected timestamp, got {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn document() -> NewsDocument {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        NewsDocument {
            id: "12".to_owned(),
            title: "Sesame contract listed".to_owned(),
            content: "details".to_owned(),
            source: "internal".to_owned(),
            source_name: String::new(),
            source_url: String::new(),
            category: "announcement".to_owned(),
            priority: 10,
            is_breaking: true,
            published_at: at,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn typed_json() {
        let fields = encode(&document());
        let json = serde_json::to_value(&fields).unwrap();

        assert_eq!(json["title"]["stringValue"], "Sesame contract listed");
        assert_eq!(json["priority"]["integerValue"], "10");
        assert_eq!(json["isBreaking"]["booleanValue"], true);
        assert_eq!(json["publishedAt"]["timestampValue"], "2025-03-14T09:30:00Z");
        assert_eq!(json["expiresAt"]["timestampValue"], "1970-01-01T00:00:00Z");
    }

    fn raw(fields: &Fields) -> RawFields {
        serde_json::from_value(serde_json::to_value(fields).unwrap()).unwrap()
    }

    #[test]
    fn decode_encoded() {
        let doc = document();
        assert_eq!(decode("12", &raw(&encode(&doc))).unwrap(), doc);
    }

    #[test]
    fn decode_from_wire() {
        let fields: RawFields = serde_json::from_str(
            r#"{
                "title": {"stringValue": "Ticker"},
                "priority": {"integerValue": "3"},
                "isBreaking": {"booleanValue": false},
                "category": {"nullValue": null},
                "publishedAt": {"timestampValue": "2025-01-02T03:04:05.123456Z"}
            }"#,
        )
        .unwrap();

        let doc = decode("5", &fields).unwrap();
        assert_eq!(doc.id, "5");
        assert_eq!(doc.title, "Ticker");
        assert_eq!(doc.priority, 3);
        assert!(!doc.is_breaking);
        assert_eq!(doc.category, "");
        assert_eq!(doc.source_url, "");
        assert_eq!(
            doc.published_at,
            Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
                + chrono::Duration::microseconds(123456)
        );
    }

    #[test]
    fn decode_wrong_type() {
        let mut fields = raw(&encode(&document()));
        fields.insert(
            "priority".to_owned(),
            serde_json::json!({ "booleanValue": true }),
        );

        assert!(matches!(
            decode("12", &fields),
            Err(Error::MalformedDocument { .. })
        ));
    }

    #[test]
    fn decode_ignores_foreign_fields() {
        let mut fields = raw(&encode(&document()));
        fields.insert(
            "meta".to_owned(),
            serde_json::json!({ "mapValue": { "fields": { "editor": { "stringValue": "desk" } } } }),
        );
        fields.insert(
            "tags".to_owned(),
            serde_json::json!({ "arrayValue": { "values": [{ "stringValue": "market" }] } }),
        );
        fields.insert(
            "location".to_owned(),
            serde_json::json!({ "geoPointValue": { "latitude": 9.0, "longitude": 38.7 } }),
        );

        assert_eq!(decode("12", &fields).unwrap(), document());
    }

    #[test]
    fn decode_foreign_type_in_projected_field() {
        let mut fields = raw(&encode(&document()));
        fields.insert(
            "title".to_owned(),
            serde_json::json!({ "mapValue": { "fields": {} } }),
        );

        let err = decode("12", &fields).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { ref id, .. } if id == "12"));
    }

    #[test]
    fn decode_double_priority() {
        let mut fields = raw(&encode(&document()));
        fields.insert("priority".to_owned(), serde_json::json!({ "doubleValue": 4.0 }));
        assert_eq!(decode("12", &fields).unwrap().priority, 4);

        fields.insert("priority".to_owned(), serde_json::json!({ "doubleValue": 4.5 }));
        assert!(decode("12", &fields).is_err());
    }
}
