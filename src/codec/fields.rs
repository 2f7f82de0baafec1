use std::fmt::Display;
use std::str::FromStr;

use crate::codec::CodecError;

type EncodeFn<R> = Box<dyn Fn(&R) -> String + Send + Sync>;
type DecodeFn<R> = Box<dyn Fn(&mut R, String) -> Result<(), String> + Send + Sync>;
type EncodeRestFn<R> = Box<dyn Fn(&R) -> Vec<String> + Send + Sync>;
type DecodeRestFn<R> = Box<dyn Fn(&mut R, Vec<String>) + Send + Sync>;

struct Field<R> {
    name: &'static str,
    encode: EncodeFn<R>,
    decode: DecodeFn<R>,
}

struct RestField<R> {
    name: &'static str,
    encode: EncodeRestFn<R>,
    decode: DecodeRestFn<R>,
}

/// Statically declared column layout of a record type.
///
/// Columns are written and read strictly by position. An optional trailing
/// `rest` column soaks up any number of extra text fields.
pub struct FieldOrder<R> {
    fields: Vec<Field<R>>,
    rest: Option<RestField<R>>,
}

/// A record type that can travel through the pipeline as a delimited line.
///
/// Implementors usually keep the table in a `OnceLock` so it is built once:
///
/// ```
/// use std::sync::OnceLock;
/// use tuonella_groupsort::codec::{FieldOrder, LineRecord};
///
/// #[derive(Debug, Default, Clone, PartialEq)]
/// struct Sale {
///     region: String,
///     amount: i64,
/// }
///
/// impl LineRecord for Sale {
///     fn field_order() -> &'static FieldOrder<Self> {
///         static ORDER: OnceLock<FieldOrder<Sale>> = OnceLock::new();
///         ORDER.get_or_init(|| {
///             FieldOrder::<Sale>::builder()
///                 .text("region", |s| s.region.as_str(), |s, v| s.region = v)
///                 .parsed("amount", |s| s.amount, |s, v| s.amount = v)
///                 .build()
///         })
///     }
/// }
/// ```
pub trait LineRecord: Default + Sized + 'static {
    fn field_order() -> &'static FieldOrder<Self>;
}

impl<R: 'static> FieldOrder<R> {
    pub fn builder() -> FieldOrderBuilder<R> {
        FieldOrderBuilder {
            order: FieldOrder {
                fields: Vec::new(),
                rest: None,
            },
        }
    }

    /// Column names in line order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.fields.iter().map(|f| f.name).collect();
        if let Some(rest) = &self.rest {
            names.push(rest.name);
        }
        names
    }

    /// Number of fixed columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.rest.is_none()
    }

    pub fn has_rest(&self) -> bool {
        self.rest.is_some()
    }

    pub fn to_fields(&self, record: &R) -> Vec<String> {
        let mut values: Vec<String> = self.fields.iter().map(|f| (f.encode)(record)).collect();
        if let Some(rest) = &self.rest {
            values.extend((rest.encode)(record));
        }
        values
    }

    pub fn from_fields(&self, values: Vec<String>) -> Result<R, CodecError>
    where
        R: Default,
    {
        let fixed = self.fields.len();
        let count_ok = match self.rest {
            Some(_) => values.len() >= fixed,
            None => values.len() == fixed,
        };
        if !count_ok {
            return Err(CodecError::FieldCount {
                expected: fixed,
                found: values.len(),
                at_least: self.rest.is_some(),
            });
        }

        let mut record = R::default();
        let mut values = values.into_iter();
        for field in &self.fields {
            // Length was checked above.
            let value = values.next().unwrap_or_default();
            let raw = value.clone();
            (field.decode)(&mut record, value).map_err(|message| CodecError::InvalidField {
                field: field.name,
                value: raw,
                message,
            })?;
        }
        if let Some(rest) = &self.rest {
            (rest.decode)(&mut record, values.collect());
        }
        Ok(record)
    }
}

pub struct FieldOrderBuilder<R> {
    order: FieldOrder<R>,
}

impl<R: 'static> FieldOrderBuilder<R> {
    /// A text column copied through unchanged.
    pub fn text<G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        G: Fn(&R) -> &str + Send + Sync + 'static,
        S: Fn(&mut R, String) + Send + Sync + 'static,
    {
        self.order.fields.push(Field {
            name,
            encode: Box::new(move |r| get(r).to_string()),
            decode: Box::new(move |r, v| {
                set(r, v);
                Ok(())
            }),
        });
        self
    }

    /// A column rendered with `Display` and read back with `FromStr`.
    pub fn parsed<T, G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        T: FromStr + Display,
        T::Err: Display,
        G: Fn(&R) -> T + Send + Sync + 'static,
        S: Fn(&mut R, T) + Send + Sync + 'static,
    {
        self.order.fields.push(Field {
            name,
            encode: Box::new(move |r| get(r).to_string()),
            decode: Box::new(move |r, v| {
                let parsed = v.parse::<T>().map_err(|e| e.to_string())?;
                set(r, parsed);
                Ok(())
            }),
        });
        self
    }

    /// Like `parsed`, with the empty string standing for `None`.
    pub fn optional<T, G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        T: FromStr + Display,
        T::Err: Display,
        G: Fn(&R) -> Option<T> + Send + Sync + 'static,
        S: Fn(&mut R, Option<T>) + Send + Sync + 'static,
    {
        self.order.fields.push(Field {
            name,
            encode: Box::new(move |r| get(r).map(|v| v.to_string()).unwrap_or_default()),
            decode: Box::new(move |r, v| {
                if v.is_empty() {
                    set(r, None);
                } else {
                    let parsed = v.parse::<T>().map_err(|e| e.to_string())?;
                    set(r, Some(parsed));
                }
                Ok(())
            }),
        });
        self
    }

    /// Trailing variable-width text columns. Must come last.
    pub fn rest<G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        G: Fn(&R) -> &[String] + Send + Sync + 'static,
        S: Fn(&mut R, Vec<String>) + Send + Sync + 'static,
    {
        self.order.rest = Some(RestField {
            name,
            encode: Box::new(move |r| get(r).to_vec()),
            decode: Box::new(set),
        });
        self
    }

    pub fn build(self) -> FieldOrder<R> {
        self.order
    }
}
