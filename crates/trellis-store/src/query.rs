//! Query predicates
//!
//! The core only needs two predicate forms: field equality and "any of the
//! related ids equals X". Both reduce to matching against the values a
//! document reports for a named field. Predicates in one query are ANDed.

/// A filtered query over a document collection
#[derive(Debug, Clone, Default)]
pub struct Query {
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone)]
enum Predicate {
    /// At least one value of `field` equals `value`.
    Eq { field: &'static str, value: String },
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`. For multi-valued fields this is
    /// the "any of related ids equals" form.
    pub fn field_eq(mut self, field: &'static str, value: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Eq {
            field,
            value: value.into(),
        });
        self
    }

    /// Evaluate this query against one document's field values.
    pub fn matches(&self, fields: impl Fn(&str) -> Vec<String>) -> bool {
        self.predicates.iter().all(|p| match p {
            Predicate::Eq { field, value } => fields(field).iter().any(|v| v == value),
        })
    }
}
