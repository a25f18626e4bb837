use serde::Serialize;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, types::Json};

/// Direction for sorting results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum SortKind {
    Text(SortDirection),
    Numeric(SortDirection),
}

/// One key of a sort specification. Text ordering compares the field as
/// text; numeric ordering casts it to `numeric` first.
#[derive(Clone, Debug)]
pub struct SortSpec {
    pub(crate) path: JsonPath,
    pub(crate) kind: SortKind,
}

impl SortSpec {
    pub fn text(path: impl Into<JsonPath>, direction: SortDirection) -> Self {
        Self {
            path: path.into(),
            kind: SortKind::Text(direction),
        }
    }

    pub fn numeric(path: impl Into<JsonPath>, direction: SortDirection) -> Self {
        Self {
            path: path.into(),
            kind: SortKind::Numeric(direction),
        }
    }

    pub(crate) fn push_sql(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match self.kind {
            SortKind::Text(direction) => {
                push_text_expr(builder, &self.path);
                builder.push(" ");
                builder.push(direction.as_str());
            }
            SortKind::Numeric(direction) => {
                builder.push("((");
                push_text_expr(builder, &self.path);
                builder.push(")::numeric) ");
                builder.push(direction.as_str());
            }
        }
    }
}

/// A field path expressed as segments compatible with Postgres' `#>` operator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JsonPath(Vec<String>);

impl JsonPath {
    fn parse_segmented(input: &str) -> Vec<String> {
        let mut segments = Vec::new();
        let mut buffer = String::new();
        let mut chars = input.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if !buffer.is_empty() {
                        segments.push(std::mem::take(&mut buffer));
                    }
                }
                '[' => {
                    if !buffer.is_empty() {
                        segments.push(std::mem::take(&mut buffer));
                    }
                    let mut index = String::new();
                    for next in chars.by_ref() {
                        if next == ']' {
                            break;
                        }
                        index.push(next);
                    }
                    if !index.is_empty() {
                        segments.push(index);
                    }
                }
                _ => buffer.push(ch),
            }
        }

        if !buffer.is_empty() {
            segments.push(buffer);
        }

        segments
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for JsonPath {
    fn from(value: &str) -> Self {
        Self(Self::parse_segmented(value))
    }
}

impl From<String> for JsonPath {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Vec<String>> for JsonPath {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl<'a> From<&'a [&'a str]> for JsonPath {
    fn from(value: &'a [&'a str]) -> Self {
        Self(value.iter().map(|segment| segment.to_string()).collect())
    }
}

/// JSONB predicate compiled against the `doc` column.
#[derive(Clone, Debug)]
pub enum Predicate {
    Eq {
        path: JsonPath,
        value: Value,
    },
    Ne {
        path: JsonPath,
        value: Value,
    },
    Gt {
        path: JsonPath,
        value: f64,
    },
    Ge {
        path: JsonPath,
        value: f64,
    },
    Lt {
        path: JsonPath,
        value: f64,
    },
    Le {
        path: JsonPath,
        value: f64,
    },
    GeText {
        path: JsonPath,
        value: String,
    },
    LeText {
        path: JsonPath,
        value: String,
    },
    In {
        path: JsonPath,
        values: Vec<Value>,
    },
    Nin {
        path: JsonPath,
        values: Vec<Value>,
    },
    Exists(JsonPath),
    Regex {
        path: JsonPath,
        pattern: String,
        case_insensitive: bool,
    },
    Between {
        path: JsonPath,
        low: f64,
        high: f64,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    fn to_value<T>(value: T) -> Value
    where
        T: Serialize,
    {
        serde_json::to_value(value).expect("serializable value")
    }

    pub fn eq(path: impl Into<JsonPath>, value: impl Serialize) -> Self {
        Self::Eq {
            path: path.into(),
            value: Self::to_value(value),
        }
    }

    pub fn ne(path: impl Into<JsonPath>, value: impl Serialize) -> Self {
        Self::Ne {
            path: path.into(),
            value: Self::to_value(value),
        }
    }

    pub fn gt(path: impl Into<JsonPath>, value: f64) -> Self {
        Self::Gt {
            path: path.into(),
            value,
        }
    }

    pub fn ge(path: impl Into<JsonPath>, value: f64) -> Self {
        Self::Ge {
            path: path.into(),
            value,
        }
    }

    pub fn lt(path: impl Into<JsonPath>, value: f64) -> Self {
        Self::Lt {
            path: path.into(),
            value,
        }
    }

    pub fn le(path: impl Into<JsonPath>, value: f64) -> Self {
        Self::Le {
            path: path.into(),
            value,
        }
    }

    /// Lexicographic `>=` on the field as text. Useful for RFC 3339
    /// timestamps, which order correctly as strings.
    pub fn ge_text(path: impl Into<JsonPath>, value: impl Into<String>) -> Self {
        Self::GeText {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Lexicographic `<=` on the field as text.
    pub fn le_text(path: impl Into<JsonPath>, value: impl Into<String>) -> Self {
        Self::LeText {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(path: impl Into<JsonPath>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        Self::In {
            path: path.into(),
            values: values.into_iter().map(Self::to_value).collect(),
        }
    }

    pub fn nin<I, V>(path: impl Into<JsonPath>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        Self::Nin {
            path: path.into(),
            values: values.into_iter().map(Self::to_value).collect(),
        }
    }

    pub fn exists(path: impl Into<JsonPath>) -> Self {
        Self::Exists(path.into())
    }

    pub fn regex(path: impl Into<JsonPath>, pattern: impl Into<String>) -> Self {
        Self::Regex {
            path: path.into(),
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    pub fn iregex(path: impl Into<JsonPath>, pattern: impl Into<String>) -> Self {
        Self::Regex {
            path: path.into(),
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }

    pub fn between(path: impl Into<JsonPath>, low: f64, high: f64) -> Self {
        Self::Between {
            path: path.into(),
            low,
            high,
        }
    }

    pub fn negate(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    pub fn and(predicates: Vec<Predicate>) -> Self {
        Self::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Self {
        Self::Or(predicates)
    }

    pub(crate) fn push_sql(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Predicate::Eq { path, value } => {
                builder.push("(");
                push_json_expr(builder, path);
                builder.push(" = ");
                builder.push_bind(Json(value.clone()));
                builder.push(")");
            }
            Predicate::Ne { path, value } => {
                builder.push("(");
                push_json_expr(builder, path);
                builder.push(" <> ");
                builder.push_bind(Json(value.clone()));
                builder.push(")");
            }
            Predicate::Gt { path, value } => push_numeric_cmp(builder, path, *value, ">"),
            Predicate::Ge { path, value } => push_numeric_cmp(builder, path, *value, ">="),
            Predicate::Lt { path, value } => push_numeric_cmp(builder, path, *value, "<"),
            Predicate::Le { path, value } => push_numeric_cmp(builder, path, *value, "<="),
            Predicate::GeText { path, value } => push_text_cmp(builder, path, value, ">="),
            Predicate::LeText { path, value } => push_text_cmp(builder, path, value, "<="),
            Predicate::In { path, values } => {
                if values.is_empty() {
                    builder.push("false");
                } else {
                    builder.push("(");
                    push_json_expr(builder, path);
                    builder.push(" in (");
                    let mut separated = builder.separated(", ");
                    for value in values {
                        separated.push_bind(Json(value.clone()));
                    }
                    builder.push(")");
                    builder.push(")");
                }
            }
            Predicate::Nin { path, values } => {
                if values.is_empty() {
                    builder.push("true");
                } else {
                    // Absent fields evaluate to SQL null, which `not in`
                    // would swallow. A listed json `null` excludes missing
                    // fields as well, matching the store's semantics.
                    let null_listed = values.iter().any(Value::is_null);
                    let rest: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
                    builder.push("(");
                    if null_listed {
                        push_json_expr(builder, path);
                        builder.push(" is not null and ");
                        push_json_expr(builder, path);
                        builder.push(" <> 'null'::jsonb");
                        for value in rest {
                            builder.push(" and ");
                            push_json_expr(builder, path);
                            builder.push(" <> ");
                            builder.push_bind(Json(value.clone()));
                        }
                    } else {
                        push_json_expr(builder, path);
                        builder.push(" is null or (");
                        for (i, value) in rest.iter().enumerate() {
                            if i > 0 {
                                builder.push(" and ");
                            }
                            push_json_expr(builder, path);
                            builder.push(" <> ");
                            builder.push_bind(Json((*value).clone()));
                        }
                        builder.push(")");
                    }
                    builder.push(")");
                }
            }
            Predicate::Exists(path) => {
                builder.push("(");
                push_json_expr(builder, path);
                builder.push(" is not null)");
            }
            Predicate::Regex {
                path,
                pattern,
                case_insensitive,
            } => {
                builder.push("(");
                push_text_expr(builder, path);
                builder.push(if *case_insensitive { " ~* " } else { " ~ " });
                builder.push_bind(pattern.clone());
                builder.push(")");
            }
            Predicate::Between { path, low, high } => {
                builder.push("((");
                push_text_expr(builder, path);
                builder.push(")::numeric between ");
                builder.push_bind(*low);
                builder.push(" and ");
                builder.push_bind(*high);
                builder.push(")");
            }
            Predicate::Not(inner) => {
                builder.push("not (");
                inner.push_sql(builder);
                builder.push(")");
            }
            Predicate::And(predicates) => {
                if predicates.is_empty() {
                    builder.push("true");
                } else {
                    builder.push("(");
                    let mut iter = predicates.iter();
                    if let Some(first) = iter.next() {
                        first.push_sql(builder);
                    }
                    for predicate in iter {
                        builder.push(" and ");
                        predicate.push_sql(builder);
                    }
                    builder.push(")");
                }
            }
            Predicate::Or(predicates) => {
                if predicates.is_empty() {
                    builder.push("false");
                } else {
                    builder.push("(");
                    let mut iter = predicates.iter();
                    if let Some(first) = iter.next() {
                        first.push_sql(builder);
                    }
                    for predicate in iter {
                        builder.push(" or ");
                        predicate.push_sql(builder);
                    }
                    builder.push(")");
                }
            }
        }
    }
}

/// Conjunction of predicates. The empty filter matches every document.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for the empty, match-all filter.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn and_if(mut self, condition: bool, predicate: impl FnOnce() -> Predicate) -> Self {
        if condition {
            self.predicates.push(predicate());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub(crate) fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub(crate) fn push_sql(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        let mut iter = self.predicates.iter();
        if let Some(first) = iter.next() {
            first.push_sql(builder);
        }
        for predicate in iter {
            builder.push(" and ");
            predicate.push_sql(builder);
        }
    }
}

impl From<Predicate> for Filter {
    fn from(predicate: Predicate) -> Self {
        Self {
            predicates: vec![predicate],
        }
    }
}

pub(crate) fn push_json_expr(builder: &mut QueryBuilder<'_, Postgres>, path: &JsonPath) {
    builder.push("doc #> ");
    builder.push_bind(path.parts().to_vec());
}

pub(crate) fn push_text_expr(builder: &mut QueryBuilder<'_, Postgres>, path: &JsonPath) {
    builder.push("doc #>> ");
    builder.push_bind(path.parts().to_vec());
}

fn push_numeric_cmp(
    builder: &mut QueryBuilder<'_, Postgres>,
    path: &JsonPath,
    value: f64,
    op: &str,
) {
    builder.push("((");
    push_text_expr(builder, path);
    builder.push(")::numeric ");
    builder.push(op);
    builder.push(" ");
    builder.push_bind(value);
    builder.push(")");
}

fn push_text_cmp(
    builder: &mut QueryBuilder<'_, Postgres>,
    path: &JsonPath,
    value: &str,
    op: &str,
) {
    builder.push("(");
    push_text_expr(builder, path);
    builder.push(" ");
    builder.push(op);
    builder.push(" ");
    builder.push_bind(value.to_string());
    builder.push(")");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_parses_dots_and_brackets() {
        let path = JsonPath::from("profile.addresses[0].city");
        assert_eq!(path.parts(), ["profile", "addresses", "0", "city"]);
    }

    #[test]
    fn empty_filter_matches_all() {
        assert!(Filter::new().is_empty());
        assert!(!Filter::from(Predicate::exists("id")).is_empty());
    }

    #[test]
    fn in_with_no_values_compiles_to_false() {
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new("");
        Predicate::is_in("id", Vec::<String>::new()).push_sql(&mut builder);
        assert_eq!(builder.sql(), "false");
    }

    #[test]
    fn nin_excludes_null_only_when_listed() {
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new("");
        Predicate::nin("brand_name", vec![serde_json::Value::Null, serde_json::json!("-")])
            .push_sql(&mut builder);
        let sql = builder.sql();
        assert!(sql.contains("is not null"));
        assert!(sql.contains("<>"));
    }
}
