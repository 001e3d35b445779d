use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::LensError;

/// Identificador válido: ASCII alfanumérico o `_`, sin dígito inicial.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Tabla física validada. Los nombres vienen de configuración, por eso se
/// validan al construirse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table(String);

impl Table {
    pub fn new(name: impl Into<String>) -> Result<Self, LensError> {
        let name = name.into();
        if !is_valid_identifier(&name) {
            return Err(LensError::InvalidIdentifier(name));
        }
        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Columna calificada por el alias de su fuente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub alias: &'static str,
    pub name: &'static str,
}

pub const fn col(alias: &'static str, name: &'static str) -> ColumnRef {
    ColumnRef { alias, name }
}

/// Valor ligado como parámetro.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Uuid(Uuid),
    Bool(bool),
    Float(f64),
    Int(i64),
    Json(Value),
    Timestamp(DateTime<Utc>),
}

impl Literal {
    /// Representación JSON, la misma que produce `to_jsonb` en Postgres.
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Text(s) => Value::String(s.clone()),
            Literal::Uuid(u) => Value::String(u.to_string()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Literal::Int(i) => Value::from(*i),
            Literal::Json(v) => v.clone(),
            Literal::Timestamp(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Text(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Text(v)
    }
}

impl From<Uuid> for Literal {
    fn from(v: Uuid) -> Self {
        Literal::Uuid(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

/// Tipo SQL, necesario para NULLs tipados y agregados sobre uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Uuid,
    Bool,
    Float,
    Int,
    Json,
    Timestamp,
}

impl ValueType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Uuid => "uuid",
            ValueType::Bool => "boolean",
            ValueType::Float => "double precision",
            ValueType::Int => "bigint",
            ValueType::Json => "jsonb",
            ValueType::Timestamp => "timestamptz",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Literal),
    Null(ValueType),
    /// Instante de la sentencia (constante para todas sus filas).
    Now,
    /// Id nuevo, ordenado en el tiempo, por fila.
    FreshId,
}

impl From<ColumnRef> for Expr {
    fn from(c: ColumnRef) -> Self {
        Expr::Column(c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }

    /// ¿`left <op> right` se cumple dado `left.cmp(right)`?
    pub fn matches(&self, ord: Ordering) -> bool {
        match self {
            Comparator::Eq => ord == Ordering::Equal,
            Comparator::Ne => ord != Ordering::Equal,
            Comparator::Lt => ord == Ordering::Less,
            Comparator::Le => ord != Ordering::Greater,
            Comparator::Gt => ord == Ordering::Greater,
            Comparator::Ge => ord != Ordering::Less,
        }
    }
}

impl FromStr for Comparator {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" => Ok(Comparator::Eq),
            "!=" | "<>" => Ok(Comparator::Ne),
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Ge),
            other => Err(LensError::InvalidMetricFilter(format!("unknown comparator {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: Comparator,
        value: Literal,
    },
    IsNull(ColumnRef),
    IsNotNull(ColumnRef),
}

impl Predicate {
    pub fn compare(column: ColumnRef, op: Comparator, value: impl Into<Literal>) -> Self {
        Predicate::Compare { column,
                             op,
                             value: value.into() }
    }

    pub fn eq(column: ColumnRef, value: impl Into<Literal>) -> Self {
        Self::compare(column, Comparator::Eq, value)
    }

    pub fn lt(column: ColumnRef, value: impl Into<Literal>) -> Self {
        Self::compare(column, Comparator::Lt, value)
    }

    pub fn gt(column: ColumnRef, value: impl Into<Literal>) -> Self {
        Self::compare(column, Comparator::Gt, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Orden sobre una columna de salida de la proyección.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: &'static str,
    pub direction: Direction,
}

/// Orden dentro de una partición de `Source::Latest` (columnas de la tabla).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: &'static str,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Table(Table),
    /// Primera fila de cada partición según `order_by`, en una sola pasada de
    /// ventana. `key_filters` se aplican antes de la ventana y sólo deben
    /// tocar columnas de `partition_by`, así no alteran qué fila queda arriba.
    Latest {
        table: Table,
        partition_by: Vec<&'static str>,
        order_by: Vec<SortKey>,
        key_filters: Vec<(&'static str, Literal)>,
    },
    Subquery(Box<Select>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    pub alias: &'static str,
    /// Igualdades `izquierda = derecha` combinadas con AND.
    pub on: Vec<(ColumnRef, ColumnRef)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    CountDistinct,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub func: AggregateFn,
    pub column: Option<ColumnRef>,
    pub value_type: ValueType,
    pub filter: Option<Predicate>,
}

impl Aggregate {
    pub fn count() -> Self {
        Self { func: AggregateFn::Count,
               column: None,
               value_type: ValueType::Int,
               filter: None }
    }

    pub fn count_distinct(column: ColumnRef) -> Self {
        Self { func: AggregateFn::CountDistinct,
               column: Some(column),
               value_type: ValueType::Int,
               filter: None }
    }

    pub fn min(column: ColumnRef, value_type: ValueType) -> Self {
        Self { func: AggregateFn::Min,
               column: Some(column),
               value_type,
               filter: None }
    }

    pub fn max(column: ColumnRef, value_type: ValueType) -> Self {
        Self { func: AggregateFn::Max,
               column: Some(column),
               value_type,
               filter: None }
    }

    /// Sólo agrega las filas que cumplen `predicate` (`FILTER (WHERE ...)`).
    pub fn filtered(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Columns(Vec<(Expr, &'static str)>),
    Aggregates {
        /// Clave de agrupación y su nombre de salida.
        group_by: Option<(ColumnRef, &'static str)>,
        items: Vec<(Aggregate, &'static str)>,
    },
}

impl Projection {
    /// Nombres de salida en orden.
    pub fn output_names(&self) -> Vec<&'static str> {
        match self {
            Projection::Columns(items) => items.iter().map(|(_, name)| *name).collect(),
            Projection::Aggregates { group_by, items } => {
                group_by.iter().map(|(_, name)| *name).chain(items.iter().map(|(_, name)| *name)).collect()
            }
        }
    }

    /// Proyección de columnas con el mismo nombre de salida que de origen.
    pub fn columns(alias: &'static str, names: &[&'static str]) -> Self {
        Projection::Columns(names.iter().map(|name| (Expr::Column(col(alias, name)), *name)).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub source: Source,
    pub alias: &'static str,
    pub joins: Vec<Join>,
    pub predicates: Vec<Predicate>,
    pub projection: Projection,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn from(source: Source, alias: &'static str, projection: Projection) -> Self {
        Self { source,
               alias,
               joins: Vec::new(),
               predicates: Vec::new(),
               projection,
               order_by: Vec::new(),
               limit: None,
               offset: None }
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order(mut self, column: &'static str, direction: Direction) -> Self {
        self.order_by.push(OrderTerm { column, direction });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// `INSERT INTO table (columns) SELECT ...`; la proyección del select debe
/// producir exactamente `columns`, en ese orden.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertSelect {
    pub table: Table,
    pub columns: Vec<&'static str>,
    pub select: Select,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert!(is_valid_identifier("chat_inference"));
        assert!(is_valid_identifier("_t1"));
        assert!(!is_valid_identifier("1table"));
        assert!(!is_valid_identifier("drop table;"));
        assert!(!is_valid_identifier("a\"b"));
        assert!(!is_valid_identifier(""));
        assert!(matches!(Table::new("x; DELETE"), Err(LensError::InvalidIdentifier(_))));
    }

    #[test]
    fn comparator_parses_and_matches() {
        assert_eq!(">=".parse::<Comparator>().unwrap(), Comparator::Ge);
        assert_eq!("<>".parse::<Comparator>().unwrap(), Comparator::Ne);
        assert!("~".parse::<Comparator>().is_err());
        assert!(Comparator::Le.matches(Ordering::Equal));
        assert!(!Comparator::Gt.matches(Ordering::Equal));
    }

    #[test]
    fn output_names_include_group_key() {
        let p = Projection::Aggregates { group_by: Some((col("i", "episode_id"), "episode_id")),
                                         items: vec![(Aggregate::count(), "count")] };
        assert_eq!(p.output_names(), vec!["episode_id", "count"]);
    }
}
