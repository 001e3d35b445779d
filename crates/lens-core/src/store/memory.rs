//! Backend en memoria con paridad 1:1 respecto a Postgres.
//!
//! Interpreta la IR directamente sobre tablas guardadas en un `DashMap`.
//! Sirve para tests y para desarrollo sin base de datos.
//!
//! Modo de merge diferido (`with_deferred_merge`): las escrituras quedan
//! pendientes e invisibles hasta `merge_pending()`, como el merge asíncrono
//! del almacén real. Con él se reproduce la carrera de deduplicación de
//! `materialize`.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::{QueryStore, Row};
use crate::errors::StoreError;
use crate::query::{Aggregate, AggregateFn, ColumnRef, Direction, Expr, InsertSelect, JoinKind, Predicate, Projection, Select, Source, Table};

/// Columna con la versión asignada por el almacén a cada fila escrita.
pub const VERSION_COLUMN: &str = "version";

pub struct InMemoryStore {
    tables: DashMap<String, Vec<Row>>,
    pending: DashMap<String, Vec<Row>>,
    deferred: bool,
    version: AtomicI64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Contexto de una sentencia: `now()` es constante dentro de ella.
struct StatementCtx {
    now: Value,
}

impl StatementCtx {
    fn new() -> Self {
        Self { now: Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)) }
    }
}

/// Resultado posicional: necesario para mapear la proyección a las columnas
/// de un INSERT.
struct ResultSet {
    columns: Vec<&'static str>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().map(|c| c.to_string()).zip(values).collect())
            .collect()
    }
}

type Scope = HashMap<&'static str, Option<Row>>;

impl InMemoryStore {
    pub fn new() -> Self {
        Self { tables: DashMap::new(),
               pending: DashMap::new(),
               deferred: false,
               version: AtomicI64::new(1) }
    }

    /// Las escrituras quedan pendientes hasta `merge_pending()`.
    pub fn with_deferred_merge() -> Self {
        Self { deferred: true,
               ..Self::new() }
    }

    /// Carga filas visibles de inmediato (fixtures), ignorando el modo
    /// diferido.
    pub fn seed(&self, table: &Table, rows: impl IntoIterator<Item = Row>) {
        let rows: Vec<Row> = rows.into_iter().map(|r| self.stamp(r)).collect();
        self.tables.entry(table.name().to_string()).or_default().extend(rows);
    }

    /// Hace visibles todas las escrituras pendientes; devuelve cuántas filas
    /// se movieron.
    pub fn merge_pending(&self) -> usize {
        let names: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut moved = 0;
        for name in names {
            if let Some((_, rows)) = self.pending.remove(&name) {
                moved += rows.len();
                self.tables.entry(name).or_default().extend(rows);
            }
        }
        moved
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(|e| e.value().len()).sum()
    }

    /// Cantidad de filas visibles en una tabla (todas las versiones).
    pub fn row_count(&self, table: &Table) -> usize {
        self.tables.get(table.name()).map(|r| r.len()).unwrap_or(0)
    }

    fn stamp(&self, mut row: Row) -> Row {
        if !row.contains_key(VERSION_COLUMN) {
            let v = self.version.fetch_add(1, AtomicOrdering::SeqCst);
            row.insert(VERSION_COLUMN.to_string(), Value::from(v));
        }
        row
    }

    fn write(&self, table: &Table, rows: Vec<Row>) -> u64 {
        let n = rows.len() as u64;
        let rows: Vec<Row> = rows.into_iter().map(|r| self.stamp(r)).collect();
        let target = if self.deferred { &self.pending } else { &self.tables };
        target.entry(table.name().to_string()).or_default().extend(rows);
        n
    }

    fn snapshot(&self, table: &Table) -> Vec<Row> {
        self.tables.get(table.name()).map(|r| r.value().clone()).unwrap_or_default()
    }

    fn eval_source(&self, source: &Source, ctx: &StatementCtx) -> Vec<Row> {
        match source {
            Source::Table(t) => self.snapshot(t),
            Source::Latest { table,
                             partition_by,
                             order_by,
                             key_filters, } => {
                let mut rows: Vec<Row> = self.snapshot(table)
                                             .into_iter()
                                             .filter(|r| {
                                                 key_filters.iter().all(|(name, lit)| {
                                                                       let v = r.get(*name).unwrap_or(&Value::Null);
                                                                       !v.is_null() && compare_values(v, &lit.to_json()) == Ordering::Equal
                                                                   })
                                             })
                                             .collect();
                rows.sort_by(|a, b| {
                        for key in order_by {
                            let ord = compare_values(a.get(key.column).unwrap_or(&Value::Null), b.get(key.column).unwrap_or(&Value::Null));
                            let ord = match key.direction {
                                Direction::Asc => ord,
                                Direction::Desc => ord.reverse(),
                            };
                            if ord != Ordering::Equal {
                                return ord;
                            }
                        }
                        Ordering::Equal
                    });
                let mut seen = std::collections::HashSet::new();
                rows.into_iter()
                    .filter(|r| {
                        let key: Vec<String> = partition_by.iter().map(|p| partition_key(r.get(*p))).collect();
                        seen.insert(key)
                    })
                    .collect()
            }
            Source::Subquery(select) => self.eval_select(select, ctx).into_rows(),
        }
    }

    fn eval_select(&self, select: &Select, ctx: &StatementCtx) -> ResultSet {
        let mut scopes: Vec<Scope> = self.eval_source(&select.source, ctx)
                                         .into_iter()
                                         .map(|row| Scope::from([(select.alias, Some(row))]))
                                         .collect();

        for join in &select.joins {
            let right = self.eval_source(&join.source, ctx);
            let mut joined = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let matches: Vec<&Row> = right.iter()
                                              .filter(|candidate| {
                                                  join.on.iter().all(|(left, right_col)| {
                                                                    let l = lookup(&scope, left);
                                                                    let r = candidate.get(right_col.name).unwrap_or(&Value::Null);
                                                                    !l.is_null() && !r.is_null() && compare_values(&l, r) == Ordering::Equal
                                                                })
                                              })
                                              .collect();
                if matches.is_empty() {
                    if join.kind == JoinKind::Left {
                        let mut s = scope.clone();
                        s.insert(join.alias, None);
                        joined.push(s);
                    }
                    continue;
                }
                for m in matches {
                    let mut s = scope.clone();
                    s.insert(join.alias, Some(m.clone()));
                    joined.push(s);
                }
            }
            scopes = joined;
        }

        scopes.retain(|scope| select.predicates.iter().all(|p| eval_predicate(scope, p)));

        let columns = select.projection.output_names();
        let mut rows: Vec<Vec<Value>> = match &select.projection {
            Projection::Columns(items) => {
                scopes.iter().map(|scope| items.iter().map(|(expr, _)| eval_expr(scope, expr, ctx)).collect()).collect()
            }
            Projection::Aggregates { group_by, items } => {
                let groups: Vec<(Option<Value>, Vec<&Scope>)> = match group_by {
                    None => vec![(None, scopes.iter().collect())],
                    Some((key, _)) => {
                        let mut order: Vec<String> = Vec::new();
                        let mut buckets: HashMap<String, (Value, Vec<&Scope>)> = HashMap::new();
                        for scope in &scopes {
                            let value = lookup(scope, key);
                            let k = partition_key(Some(&value));
                            let bucket = buckets.entry(k.clone()).or_insert_with(|| {
                                                                        order.push(k);
                                                                        (value, Vec::new())
                                                                    });
                            bucket.1.push(scope);
                        }
                        order.into_iter()
                             .filter_map(|k| buckets.remove(&k))
                             .map(|(value, members)| (Some(value), members))
                             .collect()
                    }
                };
                groups.into_iter()
                      .map(|(key, members)| {
                          key.into_iter()
                             .chain(items.iter().map(|(aggregate, _)| eval_aggregate(&members, aggregate)))
                             .collect()
                      })
                      .collect()
            }
        };

        if !select.order_by.is_empty() {
            let positions: Vec<(usize, Direction)> = select.order_by
                                                           .iter()
                                                           .filter_map(|t| columns.iter().position(|c| *c == t.column).map(|i| (i, t.direction)))
                                                           .collect();
            rows.sort_by(|a, b| {
                    for (i, direction) in &positions {
                        let ord = compare_values(&a[*i], &b[*i]);
                        let ord = match direction {
                            Direction::Asc => ord,
                            Direction::Desc => ord.reverse(),
                        };
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                });
        }
        let offset = select.offset.unwrap_or(0) as usize;
        let limit = select.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let rows = rows.into_iter().skip(offset).take(limit).collect();
        ResultSet { columns, rows }
    }
}

#[async_trait]
impl QueryStore for InMemoryStore {
    async fn fetch(&self, query: &Select) -> Result<Vec<Row>, StoreError> {
        let ctx = StatementCtx::new();
        Ok(self.eval_select(query, &ctx).into_rows())
    }

    async fn insert_select(&self, statement: &InsertSelect) -> Result<u64, StoreError> {
        let ctx = StatementCtx::new();
        let result = self.eval_select(&statement.select, &ctx);
        if result.columns.len() != statement.columns.len() {
            return Err(StoreError::new("insert_select",
                                       format!("INSERT has {} target columns but SELECT produces {}",
                                               statement.columns.len(),
                                               result.columns.len())));
        }
        let rows: Vec<Row> = result.rows
                                   .into_iter()
                                   .map(|values| statement.columns.iter().map(|c| c.to_string()).zip(values).collect())
                                   .collect();
        Ok(self.write(&statement.table, rows))
    }

    async fn insert_rows(&self, table: &Table, rows: &[Row]) -> Result<u64, StoreError> {
        Ok(self.write(table, rows.to_vec()))
    }
}

fn lookup(scope: &Scope, column: &ColumnRef) -> Value {
    match scope.get(column.alias) {
        Some(Some(row)) => row.get(column.name).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn eval_expr(scope: &Scope, expr: &Expr, ctx: &StatementCtx) -> Value {
    match expr {
        Expr::Column(c) => lookup(scope, c),
        Expr::Literal(l) => l.to_json(),
        Expr::Null(_) => Value::Null,
        Expr::Now => ctx.now.clone(),
        Expr::FreshId => Value::String(Uuid::now_v7().to_string()),
    }
}

/// Semántica SQL: una comparación contra NULL nunca se cumple.
fn eval_predicate(scope: &Scope, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Compare { column, op, value } => {
            let left = lookup(scope, column);
            !left.is_null() && op.matches(compare_values(&left, &value.to_json()))
        }
        Predicate::IsNull(c) => lookup(scope, c).is_null(),
        Predicate::IsNotNull(c) => !lookup(scope, c).is_null(),
    }
}

fn eval_aggregate(members: &[&Scope], aggregate: &Aggregate) -> Value {
    let selected: Vec<&&Scope> = members.iter()
                                        .filter(|s| aggregate.filter.as_ref().map(|p| eval_predicate(s, p)).unwrap_or(true))
                                        .collect();
    let values = || -> Vec<Value> {
        aggregate.column
                 .as_ref()
                 .map(|c| selected.iter().map(|s| lookup(s, c)).filter(|v| !v.is_null()).collect())
                 .unwrap_or_default()
    };
    match aggregate.func {
        AggregateFn::Count if aggregate.column.is_none() => Value::from(selected.len() as u64),
        AggregateFn::Count => Value::from(values().len() as u64),
        AggregateFn::CountDistinct => {
            let distinct: std::collections::HashSet<String> = values().iter().map(|v| partition_key(Some(v))).collect();
            Value::from(distinct.len() as u64)
        }
        AggregateFn::Min => values().into_iter().min_by(compare_values).unwrap_or(Value::Null),
        AggregateFn::Max => values().into_iter().max_by(compare_values).unwrap_or(Value::Null),
    }
}

fn partition_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "\u{0}null".to_string(),
        Some(Value::String(s)) => match Uuid::parse_str(s) {
            Ok(u) => u.to_string(),
            Err(_) => s.clone(),
        },
        Some(v) => v.to_string(),
    }
}

/// Orden total compatible con Postgres para los tipos que manejamos: uuid por
/// bytes, timestamps por instante, números por valor y NULL al final (ASC).
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => {
            if let (Ok(x), Ok(y)) = (Uuid::parse_str(x), Uuid::parse_str(y)) {
                return x.cmp(&y);
            }
            if let (Ok(x), Ok(y)) = (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                return x.cmp(&y);
            }
            x.cmp(y)
        }
        _ => a.to_string().cmp(&b.to_string()),
    }
}
