//! Compilación de la IR al dialecto Postgres.
//!
//! Los identificadores siempre van entre comillas dobles y se validan; los
//! valores siempre se ligan como `$n`. No hay ruta por la que un valor de
//! usuario termine dentro del texto SQL.
use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde_json::Value;

use super::ir::{is_valid_identifier, Aggregate, AggregateFn, ColumnRef, Expr, InsertSelect, JoinKind, Literal, Predicate, Projection,
                Select, Source, Table, ValueType};
use crate::constants::ROW_NUMBER_COLUMN;
use crate::errors::LensError;
use crate::store::Row;

/// SQL listo para ejecutar con sus parámetros en orden (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Literal>,
}

const FETCH_ALIAS: &str = "lens_q";
const LATEST_INNER_ALIAS: &str = "lens_src";
const LATEST_OUTER_ALIAS: &str = "lens_ranked";

pub fn compile_select(select: &Select) -> Result<CompiledQuery, LensError> {
    let mut w = SqlWriter::default();
    w.select(select)?;
    Ok(w.finish())
}

/// Envuelve el select para que cada fila llegue como un objeto JSON
/// (`to_jsonb`) con las columnas de salida como claves.
pub fn compile_fetch(select: &Select) -> Result<CompiledQuery, LensError> {
    let mut w = SqlWriter::default();
    w.push("SELECT to_jsonb(");
    w.ident(FETCH_ALIAS)?;
    w.push(") AS \"row\" FROM (");
    w.select(select)?;
    w.push(") AS ");
    w.ident(FETCH_ALIAS)?;
    if !select.order_by.is_empty() {
        w.push(" ORDER BY ");
        for (i, term) in select.order_by.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(FETCH_ALIAS)?;
            w.push(".");
            w.ident(term.column)?;
            w.push(" ");
            w.push(term.direction.as_sql());
        }
    }
    Ok(w.finish())
}

pub fn compile_insert_select(insert: &InsertSelect) -> Result<CompiledQuery, LensError> {
    debug_assert_eq!(insert.columns.len(),
                     insert.select.projection.output_names().len(),
                     "insert columns must match projection arity");
    let mut w = SqlWriter::default();
    w.push("INSERT INTO ");
    w.table(&insert.table)?;
    w.push(" (");
    for (i, column) in insert.columns.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.ident(column)?;
    }
    w.push(") ");
    w.select(&insert.select)?;
    Ok(w.finish())
}

/// Inserta filas literales pasándolas como un único arreglo JSONB que
/// `jsonb_populate_recordset` tipa contra la propia tabla. Las columnas son
/// la unión de claves de las filas; las ausentes quedan a su DEFAULT.
pub fn compile_insert_rows(table: &Table, rows: &[Row]) -> Result<CompiledQuery, LensError> {
    let columns: BTreeSet<&str> = rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
    let mut w = SqlWriter::default();
    w.push("INSERT INTO ");
    w.table(table)?;
    w.push(" (");
    w.ident_list(&columns)?;
    w.push(") SELECT ");
    w.ident_list(&columns)?;
    w.push(" FROM jsonb_populate_recordset(NULL::");
    w.table(table)?;
    w.push(", ");
    let payload = Value::Array(rows.iter().cloned().map(Value::Object).collect());
    w.bind(&Literal::Json(payload));
    w.push(")");
    Ok(w.finish())
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<Literal>,
}

impl SqlWriter {
    fn finish(self) -> CompiledQuery {
        CompiledQuery { sql: self.sql,
                        params: self.params }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn bind(&mut self, literal: &Literal) {
        self.params.push(literal.clone());
        let _ = write!(self.sql, "${}", self.params.len());
    }

    fn bind_count(&mut self, n: u64) {
        self.bind(&Literal::Int(i64::try_from(n).unwrap_or(i64::MAX)));
    }

    fn ident(&mut self, name: &str) -> Result<(), LensError> {
        if !is_valid_identifier(name) {
            return Err(LensError::InvalidIdentifier(name.to_string()));
        }
        let _ = write!(self.sql, "\"{name}\"");
        Ok(())
    }

    fn ident_list(&mut self, names: &BTreeSet<&str>) -> Result<(), LensError> {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name)?;
        }
        Ok(())
    }

    fn table(&mut self, table: &Table) -> Result<(), LensError> {
        self.ident(table.name())
    }

    fn column(&mut self, column: &ColumnRef) -> Result<(), LensError> {
        self.ident(column.alias)?;
        self.push(".");
        self.ident(column.name)
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), LensError> {
        match expr {
            Expr::Column(c) => self.column(c)?,
            Expr::Literal(l) => self.bind(l),
            Expr::Null(t) => {
                self.push("NULL::");
                self.push(t.sql_name());
            }
            Expr::Now => self.push("now()"),
            Expr::FreshId => self.push("lens_uuid_v7()"),
        }
        Ok(())
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<(), LensError> {
        match predicate {
            Predicate::Compare { column, op, value } => {
                self.column(column)?;
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.bind(value);
            }
            Predicate::IsNull(c) => {
                self.column(c)?;
                self.push(" IS NULL");
            }
            Predicate::IsNotNull(c) => {
                self.column(c)?;
                self.push(" IS NOT NULL");
            }
        }
        Ok(())
    }

    fn predicates(&mut self, predicates: &[Predicate]) -> Result<(), LensError> {
        for (i, p) in predicates.iter().enumerate() {
            if i > 0 {
                self.push(" AND ");
            }
            self.predicate(p)?;
        }
        Ok(())
    }

    fn aggregate(&mut self, aggregate: &Aggregate) -> Result<(), LensError> {
        // Postgres no define min/max para uuid; el texto canónico en minúsculas
        // ordena igual que los bytes bajo la collation "C", así que se agrega
        // como texto con esa collation fija.
        let via_text = aggregate.value_type == ValueType::Uuid && matches!(aggregate.func, AggregateFn::Min | AggregateFn::Max);
        if via_text {
            self.push("(");
        }
        match (aggregate.func, aggregate.column.as_ref()) {
            (AggregateFn::Count, None) => self.push("count(*)"),
            (AggregateFn::Count, Some(c)) => {
                self.push("count(");
                self.column(c)?;
                self.push(")");
            }
            (AggregateFn::CountDistinct, Some(c)) => {
                self.push("count(DISTINCT ");
                self.column(c)?;
                self.push(")");
            }
            (AggregateFn::Min, Some(c)) | (AggregateFn::Max, Some(c)) => {
                self.push(if aggregate.func == AggregateFn::Min { "min(" } else { "max(" });
                self.column(c)?;
                if via_text {
                    self.push("::text COLLATE \"C\"");
                }
                self.push(")");
            }
            (func, None) => return Err(LensError::InvalidIdentifier(format!("{func:?} requires a column"))),
        }
        if let Some(filter) = &aggregate.filter {
            self.push(" FILTER (WHERE ");
            self.predicate(filter)?;
            self.push(")");
        }
        if via_text {
            self.push(")::uuid");
        }
        Ok(())
    }

    fn source(&mut self, source: &Source) -> Result<(), LensError> {
        match source {
            Source::Table(t) => self.table(t)?,
            Source::Latest { table,
                             partition_by,
                             order_by,
                             key_filters, } => {
                self.push("(SELECT * FROM (SELECT ");
                self.ident(LATEST_INNER_ALIAS)?;
                self.push(".*, ROW_NUMBER() OVER (");
                if !partition_by.is_empty() {
                    self.push("PARTITION BY ");
                    for (i, name) in partition_by.iter().enumerate() {
                        if i > 0 {
                            self.push(", ");
                        }
                        self.ident(LATEST_INNER_ALIAS)?;
                        self.push(".");
                        self.ident(name)?;
                    }
                }
                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        self.push(" ");
                    }
                    self.push("ORDER BY ");
                    for (i, key) in order_by.iter().enumerate() {
                        if i > 0 {
                            self.push(", ");
                        }
                        self.ident(LATEST_INNER_ALIAS)?;
                        self.push(".");
                        self.ident(key.column)?;
                        self.push(" ");
                        self.push(key.direction.as_sql());
                    }
                }
                self.push(") AS ");
                self.ident(ROW_NUMBER_COLUMN)?;
                self.push(" FROM ");
                self.table(table)?;
                self.push(" AS ");
                self.ident(LATEST_INNER_ALIAS)?;
                for (i, (name, value)) in key_filters.iter().enumerate() {
                    self.push(if i == 0 { " WHERE " } else { " AND " });
                    self.ident(LATEST_INNER_ALIAS)?;
                    self.push(".");
                    self.ident(name)?;
                    self.push(" = ");
                    self.bind(value);
                }
                self.push(") AS ");
                self.ident(LATEST_OUTER_ALIAS)?;
                self.push(" WHERE ");
                self.ident(LATEST_OUTER_ALIAS)?;
                self.push(".");
                self.ident(ROW_NUMBER_COLUMN)?;
                self.push(" = 1)");
            }
            Source::Subquery(select) => {
                self.push("(");
                self.select(select)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn select(&mut self, select: &Select) -> Result<(), LensError> {
        self.push("SELECT ");
        match &select.projection {
            Projection::Columns(items) => {
                for (i, (expr, name)) in items.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(expr)?;
                    self.push(" AS ");
                    self.ident(name)?;
                }
            }
            Projection::Aggregates { group_by, items } => {
                let mut first = true;
                if let Some((key, name)) = group_by {
                    self.column(key)?;
                    self.push(" AS ");
                    self.ident(name)?;
                    first = false;
                }
                for (aggregate, name) in items {
                    if !first {
                        self.push(", ");
                    }
                    first = false;
                    self.aggregate(aggregate)?;
                    self.push(" AS ");
                    self.ident(name)?;
                }
            }
        }
        self.push(" FROM ");
        self.source(&select.source)?;
        self.push(" AS ");
        self.ident(select.alias)?;
        for join in &select.joins {
            self.push(match join.kind {
                          JoinKind::Inner => " INNER JOIN ",
                          JoinKind::Left => " LEFT JOIN ",
                      });
            self.source(&join.source)?;
            self.push(" AS ");
            self.ident(join.alias)?;
            self.push(" ON ");
            if join.on.is_empty() {
                self.push("TRUE");
            }
            for (i, (left, right)) in join.on.iter().enumerate() {
                if i > 0 {
                    self.push(" AND ");
                }
                self.column(left)?;
                self.push(" = ");
                self.column(right)?;
            }
        }
        if !select.predicates.is_empty() {
            self.push(" WHERE ");
            self.predicates(&select.predicates)?;
        }
        if let Projection::Aggregates { group_by: Some((key, _)), .. } = &select.projection {
            self.push(" GROUP BY ");
            self.column(key)?;
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, term) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.ident(term.column)?;
                self.push(" ");
                self.push(term.direction.as_sql());
            }
        }
        if let Some(limit) = select.limit {
            self.push(" LIMIT ");
            self.bind_count(limit);
        }
        if let Some(offset) = select.offset {
            self.push(" OFFSET ");
            self.bind_count(offset);
        }
        Ok(())
    }
}
