//! Representación intermedia (IR) de consultas.
//!
//! Las operaciones no concatenan SQL: describen fuentes, joins, predicados y
//! proyecciones como datos. Cada backend interpreta la IR (memoria) o la
//! compila a su dialecto (`compile`, Postgres), siempre con valores ligados.

pub mod compile;
mod ir;

pub use compile::{compile_fetch, compile_insert_rows, compile_insert_select, compile_select, CompiledQuery};
pub use ir::{col, is_valid_identifier, Aggregate, AggregateFn, ColumnRef, Comparator, Direction, Expr, InsertSelect, Join, JoinKind,
             Literal, OrderTerm, Predicate, Projection, Select, SortKey, Source, Table, ValueType};
