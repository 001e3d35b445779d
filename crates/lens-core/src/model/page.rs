//! Tipos de paginación por cursor.
//!
//! Convención de presentación: toda página se entrega en orden descendente de
//! id (más reciente primero), sin importar la dirección del cursor que la
//! produjo.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_PAGE_SIZE;
use crate::errors::LensError;

/// Registro con un id ordenado en el tiempo que sirve de cursor.
pub trait Pageable {
    fn page_id(&self) -> Uuid;
}

/// Cursor ya validado: `before` y `after` son excluyentes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Sin cursor: primera página (lo más reciente).
    Latest,
    /// Filas con id estrictamente menor (más antiguas).
    Before(Uuid),
    /// Filas con id estrictamente mayor (más recientes).
    After(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_size: u32,
    #[serde(default)]
    pub before: Option<Uuid>,
    #[serde(default)]
    pub after: Option<Uuid>,
}

impl PageRequest {
    pub fn new(page_size: u32) -> Self {
        Self { page_size,
               before: None,
               after: None }
    }

    pub fn before(mut self, id: Uuid) -> Self {
        self.before = Some(id);
        self
    }

    pub fn after(mut self, id: Uuid) -> Self {
        self.after = Some(id);
        self
    }

    /// Valida tamaño de página y exclusividad de cursores.
    pub fn cursor(&self) -> Result<Cursor, LensError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(LensError::InvalidPageSize { got: self.page_size,
                                                    max: MAX_PAGE_SIZE });
        }
        match (self.before, self.after) {
            (Some(_), Some(_)) => Err(LensError::AmbiguousCursor),
            (Some(before), None) => Ok(Cursor::Before(before)),
            (None, Some(after)) => Ok(Cursor::After(after)),
            (None, None) => Ok(Cursor::Latest),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page { items: self.items.into_iter().map(f).collect(),
               has_next_page: self.has_next_page,
               has_previous_page: self.has_previous_page }
    }

    /// Id del último elemento (el más antiguo): cursor `before` de la
    /// siguiente página.
    pub fn last_id(&self) -> Option<Uuid>
        where T: Pageable
    {
        self.items.last().map(Pageable::page_id)
    }

    /// Id del primer elemento (el más reciente): cursor `after` de la página
    /// anterior.
    pub fn first_id(&self) -> Option<Uuid>
        where T: Pageable
    {
        self.items.first().map(Pageable::page_id)
    }
}

/// Extremos y cardinalidad de un filtro. Sin filas: ids nulos y `count = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub first_id: Option<Uuid>,
    pub last_id: Option<Uuid>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdjacentIds {
    pub previous_id: Option<Uuid>,
    pub next_id: Option<Uuid>,
}
