//! Motor de paginación por cursor.
//!
//! Se piden `page_size + 1` filas para saber si existe otra página más allá
//! de la pedida; la fila extra se recorta antes de devolver.
//!
//! | cursor   | escaneo                       | has_next_page | has_previous_page |
//! |----------|-------------------------------|---------------|-------------------|
//! | ninguno  | id DESC                       | fila extra    | false             |
//! | `before` | id DESC, id < before          | fila extra    | true              |
//! | `after`  | id ASC, id > after, invertido | true          | fila extra        |
//!
//! La salida siempre queda en id descendente. Reusar el id de borde de una
//! página, sin modificarlo, como cursor de la siguiente es la única forma de
//! recorrer un filtro sin huecos ni duplicados.
use log::{debug, error};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::page_spec::{PageSpec, RecordFilter};
use crate::config::GatewayConfig;
use crate::errors::LensError;
use crate::model::{Cursor, EpisodeRecord, FeedbackKind, FeedbackRecord, InferenceSummary, Page, PageRequest, Pageable};
use crate::query::{Direction, Predicate};
use crate::store::{decode_rows, QueryStore};

pub async fn query_page<T, S>(store: &S, spec: &PageSpec, request: &PageRequest) -> Result<Page<T>, LensError>
    where T: DeserializeOwned + Pageable,
          S: QueryStore + ?Sized
{
    let cursor = request.cursor()?;
    let page_size = request.page_size as usize;
    debug!("query_page:start source={} cursor={cursor:?} page_size={page_size}", spec.alias);

    let (predicate, direction) = match cursor {
        Cursor::Latest => (None, Direction::Desc),
        Cursor::Before(before) => (Some(Predicate::lt(spec.id_column, before)), Direction::Desc),
        Cursor::After(after) => (Some(Predicate::gt(spec.id_column, after)), Direction::Asc),
    };
    let select = spec.rows_select(predicate, direction, page_size as u64 + 1);
    let rows = store.fetch(&select).await.map_err(|e| {
                                               error!("query_page:fetch error cursor={cursor:?} err={e}");
                                               e
                                           })?;
    let mut items: Vec<T> = decode_rows(rows)?;
    let overflow = items.len() > page_size;
    // En ambos sentidos la fila extra es la más lejana al cursor: la última
    // del escaneo.
    items.truncate(page_size);
    items.sort_by_key(|item| std::cmp::Reverse(item.page_id()));

    let (has_next_page, has_previous_page) = match cursor {
        Cursor::Latest => (overflow, false),
        Cursor::Before(_) => (overflow, true),
        Cursor::After(_) => (true, overflow),
    };
    debug!("query_page:done source={} count={} has_next={has_next_page} has_previous={has_previous_page}",
           spec.alias,
           items.len());
    Ok(Page { items,
              has_next_page,
              has_previous_page })
}

/// Página de inferencias (todas las funciones y tipos) que cumplen `filter`.
pub async fn query_inference_page<S>(store: &S,
                                     config: &GatewayConfig,
                                     filter: &RecordFilter,
                                     request: &PageRequest)
                                     -> Result<Page<InferenceSummary>, LensError>
    where S: QueryStore + ?Sized
{
    let spec = PageSpec::inferences(config, filter)?;
    query_page(store, &spec, request).await
}

pub async fn query_episode_page<S>(store: &S,
                                   config: &GatewayConfig,
                                   filter: &RecordFilter,
                                   request: &PageRequest)
                                   -> Result<Page<EpisodeRecord>, LensError>
    where S: QueryStore + ?Sized
{
    let spec = PageSpec::episodes(config, filter)?;
    query_page(store, &spec, request).await
}

/// Feedback de un objetivo en la tabla `kind`, más reciente primero.
pub async fn query_feedback_page<S>(store: &S,
                                    config: &GatewayConfig,
                                    kind: FeedbackKind,
                                    target_id: Uuid,
                                    request: &PageRequest)
                                    -> Result<Page<FeedbackRecord>, LensError>
    where S: QueryStore + ?Sized
{
    let spec = PageSpec::feedback(config, kind, target_id)?;
    Ok(match kind {
        FeedbackKind::Boolean => query_page(store, &spec, request).await?.map(FeedbackRecord::Boolean),
        FeedbackKind::Float => query_page(store, &spec, request).await?.map(FeedbackRecord::Float),
        FeedbackKind::Demonstration => query_page(store, &spec, request).await?.map(FeedbackRecord::Demonstration),
    })
}
