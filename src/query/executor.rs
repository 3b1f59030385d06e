use log::{debug, trace};

use crate::{
    catalog::Catalog,
    codec::unflatten,
    document::Document,
    engine::{self, Connection, ResultSet},
    error::StorageError,
    evaluator::Evaluator,
    settings::Settings,
    sql::Sql,
};

use super::pushdown::pushdown;

/// Finds the documents matching `criteria`, in engine order.
///
/// The engine narrows the candidates with the pushed-down filter; each candidate is then
/// decoded and checked against the full criteria. At most `max_docs` matches are kept,
/// `0` meaning no cap.
pub fn execute<E: Evaluator + ?Sized>(
    conn: &mut dyn Connection,
    settings: &Settings,
    catalog: &Catalog,
    evaluator: &E,
    criteria: &Document,
    max_docs: usize,
) -> Result<Vec<Document>, StorageError> {
    if !catalog.table_exists() {
        debug!("table {} does not exist, nothing to read", settings.table);
        return Ok(Vec::new());
    }

    let mut sql = Sql::new("SELECT * FROM ");
    sql.table(&settings.database, &settings.table);
    if let Some(filter) = pushdown(criteria, catalog) {
        sql.push(" WHERE ").append(filter);
    }

    let ResultSet { columns, rows, .. } = engine::run(conn, &sql)?;
    let candidates = rows.len();

    let mut matches = Vec::new();
    for row in rows {
        let document = unflatten(&columns, row)?;
        if !evaluator.matches(&document, criteria)? {
            trace!("rejected {document:?}");
            continue;
        }
        matches.push(document);
        if max_docs > 0 && matches.len() >= max_docs {
            break;
        }
    }

    debug!("{} of {candidates} candidate rows matched", matches.len());
    Ok(matches)
}
