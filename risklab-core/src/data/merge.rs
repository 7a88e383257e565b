//! Merge layer: joins the market and macro tables onto one daily calendar.
//!
//! Steps: outer join on the union of dates, reindex to a contiguous daily
//! calendar, then forward-fill every column. Weekend and holiday rows
//! therefore repeat the last trading-day value, and a monthly series keeps
//! its last published value until the next release.

use crate::table::{SeriesTable, TableError};

/// Merge the two adapter tables.
///
/// Either side may be empty; both empty yields an empty table. Column names
/// must not collide.
pub fn merge_tables(
    market: &SeriesTable,
    macro_table: &SeriesTable,
) -> Result<SeriesTable, TableError> {
    let joined = match (market.is_empty(), macro_table.is_empty()) {
        (true, true) => return Ok(SeriesTable::empty()),
        (false, true) => market.clone(),
        (true, false) => macro_table.clone(),
        (false, false) => market.outer_join(macro_table)?,
    };
    Ok(joined.reindex_daily().forward_fill())
}
