//! Helpers for SQLite statements with long `IN (...)` lists.

/// Largest `IN (...)` list bound in a single statement.
///
/// SQLite caps bound parameters per statement (SQLITE_MAX_VARIABLE_NUMBER,
/// 999 on older builds). 500 leaves room for the other filters in a query.
pub const SQLITE_MAX_PARAMS_CHUNK: usize = 500;

/// Split `items` into slices of at most [`SQLITE_MAX_PARAMS_CHUNK`].
///
/// ```ignore
/// for chunk in chunk_for_sqlite(&symbols) {
///     rows.extend(load_for_symbols(conn, chunk)?);
/// }
/// ```
pub fn chunk_for_sqlite<T>(items: &[T]) -> impl Iterator<Item = &[T]> {
    items.chunks(SQLITE_MAX_PARAMS_CHUNK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_chunks_for_empty_input() {
        let symbols: Vec<String> = vec![];
        assert_eq!(chunk_for_sqlite(&symbols).count(), 0);
    }

    #[test]
    fn test_short_symbol_list_is_one_chunk() {
        let symbols: Vec<String> = (0..50).map(|i| format!("COIN{}", i)).collect();
        let chunks: Vec<_> = chunk_for_sqlite(&symbols).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 50);
    }

    #[test]
    fn test_long_list_splits_with_remainder() {
        let items: Vec<usize> = (0..SQLITE_MAX_PARAMS_CHUNK * 2 + 7).collect();
        let sizes: Vec<usize> = chunk_for_sqlite(&items).map(<[usize]>::len).collect();
        assert_eq!(sizes, vec![SQLITE_MAX_PARAMS_CHUNK, SQLITE_MAX_PARAMS_CHUNK, 7]);
    }
}
