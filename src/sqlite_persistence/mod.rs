mod versioned_schema;

pub use versioned_schema::*;

/// Largest number of values bound in a single `IN (...)` list.
/// SQLite refuses statements with more than 32766 variables.
pub const IN_LIST_BATCH_SIZE: usize = 1000;

/// `?1, ?2, ..., ?count`
pub fn in_list_placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
