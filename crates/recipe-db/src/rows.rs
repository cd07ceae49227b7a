//! Column decoding helpers shared by the repositories.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use recipe_models::{RecipeId, UnknownVariant, UserId};

use crate::error::{DbError, DbResult};

pub(crate) fn uuid(row: &SqliteRow, column: &str) -> DbResult<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| DbError::corrupt(format!("{column}: {e}")))
}

pub(crate) fn opt_uuid(row: &SqliteRow, column: &str) -> DbResult<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| DbError::corrupt(format!("{column}: {e}"))))
        .transpose()
}

pub(crate) fn user_id(row: &SqliteRow, column: &str) -> DbResult<UserId> {
    uuid(row, column).map(UserId)
}

pub(crate) fn recipe_id(row: &SqliteRow, column: &str) -> DbResult<RecipeId> {
    uuid(row, column).map(RecipeId)
}

/// Parses an enum column stored as text.
pub(crate) fn parsed<T>(row: &SqliteRow, column: &str) -> DbResult<T>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: UnknownVariant| DbError::corrupt(e.to_string()))
}

/// Escapes `%`, `_` and `\` for use in a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Pad Thai"), "%pad thai%");
        assert_eq!(like_pattern("100%_x"), "%100\\%\\_x%");
    }
}
