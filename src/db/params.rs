//! Named parameter rewriting and binding.
//!
//! Templates name their parameters `:name`. Before execution the names are
//! replaced by the backend's positional placeholder (`@P1`, `$1`, `?`, `?1`) and
//! the values are bound in placeholder order. Values never reach the SQL text.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, NamedParams, QueryParam};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// A template rewritten for one backend, with values in placeholder order.
#[derive(Debug)]
pub struct BoundStatement<'p> {
    pub sql: String,
    pub values: Vec<&'p QueryParam>,
}

impl BoundStatement<'_> {
    /// A statement with no parameters, run as written.
    pub fn plain(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            values: Vec::new(),
        }
    }
}

fn placeholder(db_type: DatabaseType, position: usize) -> String {
    match db_type {
        DatabaseType::MsSql => format!("@P{}", position),
        DatabaseType::PostgreSQL => format!("${}", position),
        DatabaseType::MySQL => "?".to_string(),
        DatabaseType::SQLite => format!("?{}", position),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace each `:name` outside literals and comments with a positional placeholder.
///
/// Every referenced name must be present in `params`; unreferenced entries are
/// ignored. `::` casts are left alone.
pub fn rewrite_named<'p>(
    sql: &str,
    db_type: DatabaseType,
    params: &'p NamedParams,
) -> DbResult<BoundStatement<'p>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let backslashes = db_type == DatabaseType::MySQL
                    || (c == '\''
                        && db_type == DatabaseType::PostgreSQL
                        && is_escape_prefix(&chars, i));
                i = copy_quoted(&chars, i, c, backslashes, &mut out);
            }
            '`' => {
                i = copy_quoted(&chars, i, c, false, &mut out);
            }
            '$' if db_type == DatabaseType::PostgreSQL => {
                i = copy_dollar_quoted(&chars, i, &mut out);
            }
            '[' if db_type == DatabaseType::MsSql => {
                i = copy_quoted(&chars, i, ']', false, &mut out);
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                out.push_str("/*");
                i += 2;
                while i < chars.len() {
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        out.push_str("*/");
                        i += 2;
                        break;
                    }
                    out.push(chars[i]);
                    i += 1;
                }
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).copied().is_some_and(is_name_start) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let value = params.get(&name).ok_or_else(|| {
                    DbError::invalid_input(format!("Missing value for parameter ':{}'", name))
                })?;
                values.push(value);
                out.push_str(&placeholder(db_type, values.len()));
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(BoundStatement { sql: out, values })
}

/// Copy a quoted run starting at `start` up to and including its closing
/// character. A doubled closing character is an escape, and so is a backslash
/// when `backslashes` is set.
fn copy_quoted(
    chars: &[char],
    start: usize,
    close: char,
    backslashes: bool,
    out: &mut String,
) -> usize {
    out.push(chars[start]);
    let mut i = start + 1;
    while i < chars.len() {
        out.push(chars[i]);
        if backslashes && chars[i] == '\\' {
            if let Some(&next) = chars.get(i + 1) {
                out.push(next);
            }
            i += 2;
            continue;
        }
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                out.push(close);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i.min(chars.len())
}

/// PostgreSQL `E'...'` strings honor backslash escapes.
fn is_escape_prefix(chars: &[char], quote: usize) -> bool {
    quote >= 1
        && matches!(chars[quote - 1], 'E' | 'e')
        && (quote < 2 || !is_name_char(chars[quote - 2]))
}

/// Copy a PostgreSQL dollar-quoted body (`$$...$$` or `$tag$...$tag$`)
/// verbatim. A `$` that does not open a tag, such as `$1`, is copied alone.
fn copy_dollar_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    // `a$b$` is an identifier, not a tag
    if start > 0 && is_name_char(chars[start - 1]) {
        out.push('$');
        return start + 1;
    }

    let mut tag_end = start + 1;
    if chars.get(tag_end).copied().is_some_and(is_name_start) {
        while tag_end < chars.len() && is_name_char(chars[tag_end]) {
            tag_end += 1;
        }
    }
    if chars.get(tag_end) != Some(&'$') {
        out.push('$');
        return start + 1;
    }

    let tag = &chars[start..=tag_end];
    let mut i = tag_end + 1;
    while i < chars.len() {
        if chars[i..].starts_with(tag) {
            i += tag.len();
            out.extend(&chars[start..i]);
            return i;
        }
        i += 1;
    }
    // Unterminated body runs to the end
    out.extend(&chars[start..]);
    chars.len()
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a SQL Server query.
pub(crate) fn bind_mssql_param<'q>(query: &mut tiberius::Query<'q>, param: &'q QueryParam) {
    match param {
        QueryParam::Null => query.bind(Option::<&str>::None),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}
