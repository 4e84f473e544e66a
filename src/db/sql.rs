//! Identifiers and literals are quoted here, values go through bind parameters.
//!
//! Postgres utility statements (`CREATE ROLE ... PASSWORD`, `COMMENT ON`) do not
//! accept bind parameters, so those use [`Literal`] instead.

use std::fmt::Display;

use itertools::Itertools;

/// A quoted SQL identifier: database, schema, table, column, index or role name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident<'a>(pub &'a str);

impl Display for Ident<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.0.replace('"', "\"\""))
    }
}

/// `schema.table`, both parts quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName<'a> {
    pub schema: &'a str,
    pub name: &'a str,
}

impl Display for QualifiedName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", Ident(self.schema), Ident(self.name))
    }
}

/// A quoted string literal, same rules as libpq's `PQescapeLiteral`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal<'a>(pub &'a str);

impl Display for Literal<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let escaped = self.0.replace('\'', "''");
        if escaped.contains('\\') {
            write!(f, "E'{}'", escaped.replace('\\', "\\\\"))
        } else {
            write!(f, "'{}'", escaped)
        }
    }
}

/// Comma separated list of quoted identifiers.
pub fn ident_list<S: AsRef<str>>(names: &[S]) -> String {
    names.iter().map(|n| Ident(n.as_ref()).to_string()).join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Int(i32),
    Text(String),
    TextArray(Vec<String>),
}

/// One SQL statement with its bind parameters (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}
