// dbmagic/src/database/statements.rs
//! Administrative statements issued during diagnosis.
//!
//! `CREATE USER`, `CREATE DATABASE` and `GRANT` cannot take bound parameters for
//! identifiers, so every identifier is allow-listed first and then quoted.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::errors::{AppError, Result};

/// Privileges granted to the application user on its schema.
pub const SCHEMA_PRIVILEGES: &[&str] = &[
    "CREATE ROUTINE",
    "CREATE VIEW",
    "ALTER",
    "SHOW VIEW",
    "CREATE",
    "ALTER ROUTINE",
    "EVENT",
    "INSERT",
    "SELECT",
    "DELETE",
    "TRIGGER",
    "REFERENCES",
    "UPDATE",
    "DROP",
    "EXECUTE",
    "LOCK TABLES",
    "CREATE TEMPORARY TABLES",
    "INDEX",
];

pub const SCHEMA_CHARACTER_SET: &str = "utf8";

const MAX_SCHEMA_LEN: usize = 64;
const MAX_USER_LEN: usize = 32;
const MAX_HOST_LEN: usize = 255;

static SCHEMA_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_$-]+$").expect("valid schema pattern"));
static USER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.$-]+$").expect("valid user pattern"));
static HOST_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.%:-]+$").expect("valid host pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    CreateUser {
        username: String,
        host: String,
        password: String,
    },
    CreateDatabase {
        schema: String,
    },
    GrantSchemaPrivileges {
        schema: String,
        username: String,
        host: String,
    },
    FlushPrivileges,
}

/// A validated statement ready to be sent over the text protocol.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminStatement {
    action: AdminAction,
    sql: String,
}

impl AdminStatement {
    #[cfg(test)]
    pub fn action(&self) -> &AdminAction {
        &self.action
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

// Display and Debug never show the password literal.
impl fmt::Display for AdminStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            AdminAction::CreateUser { username, host, .. } => write!(
                f,
                "CREATE USER {}@{} IDENTIFIED BY '********'",
                quote_literal(username),
                quote_literal(host)
            ),
            _ => f.write_str(&self.sql),
        }
    }
}

impl fmt::Debug for AdminStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdminStatement({})", self)
    }
}

pub fn create_user(username: &str, host: &str, password: &str) -> Result<AdminStatement> {
    check("user name", username, &USER_NAME, MAX_USER_LEN)?;
    check("host", host, &HOST_NAME, MAX_HOST_LEN)?;
    Ok(AdminStatement {
        sql: format!(
            "CREATE USER {}@{} IDENTIFIED BY {}",
            quote_literal(username),
            quote_literal(host),
            quote_literal(password)
        ),
        action: AdminAction::CreateUser {
            username: username.to_string(),
            host: host.to_string(),
            password: password.to_string(),
        },
    })
}

pub fn create_database(schema: &str) -> Result<AdminStatement> {
    check("schema name", schema, &SCHEMA_NAME, MAX_SCHEMA_LEN)?;
    Ok(AdminStatement {
        sql: format!(
            "CREATE DATABASE {} DEFAULT CHARACTER SET {}",
            quote_identifier(schema),
            SCHEMA_CHARACTER_SET
        ),
        action: AdminAction::CreateDatabase {
            schema: schema.to_string(),
        },
    })
}

pub fn grant_schema_privileges(schema: &str, username: &str, host: &str) -> Result<AdminStatement> {
    check("schema name", schema, &SCHEMA_NAME, MAX_SCHEMA_LEN)?;
    check("user name", username, &USER_NAME, MAX_USER_LEN)?;
    check("host", host, &HOST_NAME, MAX_HOST_LEN)?;
    Ok(AdminStatement {
        sql: format!(
            "GRANT {} ON {}.* TO {}@{}",
            SCHEMA_PRIVILEGES.join(", "),
            quote_identifier(schema),
            quote_literal(username),
            quote_literal(host)
        ),
        action: AdminAction::GrantSchemaPrivileges {
            schema: schema.to_string(),
            username: username.to_string(),
            host: host.to_string(),
        },
    })
}

pub fn flush_privileges() -> AdminStatement {
    AdminStatement {
        sql: "FLUSH PRIVILEGES".to_string(),
        action: AdminAction::FlushPrivileges,
    }
}

fn check(kind: &str, value: &str, pattern: &Regex, max_len: usize) -> Result<()> {
    if value.len() > max_len || !pattern.is_match(value) {
        return Err(AppError::InvalidIdentifier(format!(
            "{} '{}' is not allowed in administrative statements",
            kind, value
        )));
    }
    Ok(())
}

fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
