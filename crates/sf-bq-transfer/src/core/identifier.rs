//! Centralized identifier validation and quoting for generated SQL.
//!
//! Table, schema and stage names cannot be bound as statement parameters in
//! either warehouse, so every identifier that ends up in generated SQL goes
//! through this module.
//!
//! Names handed to the SQL layer are catalog names: exactly what
//! `INFORMATION_SCHEMA` stores. Only upper-case plain names resolve to
//! themselves when unquoted, so those are emitted bare and everything else is
//! double-quoted with embedded quotes doubled. Names written in configuration
//! are converted once with [`snowflake_catalog_name`].

use crate::error::{TransferError, Result};

/// Maximum identifier length for object names.
const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, null bytes and identifiers over the length limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TransferError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TransferError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(TransferError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Whether `name` is an unquoted Snowflake identifier.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Quote a Snowflake catalog name.
///
/// ```ignore
/// assert_eq!(quote_snowflake("ORDERS")?, "ORDERS");
/// assert_eq!(quote_snowflake("orders")?, "\"orders\"");
/// ```
pub fn quote_snowflake(name: &str) -> Result<String> {
    validate_identifier(name)?;
    if is_plain_identifier(name) && !name.chars().any(|c| c.is_ascii_lowercase()) {
        Ok(name.to_string())
    } else {
        Ok(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// The name Snowflake stores for an identifier written as `name` in
/// configuration.
///
/// Plain identifiers resolve to upper case. A double-quoted name such as
/// `"Orders"` is kept verbatim without its quotes; anything else is kept as is.
pub fn snowflake_catalog_name(name: &str) -> String {
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        name[1..name.len() - 1].replace("\"\"", "\"")
    } else if is_plain_identifier(name) {
        name.to_ascii_uppercase()
    } else {
        name.to_string()
    }
}

/// Qualify a Snowflake object as `database.schema.name`.
pub fn qualify_snowflake(database: &str, schema: &str, name: &str) -> Result<String> {
    Ok(format!(
        "{}.{}.{}",
        quote_snowflake(database)?,
        quote_snowflake(schema)?,
        quote_snowflake(name)?
    ))
}

/// Quote a Snowflake string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Validate a table name used as an object-storage prefix segment.
///
/// Prefixes are shared between a stage path and a `gs://` URI, so anything
/// that would change path structure or need escaping is rejected.
pub fn validate_path_segment(name: &str) -> Result<()> {
    validate_identifier(name)?;
    if name == "." || name == ".." {
        return Err(TransferError::Config(format!(
            "Invalid object prefix segment: {:?}",
            name
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| matches!(c, '/' | '\\' | '\'' | '"' | '*' | '?' | '@' | '[' | ']') || c.is_whitespace())
    {
        return Err(TransferError::Config(format!(
            "Table name {:?} contains {:?}, which cannot be used in a storage prefix",
            name, bad
        )));
    }
    Ok(())
}
