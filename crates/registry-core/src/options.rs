//! Per-operation query and command options.
//!
//! Callers pass a sequence of [`QueryOption`] values built with the `with_*`
//! constructors. Each operation owns a typed record implementing
//! [`OptionRecord`]; a record advertises a capability by overriding the
//! matching `*_slot` hook. Applying an option the record does not support
//! fails with [`RegistryError::IncompatibleOption`].
//!
//! ```rust,ignore
//! let opts: ListServersOptions = configure([with_limit(20), with_search("fetch")])?;
//! ```

use crate::cursor::{decode_cursor, Cursor};
use crate::error::{RegistryError, Result};
use crate::model::EntryStatus;
use chrono::{DateTime, Utc};

/// A single optional parameter for a registry operation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOption {
    Cursor(String),
    Limit(i64),
    Search(String),
    RegistryName(String),
    Namespace(String),
    Name(String),
    Version(String),
    Status(String),
    UpdatedSince(DateTime<Utc>),
}

impl QueryOption {
    /// Stable option name used in error messages.
    pub fn key(&self) -> &'static str {
        match self {
            QueryOption::Cursor(_) => "cursor",
            QueryOption::Limit(_) => "limit",
            QueryOption::Search(_) => "search",
            QueryOption::RegistryName(_) => "registry_name",
            QueryOption::Namespace(_) => "namespace",
            QueryOption::Name(_) => "name",
            QueryOption::Version(_) => "version",
            QueryOption::Status(_) => "status",
            QueryOption::UpdatedSince(_) => "updated_since",
        }
    }

    /// Apply this option to a record: capability check, then validation, then
    /// mutation. A later option for the same field overwrites an earlier one.
    pub fn apply<R: OptionRecord + ?Sized>(self, record: &mut R) -> Result<()> {
        let key = self.key();
        let operation = record.operation();
        let incompatible = || RegistryError::IncompatibleOption {
            option: key.to_string(),
            operation: operation.to_string(),
        };

        match self {
            QueryOption::Cursor(token) => {
                let slot = record.cursor_slot().ok_or_else(incompatible)?;
                non_empty(key, &token)?;
                *slot = Some(decode_cursor(&token)?);
            }
            QueryOption::Limit(limit) => {
                let slot = record.limit_slot().ok_or_else(incompatible)?;
                if limit <= 0 {
                    return Err(RegistryError::InvalidOption {
                        option: key.to_string(),
                        message: format!("must be greater than 0, got {}", limit),
                    });
                }
                *slot = Some(limit as usize);
            }
            QueryOption::Search(value) => {
                let slot = record.search_slot().ok_or_else(incompatible)?;
                non_empty(key, &value)?;
                *slot = Some(value);
            }
            QueryOption::RegistryName(value) => {
                let slot = record.registry_name_slot().ok_or_else(incompatible)?;
                non_empty(key, &value)?;
                *slot = Some(value);
            }
            QueryOption::Namespace(value) => {
                let slot = record.namespace_slot().ok_or_else(incompatible)?;
                non_empty(key, &value)?;
                *slot = Some(value);
            }
            QueryOption::Name(value) => {
                let slot = record.name_slot().ok_or_else(incompatible)?;
                non_empty(key, &value)?;
                *slot = Some(value);
            }
            QueryOption::Version(value) => {
                let slot = record.version_slot().ok_or_else(incompatible)?;
                non_empty(key, &value)?;
                *slot = Some(value);
            }
            QueryOption::Status(value) => {
                let slot = record.status_slot().ok_or_else(incompatible)?;
                non_empty(key, &value)?;
                *slot = Some(EntryStatus::parse_list(&value)?);
            }
            QueryOption::UpdatedSince(ts) => {
                let slot = record.updated_since_slot().ok_or_else(incompatible)?;
                if ts == DateTime::<Utc>::default() {
                    return Err(RegistryError::InvalidOption {
                        option: key.to_string(),
                        message: "timestamp must be set".to_string(),
                    });
                }
                *slot = Some(ts);
            }
        }
        Ok(())
    }
}

fn non_empty(option: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RegistryError::InvalidOption {
            option: option.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

pub fn with_cursor(cursor: impl Into<String>) -> QueryOption {
    QueryOption::Cursor(cursor.into())
}

pub fn with_limit(limit: i64) -> QueryOption {
    QueryOption::Limit(limit)
}

pub fn with_search(search: impl Into<String>) -> QueryOption {
    QueryOption::Search(search.into())
}

pub fn with_registry_name(name: impl Into<String>) -> QueryOption {
    QueryOption::RegistryName(name.into())
}

pub fn with_namespace(namespace: impl Into<String>) -> QueryOption {
    QueryOption::Namespace(namespace.into())
}

pub fn with_name(name: impl Into<String>) -> QueryOption {
    QueryOption::Name(name.into())
}

pub fn with_version(version: impl Into<String>) -> QueryOption {
    QueryOption::Version(version.into())
}

/// Comma-separated status filter, e.g. `active,deprecated`.
pub fn with_status(status: impl Into<String>) -> QueryOption {
    QueryOption::Status(status.into())
}

pub fn with_updated_since(ts: DateTime<Utc>) -> QueryOption {
    QueryOption::UpdatedSince(ts)
}

/// Capability surface of an options record. Every hook defaults to
/// "unsupported"; records override the hooks for the fields they own.
pub trait OptionRecord {
    /// Operation name used in incompatible-option errors.
    fn operation(&self) -> &'static str;

    fn cursor_slot(&mut self) -> Option<&mut Option<Cursor>> {
        None
    }
    fn limit_slot(&mut self) -> Option<&mut Option<usize>> {
        None
    }
    fn search_slot(&mut self) -> Option<&mut Option<String>> {
        None
    }
    fn registry_name_slot(&mut self) -> Option<&mut Option<String>> {
        None
    }
    fn namespace_slot(&mut self) -> Option<&mut Option<String>> {
        None
    }
    fn name_slot(&mut self) -> Option<&mut Option<String>> {
        None
    }
    fn version_slot(&mut self) -> Option<&mut Option<String>> {
        None
    }
    fn status_slot(&mut self) -> Option<&mut Option<Vec<EntryStatus>>> {
        None
    }
    fn updated_since_slot(&mut self) -> Option<&mut Option<DateTime<Utc>>> {
        None
    }
}

/// Build a record from an option sequence, applying options in order.
pub fn configure<R>(options: impl IntoIterator<Item = QueryOption>) -> Result<R>
where
    R: OptionRecord + Default,
{
    let mut record = R::default();
    for option in options {
        option.apply(&mut record)?;
    }
    Ok(record)
}

/// Unwrap a required field or fail with "<field> is required".
pub(crate) fn require<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| RegistryError::validation(format!("{} is required", field)))
}

macro_rules! option_record {
    (
        $(#[$meta:meta])*
        $record:ident => $operation:literal {
            $($field:ident: $ty:ty => $slot:ident),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $record {
            $(pub $field: Option<$ty>,)*
        }

        impl OptionRecord for $record {
            fn operation(&self) -> &'static str {
                $operation
            }

            $(
                fn $slot(&mut self) -> Option<&mut Option<$ty>> {
                    Some(&mut self.$field)
                }
            )*
        }
    };
}

option_record! {
    /// Options for listing servers.
    ListServersOptions => "list_servers" {
        cursor: Cursor => cursor_slot,
        limit: usize => limit_slot,
        search: String => search_slot,
        registry_name: String => registry_name_slot,
        status: Vec<EntryStatus> => status_slot,
        version: String => version_slot,
        updated_since: DateTime<Utc> => updated_since_slot,
    }
}

option_record! {
    /// Options for listing every version of one server.
    ListServerVersionsOptions => "list_server_versions" {
        registry_name: String => registry_name_slot,
        name: String => name_slot,
    }
}

option_record! {
    /// Options for fetching one server version (`latest` resolves).
    GetServerVersionOptions => "get_server_version" {
        registry_name: String => registry_name_slot,
        name: String => name_slot,
        version: String => version_slot,
    }
}

option_record! {
    /// Options for deleting one server version.
    DeleteServerVersionOptions => "delete_server_version" {
        registry_name: String => registry_name_slot,
        name: String => name_slot,
        version: String => version_slot,
    }
}

option_record! {
    /// Options for listing skills.
    ListSkillsOptions => "list_skills" {
        cursor: Cursor => cursor_slot,
        limit: usize => limit_slot,
        search: String => search_slot,
        registry_name: String => registry_name_slot,
        namespace: String => namespace_slot,
        status: Vec<EntryStatus> => status_slot,
        version: String => version_slot,
        updated_since: DateTime<Utc> => updated_since_slot,
    }
}

option_record! {
    /// Options for listing every version of one skill.
    ListSkillVersionsOptions => "list_skill_versions" {
        registry_name: String => registry_name_slot,
        namespace: String => namespace_slot,
        name: String => name_slot,
    }
}

option_record! {
    GetSkillVersionOptions => "get_skill_version" {
        registry_name: String => registry_name_slot,
        namespace: String => namespace_slot,
        name: String => name_slot,
        version: String => version_slot,
    }
}

option_record! {
    DeleteSkillVersionOptions => "delete_skill_version" {
        registry_name: String => registry_name_slot,
        namespace: String => namespace_slot,
        name: String => name_slot,
        version: String => version_slot,
    }
}

option_record! {
    /// Options for publishing a server or skill version.
    PublishOptions => "publish" {
        registry_name: String => registry_name_slot,
    }
}
