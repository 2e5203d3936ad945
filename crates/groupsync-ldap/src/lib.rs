//! # LDAP Directory
//!
//! LDAP backend for directory group sync.
//!
//! Groups and users are located by two bounded queries (base DN, scope and
//! filter). Groups are identified by a configurable attribute or their DN;
//! member references are resolved against the users query, and references
//! outside the users base DN are reported as out of scope.
//!
//! ## Features
//!
//! - LDAP v3 protocol support
//! - SSL/TLS and STARTTLS
//! - Simple or anonymous bind
//! - Filter value escaping (RFC 4515)
//!
//! ## Example
//!
//! ```ignore
//! use groupsync_ldap::{LdapConfig, LdapDirectory, LdapQuery};
//! use groupsync_directory::prelude::*;
//!
//! let config = LdapConfig::new(
//!     "ldap.example.com",
//!     LdapQuery::new("ou=groups,dc=example,dc=com", "(objectClass=groupOfNames)"),
//!     LdapQuery::new("ou=users,dc=example,dc=com", "(objectClass=inetOrgPerson)"),
//! )
//! .with_bind("cn=admin,dc=example,dc=com", "secret")
//! .with_ssl();
//!
//! let directory = LdapDirectory::new(config)?;
//! directory.test_connection().await?;
//! ```

pub mod config;
pub mod connector;

// Re-exports
pub use config::{LdapConfig, LdapQuery, SearchScope};
pub use connector::{and_filter, escape_ldap_value, LdapDirectory};
