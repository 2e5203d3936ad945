//! Directory entry types
//!
//! A read-only view of one directory record: its distinguished name plus
//! multi-valued string attributes. Attribute names compare case-insensitively,
//! as they do in LDAP.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pseudo-attribute that resolves to the entry's distinguished name.
pub const DN_ATTRIBUTE: &str = "dn";

/// A record returned by a directory query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Map of attribute name to attribute values.
    #[serde(default)]
    attributes: BTreeMap<String, Vec<String>>,
}

/// A group record as seen in the external directory.
pub type DirectoryGroup = DirectoryEntry;

impl DirectoryEntry {
    /// Create an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Set a single-valued attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, vec![value.into()]);
        self
    }

    /// Set a multi-valued attribute using builder pattern.
    pub fn with_values<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Replace all values of an attribute.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        if let Some(existing) = self.key_for(&name) {
            self.attributes.remove(&existing);
        }
        self.attributes.insert(name, values);
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let key = self.key_for(name)?;
        self.attributes.remove(&key)
    }

    /// Get all values of an attribute.
    ///
    /// `dn` resolves to the distinguished name. Empty value lists count as
    /// absent.
    pub fn values(&self, name: &str) -> Option<Vec<&str>> {
        if name.eq_ignore_ascii_case(DN_ATTRIBUTE) {
            return if self.dn.is_empty() {
                None
            } else {
                Some(vec![self.dn.as_str()])
            };
        }

        let key = self.key_for(name)?;
        let values: Vec<&str> = self.attributes[&key]
            .iter()
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    /// Get the first value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).and_then(|v| v.into_iter().next())
    }

    /// Check if an attribute exists with at least one non-empty value.
    pub fn has(&self, name: &str) -> bool {
        self.values(name).is_some()
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    fn key_for(&self, name: &str) -> Option<String> {
        self.attributes
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }
}

/// Check whether `dn` equals or lies beneath `base_dn`.
///
/// Comparison is case-insensitive and ignores whitespace around RDN
/// separators. Escaped commas (`\,`) stay inside their RDN. An empty base
/// contains every DN.
pub fn dn_is_under(dn: &str, base_dn: &str) -> bool {
    let dn = split_rdns(dn);
    let base = split_rdns(base_dn);
    dn.len() >= base.len() && dn[dn.len() - base.len()..] == base[..]
}

/// Lowercased RDNs of `dn`, split on unescaped commas.
fn split_rdns(dn: &str) -> Vec<String> {
    let mut rdns = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in dn.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' => {
                current.push(c);
                escaped = true;
            }
            ',' => rdns.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    rdns.push(current);

    rdns.into_iter()
        .map(|rdn| rdn.trim().to_ascii_lowercase())
        .filter(|rdn| !rdn.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_group() -> DirectoryEntry {
        DirectoryEntry::new("cn=admins,ou=groups,dc=example,dc=com")
            .with("cn", "admins")
            .with("gidNumber", "5000")
            .with_values(
                "member",
                [
                    "cn=alice,ou=users,dc=example,dc=com",
                    "cn=bob,ou=users,dc=example,dc=com",
                ],
            )
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let entry = sample_group();
        assert_eq!(entry.first("CN"), Some("admins"));
        assert_eq!(entry.first("gidnumber"), Some("5000"));
        assert_eq!(entry.values("MEMBER").map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_dn_pseudo_attribute() {
        let entry = sample_group();
        assert_eq!(entry.first("dn"), Some("cn=admins,ou=groups,dc=example,dc=com"));
        assert_eq!(entry.first("DN"), entry.first("dn"));

        let anonymous = DirectoryEntry::new("");
        assert!(!anonymous.has("dn"));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let entry = DirectoryEntry::new("cn=x,dc=example,dc=com")
            .with("description", "")
            .with_values("member", Vec::<String>::new());

        assert!(!entry.has("description"));
        assert!(entry.values("member").is_none());
    }

    #[test]
    fn test_set_replaces_differently_cased_attribute() {
        let mut entry = sample_group();
        entry.set("GIDNUMBER", vec!["6000".to_string()]);

        assert_eq!(entry.first("gidNumber"), Some("6000"));
        assert_eq!(
            entry
                .names()
                .filter(|n| n.eq_ignore_ascii_case("gidnumber"))
                .count(),
            1
        );
    }

    #[test]
    fn test_remove_attribute() {
        let mut entry = sample_group();
        assert!(entry.remove("GidNumber").is_some());
        assert!(!entry.has("gidNumber"));
        assert!(entry.remove("gidNumber").is_none());
    }

    #[test]
    fn test_dn_is_under() {
        let base = "ou=users,dc=example,dc=com";
        assert!(dn_is_under("cn=alice,ou=users,dc=example,dc=com", base));
        assert!(dn_is_under("CN=Alice, OU=Users, DC=Example, DC=Com", base));
        assert!(dn_is_under(base, base));
        assert!(!dn_is_under("cn=alice,ou=admins,dc=example,dc=com", base));
        assert!(!dn_is_under("dc=com", base));
        assert!(dn_is_under("cn=anyone", ""));
    }

    #[test]
    fn test_dn_is_under_with_escaped_commas() {
        let base = "ou=users,dc=example,dc=com";
        assert!(dn_is_under("cn=Smith\\, John,ou=users,dc=example,dc=com", base));
        assert_eq!(
            split_rdns("cn=Smith\\, John,ou=users"),
            vec!["cn=smith\\, john", "ou=users"]
        );

        let escaped_ou = "cn=x,ou=Smith\\, John,dc=example";
        assert!(dn_is_under(escaped_ou, "ou=smith\\, john,dc=example"));
        assert!(!dn_is_under(escaped_ou, "John,dc=example"));
    }
}
