//! Mapping from assertion attributes to the local user principal.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::Attribute;

/// Attribute carrying the IdP user identifier.
pub const ATTR_USER_ID: &str = "idpuserid";
/// Attribute carrying the user's email address.
pub const ATTR_EMAIL: &str = "idpuseremail";
/// Attribute carrying the user's display name.
pub const ATTR_PERSON_NAME: &str = "idpusernm";

/// The authenticated user, built once per consumed assertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrincipal {
    pub username: String,
    pub email: String,
    pub personname: String,
    /// Never populated by this SP.
    pub federation_identifier: Option<String>,
    /// Granted authorities. Always empty: the IdP sends no roles.
    pub authorities: BTreeSet<String>,
}

impl UserPrincipal {
    /// Build a principal from an attribute statement.
    ///
    /// Only the first value of each attribute is used and unrecognized
    /// attributes are ignored. A repeated attribute overrides the earlier one.
    pub fn from_attributes(attributes: &[Attribute]) -> Self {
        let mut principal = Self::default();
        for attribute in attributes {
            let field = match attribute.name.as_str() {
                ATTR_USER_ID => &mut principal.username,
                ATTR_EMAIL => &mut principal.email,
                ATTR_PERSON_NAME => &mut principal.personname,
                other => {
                    tracing::trace!(attribute = other, "Ignoring unmapped SAML attribute");
                    continue;
                }
            };
            *field = attribute.first_value().unwrap_or_default();
        }
        principal
    }

    /// Name shown to the user: the display name, falling back to the username.
    pub fn display_name(&self) -> &str {
        if self.personname.is_empty() {
            &self.username
        } else {
            &self.personname
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::types::AttributeValue;

    fn attribute(name: &str, values: &[&str]) -> Attribute {
        Attribute {
            name: name.to_string(),
            values: values
                .iter()
                .map(|v| AttributeValue::String(v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_maps_recognized_attributes() {
        let principal = UserPrincipal::from_attributes(&[
            attribute("idpuserid", &["alice"]),
            attribute("idpuseremail", &["a@x.com"]),
            attribute("idpusernm", &["Alice A"]),
            attribute("foo", &["bar"]),
        ]);

        assert_eq!(principal.username, "alice");
        assert_eq!(principal.email, "a@x.com");
        assert_eq!(principal.personname, "Alice A");
        assert_eq!(principal.federation_identifier, None);
        assert!(principal.authorities.is_empty());
        let json = serde_json::to_string(&principal).unwrap();
        assert!(!json.contains("bar"));
    }

    #[test]
    fn test_first_value_wins() {
        let principal =
            UserPrincipal::from_attributes(&[attribute("idpuserid", &["alice", "mallory"])]);
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn test_attribute_without_values_is_empty() {
        let principal = UserPrincipal::from_attributes(&[attribute("idpuseremail", &[])]);
        assert_eq!(principal.email, "");
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let mut principal = UserPrincipal::from_attributes(&[attribute("idpuserid", &["alice"])]);
        assert_eq!(principal.display_name(), "alice");
        principal.personname = "Alice A".to_string();
        assert_eq!(principal.display_name(), "Alice A");
    }
}
