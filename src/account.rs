//! Authenticated principals
//!
//! Three realms can authenticate a request: accounts stored in MongoDB,
//! accounts defined in a configuration file and JWT bearers. Each exposes its
//! properties both as a [`Document`] and as an ordered map, so the
//! interpolator never needs to switch on the realm.

use crate::document::Document;
use serde_json::Value;
use std::collections::BTreeMap;

/// JWT registered claims that are not exposed as account properties
const HIDDEN_JWT_CLAIMS: [&str; 3] = ["exp", "iss", "sub"];

/// Account loaded from a MongoDB users collection
#[derive(Debug, Clone, PartialEq)]
pub struct MongoAccount {
    pub name: String,
    pub roles: Vec<String>,
    pub document: Document,
}

/// Account defined in a configuration file
#[derive(Debug, Clone, PartialEq)]
pub struct FileAccount {
    pub name: String,
    pub roles: Vec<String>,
    pub properties: BTreeMap<String, Value>,
}

/// Principal authenticated with a JSON web token
#[derive(Debug, Clone, PartialEq)]
pub struct JwtAccount {
    pub name: String,
    pub roles: Vec<String>,
    pub claims: Document,
}

/// An authenticated principal, one variant per realm
#[derive(Debug, Clone, PartialEq)]
pub enum Account {
    Mongo(MongoAccount),
    File(FileAccount),
    Jwt(JwtAccount),
}

impl Account {
    /// Creates a MongoDB realm account from its user document.
    pub fn mongo(name: impl Into<String>, roles: Vec<String>, document: Document) -> Self {
        Account::Mongo(MongoAccount {
            name: name.into(),
            roles,
            document,
        })
    }

    /// Creates a file realm account.
    pub fn file(name: impl Into<String>, roles: Vec<String>, properties: BTreeMap<String, Value>) -> Self {
        Account::File(FileAccount {
            name: name.into(),
            roles,
            properties,
        })
    }

    /// Creates a JWT account from the verified token claims.
    pub fn jwt(name: impl Into<String>, roles: Vec<String>, claims: Document) -> Self {
        Account::Jwt(JwtAccount {
            name: name.into(),
            roles,
            claims,
        })
    }

    /// The principal name
    pub fn name(&self) -> &str {
        match self {
            Account::Mongo(a) => &a.name,
            Account::File(a) => &a.name,
            Account::Jwt(a) => &a.name,
        }
    }

    /// The roles granted to the principal, in declaration order
    pub fn roles(&self) -> &[String] {
        match self {
            Account::Mongo(a) => &a.roles,
            Account::File(a) => &a.roles,
            Account::Jwt(a) => &a.roles,
        }
    }

    /// Returns true if the principal has the given role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }

    /// The account properties as a document.
    ///
    /// For JWT accounts the `exp`, `iss` and `sub` claims are omitted.
    pub fn properties_as_document(&self) -> Document {
        match self {
            Account::Mongo(a) => a.document.clone(),
            Account::File(a) => a.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Account::Jwt(a) => a
                .claims
                .iter()
                .filter(|(k, _)| !HIDDEN_JWT_CLAIMS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// The account properties as a sorted map.
    pub fn properties_as_map(&self) -> BTreeMap<String, Value> {
        match self {
            Account::File(a) => a.properties.clone(),
            _ => self.properties_as_document().into_iter().collect(),
        }
    }
}
