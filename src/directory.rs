use std::borrow::Cow;
use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use unicase::UniCase;

use crate::error::Result;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}
impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => ldap3::Scope::Base,
            SearchScope::OneLevel => ldap3::Scope::OneLevel,
            SearchScope::Subtree => ldap3::Scope::Subtree,
        }
    }
}


/// Non-UTF-8 values serialize as `{"base64": "..."}`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Binary {
        #[serde(with = "base64_bytes")]
        base64: Vec<u8>,
    },
}
impl AttributeValue {
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s.as_str()),
            Self::Binary { base64 } => Cow::Owned(
                base64::engine::general_purpose::STANDARD.encode(base64)
            ),
        }
    }
}
impl From<String> for AttributeValue {
    fn from(value: String) -> Self { Self::Text(value) }
}
impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}
impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self { Self::Binary { base64: value } }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD.decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: BTreeMap<UniCase<String>, Vec<AttributeValue>>,
}
impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn push_value(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.attributes
            .entry(UniCase::new(name.to_owned()))
            .or_insert_with(Vec::new)
            .push(value.into());
    }

    #[cfg(test)]
    pub fn with_value(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.push_value(name, value);
        self
    }

    pub fn values(&self, name: &str) -> Option<&[AttributeValue]> {
        self.attributes
            .get(&UniCase::new(name.to_owned()))
            .map(|values| values.as_slice())
    }

    pub fn first_value(&self, name: &str) -> Option<&AttributeValue> {
        self.values(name)
            .and_then(|values| values.first())
    }
}
impl From<ldap3::SearchEntry> for DirectoryEntry {
    fn from(search_entry: ldap3::SearchEntry) -> Self {
        let mut entry = DirectoryEntry::new(search_entry.dn);
        for (key, string_values) in search_entry.attrs {
            for string_value in string_values {
                entry.push_value(&key, string_value);
            }
        }
        for (key, bytes_values) in search_entry.bin_attrs {
            for bytes_value in bytes_values {
                entry.push_value(&key, bytes_value);
            }
        }
        entry
    }
}


#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send {
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attribute_names: &[String],
    ) -> Result<Vec<DirectoryEntry>>;

    async fn unbind(&mut self) -> Result<()>;
}
