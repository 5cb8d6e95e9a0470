use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::directory::SearchScope;
use crate::error::{Error, Result};
use crate::lookup::{build_filter, AttributeSet, LookupQuery, LookupRequest};


pub const KEY_HOST: &str = "LDAP_OU_HOST";
pub const KEY_PORT: &str = "LDAP_OU_PORT";
pub const KEY_USER: &str = "LDAP_OU_USER";
pub const KEY_PASS: &str = "LDAP_OU_PASS";
pub const KEY_BASE_DN: &str = "LDAP_OU_BASE_DN";
pub const KEY_FILTER_FORMAT: &str = "LDAP_OU_FILTER_FORMAT";
pub const KEY_TIMEOUT: &str = "LDAP_OU_TIMEOUT";
pub const KEY_TLS: &str = "LDAP_OU_TLS";
pub const KEY_IDENTIFIER: &str = "LDAP_OUCU";
pub const KEY_ATTRIBUTES: &str = "LDAP_OU_ATTRIBUTES";
pub const KEY_SCHEMA: &str = "LDAP_OU_SCHEMA";

pub const DEFAULT_HOST: &str = "DC1.open.ac.uk";
pub const DEFAULT_PORT: u16 = 3268;
pub const DEFAULT_BASE_DN: &str = "DC=Open,DC=AC,DC=UK";
pub const DEFAULT_FILTER_FORMAT: &str = "(&(objectClass=user)(sAMAccountName=%s))";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IDENTIFIER: &str = "xyzz123";


pub trait ConfigProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment. Empty values count as unset.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvProvider;
impl ConfigProvider for EnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
    values: BTreeMap<String, String>,
}
impl StaticProvider {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_owned(), value.into());
        self
    }
}
impl ConfigProvider for StaticProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Asks each provider in turn; the first one that knows the key wins.
#[derive(Default)]
pub struct ChainProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}
impl ChainProvider {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, provider: impl ConfigProvider + 'static) {
        self.providers.push(Box::new(provider));
    }
}
impl ConfigProvider for ChainProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.providers.iter()
            .find_map(|provider| provider.get(key))
    }
}


#[derive(Deserialize)]
pub struct Credentials {
    pub bind_dn: String,
    pub password: SecretString,
}
impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let credentials_string = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigInvalid {
                key: "credentials file",
                reason: format!("failed to read {}: {}", path.display(), e),
            })?;
        toml::from_str(&credentials_string)
            .map_err(|e| Error::ConfigInvalid {
                key: "credentials file",
                reason: format!("failed to parse {}: {}", path.display(), e),
            })
    }
}
impl ConfigProvider for Credentials {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            KEY_USER => Some(self.bind_dn.clone()),
            KEY_PASS => Some(self.password.expose_secret().to_owned()),
            _ => None,
        }
    }
}


#[derive(Debug)]
pub struct LookupConfig {
    pub host: String,
    pub port: u16,
    pub bind_dn: String,
    pub password: SecretString,
    pub base_dn: String,
    pub filter_template: String,
    pub timeout: Duration,
    pub tls: bool,
    pub identifier: String,
    pub attributes: AttributeSet,
    pub dump_schema: bool,
}
impl LookupConfig {
    pub fn resolve(provider: &dyn ConfigProvider) -> Result<Self> {
        let get_or = |key: &str, default: &str| provider.get(key)
            .unwrap_or_else(|| default.to_owned());
        let require = |key: &'static str| provider.get(key)
            .ok_or(Error::ConfigMissing(key));

        let port = match provider.get(KEY_PORT) {
            Some(raw) => raw.trim().parse::<u16>()
                .map_err(|e| Error::ConfigInvalid { key: KEY_PORT, reason: e.to_string() })?,
            None => DEFAULT_PORT,
        };
        let timeout_secs = match provider.get(KEY_TIMEOUT) {
            Some(raw) => raw.trim().parse::<u64>()
                .map_err(|e| Error::ConfigInvalid { key: KEY_TIMEOUT, reason: e.to_string() })?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(Error::ConfigInvalid { key: KEY_TIMEOUT, reason: "must be greater than zero".to_owned() });
        }
        let attributes = match provider.get(KEY_ATTRIBUTES) {
            Some(raw) => raw.parse::<AttributeSet>()
                .map_err(|reason| Error::ConfigInvalid { key: KEY_ATTRIBUTES, reason })?,
            None => AttributeSet::default(),
        };

        let config = Self {
            host: get_or(KEY_HOST, DEFAULT_HOST),
            port,
            bind_dn: require(KEY_USER)?,
            password: SecretString::from(require(KEY_PASS)?),
            base_dn: get_or(KEY_BASE_DN, DEFAULT_BASE_DN),
            filter_template: get_or(KEY_FILTER_FORMAT, DEFAULT_FILTER_FORMAT),
            timeout: Duration::from_secs(timeout_secs),
            tls: provider.get(KEY_TLS).is_some_and(|v| is_truthy(&v)),
            identifier: get_or(KEY_IDENTIFIER, DEFAULT_IDENTIFIER),
            attributes,
            dump_schema: provider.get(KEY_SCHEMA).is_some_and(|v| is_truthy(&v)),
        };

        // reject a broken template before any connection is made
        build_filter(&config.filter_template, &config.identifier)?;

        Ok(config)
    }

    pub fn ldap_url(&self) -> String {
        let scheme = if self.tls { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn request(&self) -> LookupRequest {
        LookupRequest {
            base_dn: self.base_dn.clone(),
            query: LookupQuery {
                identifier: self.identifier.clone(),
                filter_template: self.filter_template.clone(),
                scope: SearchScope::Subtree,
                attributes: self.attributes,
            },
            dump_schema: self.dump_schema,
        }
    }
}


pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on",
    )
}
