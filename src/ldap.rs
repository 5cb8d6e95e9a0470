use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, SearchEntry};
use secrecy::ExposeSecret;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::LookupConfig;
use crate::directory::{Directory, DirectoryEntry, SearchScope};
use crate::error::{Error, Result};


#[derive(Debug)]
pub struct LdapConnection {
    ldap: ldap3::Ldap,
    operation_timeout: Duration,
}
impl LdapConnection {
    pub async fn connect(config: &LookupConfig) -> Result<Self> {
        let url = config.ldap_url();
        info!(url = %url, bind_dn = %config.bind_dn, "connecting to directory");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(config.timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await.map_err(|e| map_connect_error(e, "connect"))?;
        ldap3::drive!(conn);

        let mut connection = Self {
            ldap,
            operation_timeout: config.timeout,
        };
        if let Err(e) = connection.bind(&config.bind_dn, config.password.expose_secret()).await {
            if let Err(unbind_err) = connection.unbind().await {
                warn!("failed to release connection after rejected bind: {}", unbind_err);
            }
            return Err(e);
        }
        debug!("bound to directory");
        Ok(connection)
    }

    async fn bind(&mut self, bind_dn: &str, password: &str) -> Result<()> {
        let operation_timeout = self.operation_timeout;
        let bind_result = with_timeout(operation_timeout, "bind", self.ldap.simple_bind(bind_dn, password))
            .await?
            .map_err(|e| map_connect_error(e, "bind"))?;
        bind_result.success()
            .map_err(|e| map_connect_error(e, "bind"))?;
        Ok(())
    }
}
#[async_trait]
impl Directory for LdapConnection {
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attribute_names: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        let ldap_attribute_names: Vec<&str> = attribute_names
            .iter()
            .map(|n| n.as_str())
            .collect();
        let operation_timeout = self.operation_timeout;
        let ldap_response = with_timeout(
            operation_timeout,
            "search",
            self.ldap.search(
                base_dn,
                scope.into(),
                filter,
                ldap_attribute_names,
            ),
        ).await?
            .map_err(|e| map_search_error(e, filter))?;
        let (ldap_entries, _) = ldap_response.success()
            .map_err(|e| map_search_error(e, filter))?;

        let mut entries = Vec::with_capacity(ldap_entries.len());
        for ldap_entry in ldap_entries {
            if ldap_entry.is_ref() || ldap_entry.is_intermediate() {
                debug!("skipping search reference or intermediate message");
                continue;
            }
            entries.push(DirectoryEntry::from(SearchEntry::construct(ldap_entry)));
        }
        Ok(entries)
    }

    async fn unbind(&mut self) -> Result<()> {
        let operation_timeout = self.operation_timeout;
        with_timeout(operation_timeout, "unbind", self.ldap.unbind())
            .await?
            .map_err(|e| map_connect_error(e, "unbind"))?;
        debug!("unbound from directory");
        Ok(())
    }
}


async fn with_timeout<F, T>(operation_timeout: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(operation_timeout, fut)
        .await
        .map_err(|_| Error::DirectoryTimeout(operation))
}

fn map_connect_error(err: LdapError, operation: &'static str) -> Error {
    match err {
        LdapError::Timeout { .. } => Error::DirectoryTimeout(operation),
        LdapError::LdapResult { result } => Error::DirectoryUnavailable(
            format!("{} rejected: {}", operation, result)
        ),
        other => Error::DirectoryUnavailable(format!("{} failed: {}", operation, other)),
    }
}

fn map_search_error(err: LdapError, filter: &str) -> Error {
    match err {
        LdapError::Timeout { .. } => Error::DirectoryTimeout("search"),
        LdapError::FilterParsing => Error::InvalidFilterTemplate {
            template: filter.to_owned(),
            reason: String::from("rejected by the LDAP filter parser"),
        },
        LdapError::LdapResult { result } => {
            let message = if result.text.is_empty() {
                result.to_string()
            } else {
                result.text
            };
            Error::SearchFailed {
                code: result.rc,
                message,
            }
        },
        other => Error::DirectoryUnavailable(format!("search failed: {}", other)),
    }
}
