use std::fmt::Write;

use tracing::{debug, warn};

use crate::directory::{Directory, DirectoryEntry, SearchScope};
use crate::error::Result;


const ATTRIBUTE_SUBSCHEMA_SUBENTRY: &str = "subschemaSubentry";

const SCHEMA_ATTRIBUTES: &[&str] = &[
    "cn",
    "objectClasses",
    "attributeTypes",
    "ldapSyntaxes",
    "matchingRules",
];


/// Empty if the RootDSE does not advertise a subschema entry.
pub async fn fetch_schema<D: Directory + ?Sized>(directory: &mut D) -> Result<Vec<DirectoryEntry>> {
    let rootdse_entries = directory.search(
        "",
        SearchScope::Base,
        "(objectClass=*)",
        &[ATTRIBUTE_SUBSCHEMA_SUBENTRY.to_owned()],
    ).await?;
    let subschema_dn = rootdse_entries.iter()
        .find_map(|entry| entry.first_value(ATTRIBUTE_SUBSCHEMA_SUBENTRY))
        .map(|value| value.to_text().into_owned());
    let Some(subschema_dn) = subschema_dn else {
        warn!("RootDSE does not advertise {}; schema dump will be empty", ATTRIBUTE_SUBSCHEMA_SUBENTRY);
        return Ok(Vec::new());
    };
    debug!(subschema_dn = %subschema_dn, "reading schema");

    let attribute_names: Vec<String> = SCHEMA_ATTRIBUTES.iter()
        .map(|name| (*name).to_owned())
        .collect();
    directory.search(
        &subschema_dn,
        SearchScope::Base,
        "(objectClass=subschema)",
        &attribute_names,
    ).await
}


pub fn render_schema(entries: &[DirectoryEntry]) -> String {
    let mut dump = String::new();
    for entry in entries {
        // writing into a String cannot fail
        let _ = writeln!(dump, "dn: {}", entry.dn);
        for (name, values) in &entry.attributes {
            for value in values {
                let _ = writeln!(dump, "{}: {}", name, value.to_text());
            }
        }
        dump.push('\n');
    }
    dump
}
