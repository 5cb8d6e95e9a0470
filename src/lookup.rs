use std::borrow::Cow;
use std::str::FromStr;

use ldap3::ldap_escape;
use tracing::{debug, warn};

use crate::directory::{Directory, DirectoryEntry, SearchScope};
use crate::error::{Error, Result};
use crate::schema::fetch_schema;


pub const PLACEHOLDER: &str = "%s";

const MINIMAL_ATTRIBUTES: &[&str] = &[
    "sAMAccountName",
    "sAMAccountType",
    "lastLogonTimestamp",
];

const DEFAULT_EXTRA_ATTRIBUTES: &[&str] = &[
    "cn",
    "displayName",
    "mail",
    "givenName",
    "sn",
    "userPrincipalName",
    "memberOf",
    "whenCreated",
    "whenChanged",
];


#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AttributeSet {
    Minimal,
    Default,
    #[default]
    All,
}
impl AttributeSet {
    pub fn attribute_names(&self) -> Vec<String> {
        match self {
            Self::Minimal => MINIMAL_ATTRIBUTES.iter()
                .map(|name| (*name).to_owned())
                .collect(),
            Self::Default => MINIMAL_ATTRIBUTES.iter()
                .chain(DEFAULT_EXTRA_ATTRIBUTES)
                .map(|name| (*name).to_owned())
                .collect(),
            Self::All => vec!["*".to_owned()],
        }
    }
}
impl FromStr for AttributeSet {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "default" => Ok(Self::Default),
            "all" | "*" => Ok(Self::All),
            other => Err(format!("unknown attribute set {:?} (expected minimal, default or all)", other)),
        }
    }
}


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LookupQuery {
    pub identifier: String,
    pub filter_template: String,
    pub scope: SearchScope,
    pub attributes: AttributeSet,
}


#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LookupResult {
    pub entries: Vec<DirectoryEntry>,
}
impl LookupResult {
    pub fn exists(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.entries.first()
            .and_then(|entry| entry.first_value(name))
            .map(|value| value.to_text().into_owned())
    }
}


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LookupRequest {
    pub base_dn: String,
    pub query: LookupQuery,
    pub dump_schema: bool,
}

/// Substitutes the escaped identifier into the template's single `%s`.
pub fn build_filter(template: &str, identifier: &str) -> Result<String> {
    let invalid = |reason: String| Error::InvalidFilterTemplate {
        template: template.to_owned(),
        reason,
    };

    let count = template.matches(PLACEHOLDER).count();
    if count != 1 {
        return Err(invalid(format!("must contain exactly one %s placeholder, found {}", count)));
    }
    check_parentheses(template).map_err(invalid)?;

    let escaped: Cow<str> = ldap_escape(identifier);
    Ok(template.replacen(PLACEHOLDER, escaped.as_ref(), 1))
}

// The escaped identifier never contains parentheses, so checking the template
// is enough for the substituted filter to stay well-formed.
fn check_parentheses(template: &str) -> std::result::Result<(), String> {
    let trimmed = template.trim();
    if !trimmed.starts_with('(') {
        return Err("must start with '('".to_owned());
    }

    let mut depth = 0usize;
    let mut chars = trimmed.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            '\\' => { chars.next(); },
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)
                    .ok_or_else(|| format!("unmatched ')' at offset {}", index))?;
                if depth == 0 && index + 1 != trimmed.len() {
                    return Err(format!("trailing text after offset {}", index));
                }
            },
            _ => {},
        }
    }
    if depth != 0 {
        return Err(format!("{} unclosed '('", depth));
    }
    Ok(())
}


pub async fn search<D: Directory + ?Sized>(directory: &mut D, base_dn: &str, query: &LookupQuery) -> Result<LookupResult> {
    let filter = build_filter(&query.filter_template, &query.identifier)?;
    let attribute_names = query.attributes.attribute_names();
    debug!(base_dn, filter = %filter, scope = ?query.scope, attributes = ?attribute_names, "searching directory");

    let entries = directory.search(
        base_dn,
        query.scope,
        &filter,
        &attribute_names,
    ).await?;
    debug!(count = entries.len(), "search returned");
    Ok(LookupResult { entries })
}


/// Unbinds after the body whether or not it succeeded. `on_schema` runs before the search.
pub async fn run_lookup<D, F>(directory: &mut D, request: &LookupRequest, on_schema: F) -> Result<LookupResult>
where
    D: Directory + ?Sized,
    F: FnOnce(&[DirectoryEntry]) -> Result<()>,
{
    let outcome = lookup_body(directory, request, on_schema).await;
    if let Err(e) = directory.unbind().await {
        warn!("failed to unbind from directory: {}", e);
    }
    outcome
}

async fn lookup_body<D, F>(directory: &mut D, request: &LookupRequest, on_schema: F) -> Result<LookupResult>
where
    D: Directory + ?Sized,
    F: FnOnce(&[DirectoryEntry]) -> Result<()>,
{
    if request.dump_schema {
        let schema = fetch_schema(directory).await?;
        on_schema(&schema)?;
    }
    search(directory, &request.base_dn, &request.query).await
}


#[cfg(test)]
mod tests {
    use mockall::predicate::{always, eq};

    use super::*;
    use crate::directory::{AttributeValue, MockDirectory};

    const TEMPLATE: &str = "(&(objectClass=user)(sAMAccountName=%s))";

    fn paren_balance(filter: &str) -> i64 {
        let mut depth = 0i64;
        let mut chars = filter.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => { chars.next(); },
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {},
            }
        }
        depth
    }

    fn query(identifier: &str) -> LookupQuery {
        LookupQuery {
            identifier: identifier.to_owned(),
            filter_template: TEMPLATE.to_owned(),
            scope: SearchScope::Subtree,
            attributes: AttributeSet::All,
        }
    }

    fn sample_entry() -> DirectoryEntry {
        DirectoryEntry::new("CN=abc123,OU=Staff,DC=example,DC=com")
            .with_value("sAMAccountName", "abc123")
            .with_value("mail", "abc123@example.com")
            .with_value("mail", "alias@example.com")
    }

    #[test]
    fn plain_identifier_is_substituted() {
        assert_eq!(
            build_filter(TEMPLATE, "abc123").unwrap(),
            "(&(objectClass=user)(sAMAccountName=abc123))",
        );
        assert_eq!(build_filter("(uid=%s)", "j.doe-42").unwrap(), "(uid=j.doe-42)");
    }

    #[test]
    fn metacharacters_are_escaped() {
        for hostile in ["abc)(objectClass=*", "*", "a\\b", "x))(|(cn=*", "nul\0byte"] {
            let filter = build_filter(TEMPLATE, hostile).unwrap();
            assert_eq!(paren_balance(&filter), 0, "unbalanced filter {:?}", filter);
            assert!(!filter.contains('*'), "wildcard leaked into {:?}", filter);
            assert!(!filter.contains('\0'));
        }

        let filter = build_filter("(cn=%s)", "a)b").unwrap().to_ascii_lowercase();
        assert_eq!(filter, "(cn=a\\29b)");
    }

    #[test]
    fn template_needs_exactly_one_placeholder() {
        match build_filter("(objectClass=user)", "abc") {
            Err(Error::InvalidFilterTemplate { reason, .. }) => assert!(reason.ends_with("found 0")),
            other => panic!("unexpected {:?}", other),
        }
        match build_filter("(|(uid=%s)(cn=%s))", "abc") {
            Err(Error::InvalidFilterTemplate { reason, .. }) => assert!(reason.ends_with("found 2")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unbalanced_templates_are_rejected() {
        for template in ["(uid=%s", "uid=%s)", "uid=%s", "(uid=%s))", "(uid=%s)(cn=x)", "(&(uid=%s)"] {
            assert!(
                matches!(build_filter(template, "abc"), Err(Error::InvalidFilterTemplate { .. })),
                "accepted {:?}",
                template,
            );
        }
        assert_eq!(build_filter(" (cn=a\\29%s) ", "b").unwrap(), " (cn=a\\29b) ");
    }

    #[test]
    fn identifier_containing_placeholder_is_substituted_once() {
        assert_eq!(build_filter("(uid=%s)", "%s").unwrap(), "(uid=%s)");
    }

    #[test]
    fn empty_result_has_nothing() {
        let result = LookupResult::default();
        assert!(!result.exists());
        assert_eq!(result.get_attribute("mail"), None);
    }

    #[test]
    fn first_value_of_first_entry_wins() {
        let second = DirectoryEntry::new("CN=other,DC=example,DC=com")
            .with_value("mail", "other@example.com");
        let result = LookupResult { entries: vec![sample_entry(), second] };
        assert!(result.exists());
        assert_eq!(result.get_attribute("MAIL").as_deref(), Some("abc123@example.com"));
        assert_eq!(result.get_attribute("telephoneNumber"), None);
    }

    #[test]
    fn attribute_sets_select_names() {
        assert_eq!(AttributeSet::All.attribute_names(), vec!["*".to_owned()]);
        assert_eq!(AttributeSet::Minimal.attribute_names().len(), 3);
        let default = AttributeSet::Default.attribute_names();
        assert!(default.iter().any(|name| name == "mail"));
        assert!(default.iter().any(|name| name == "lastLogonTimestamp"));
        assert_eq!("MINIMAL".parse::<AttributeSet>(), Ok(AttributeSet::Minimal));
        assert!("everything".parse::<AttributeSet>().is_err());
    }

    #[tokio::test]
    async fn search_passes_filter_and_attributes() {
        let mut directory = MockDirectory::new();
        directory.expect_search()
            .with(
                eq("DC=example,DC=com"),
                eq(SearchScope::Subtree),
                eq("(&(objectClass=user)(sAMAccountName=abc123))"),
                always(),
            )
            .times(1)
            .returning(|_, _, _, attributes| {
                assert_eq!(attributes, &["*".to_owned()]);
                Ok(vec![sample_entry()])
            });

        let result = search(&mut directory, "DC=example,DC=com", &query("abc123")).await.unwrap();
        assert!(result.exists());
        assert_eq!(
            result.entries[0].values("mail").unwrap(),
            &[AttributeValue::from("abc123@example.com"), AttributeValue::from("alias@example.com")],
        );
    }

    #[tokio::test]
    async fn bad_template_never_reaches_the_directory() {
        let mut directory = MockDirectory::new();
        directory.expect_search().times(0);
        let mut bad = query("abc123");
        bad.filter_template = "(objectClass=user)".to_owned();
        let result = search(&mut directory, "DC=example,DC=com", &bad).await;
        assert!(matches!(result, Err(Error::InvalidFilterTemplate { .. })));
    }

    #[tokio::test]
    async fn unbind_runs_after_failed_search() {
        let mut directory = MockDirectory::new();
        directory.expect_search()
            .returning(|_, _, _, _| Err(Error::SearchFailed { code: 32, message: "noSuchObject".to_owned() }));
        directory.expect_unbind().times(1).returning(|| Ok(()));

        let request = LookupRequest {
            base_dn: "DC=example,DC=com".to_owned(),
            query: query("abc123"),
            dump_schema: false,
        };
        match run_lookup(&mut directory, &request, |_| panic!("schema not requested")).await {
            Err(Error::SearchFailed { code, .. }) => assert_eq!(code, 32),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unbind_failure_does_not_mask_result() {
        let mut directory = MockDirectory::new();
        directory.expect_search().returning(|_, _, _, _| Ok(Vec::new()));
        directory.expect_unbind().times(1).returning(|| Err(Error::DirectoryTimeout("unbind")));

        let request = LookupRequest {
            base_dn: "DC=example,DC=com".to_owned(),
            query: query("nobody"),
            dump_schema: false,
        };
        let result = run_lookup(&mut directory, &request, |_| Ok(())).await.unwrap();
        assert!(!result.exists());
    }

    #[tokio::test]
    async fn schema_is_handed_over_before_a_failing_search() {
        let schema_dn = "CN=Aggregate,CN=Schema,CN=Configuration,DC=example,DC=com";
        let mut directory = MockDirectory::new();
        directory.expect_search()
            .with(eq(""), eq(SearchScope::Base), always(), always())
            .times(1)
            .returning(move |_, _, _, _| Ok(vec![
                DirectoryEntry::new("").with_value("subschemaSubentry", schema_dn),
            ]));
        directory.expect_search()
            .with(eq(schema_dn), eq(SearchScope::Base), always(), always())
            .times(1)
            .returning(|base_dn, _, _, _| Ok(vec![
                DirectoryEntry::new(base_dn).with_value("objectClasses", "( 2.5.6.6 NAME 'person' )"),
            ]));
        directory.expect_search()
            .with(eq("OU=Gone,DC=example,DC=com"), eq(SearchScope::Subtree), always(), always())
            .times(1)
            .returning(|_, _, _, _| Err(Error::SearchFailed { code: 32, message: "noSuchObject".to_owned() }));
        directory.expect_unbind().times(1).returning(|| Ok(()));

        let request = LookupRequest {
            base_dn: "OU=Gone,DC=example,DC=com".to_owned(),
            query: query("abc123"),
            dump_schema: true,
        };
        let mut received = Vec::new();
        let result = run_lookup(&mut directory, &request, |schema| {
            received.extend_from_slice(schema);
            Ok(())
        }).await;

        assert!(matches!(result, Err(Error::SearchFailed { code: 32, .. })));
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].dn, schema_dn);
    }

    #[tokio::test]
    async fn schema_write_failure_stops_before_searching() {
        let mut directory = MockDirectory::new();
        directory.expect_search()
            .with(eq(""), always(), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));
        directory.expect_unbind().times(1).returning(|| Ok(()));

        let request = LookupRequest {
            base_dn: "DC=example,DC=com".to_owned(),
            query: query("abc123"),
            dump_schema: true,
        };
        let result = run_lookup(&mut directory, &request, |_| Err(Error::OutputWriteFailed {
            path: "data/ldap-schema.txt".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        })).await;
        assert!(matches!(result, Err(Error::OutputWriteFailed { .. })));
    }
}
