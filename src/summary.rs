use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::lookup::LookupResult;


const ATTRIBUTE_ACCOUNT_NAME: &str = "sAMAccountName";
const ATTRIBUTE_ACCOUNT_TYPE: &str = "sAMAccountType";
const ATTRIBUTE_LAST_LOGON: &str = "lastLogonTimestamp";

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountSummary {
    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub last_logon_raw: Option<String>,
    pub last_logon: Option<DateTime<Utc>>,
    pub fingerprint: Option<String>,
}
impl AccountSummary {
    pub fn from_result(result: &LookupResult) -> Option<Self> {
        if !result.exists() {
            return None;
        }

        let last_logon_raw = result.get_attribute(ATTRIBUTE_LAST_LOGON);
        let last_logon = last_logon_raw.as_deref()
            .and_then(filetime_to_datetime);
        let fingerprint = last_logon_raw.as_deref()
            .map(|raw| hex::encode(Sha256::digest(raw.as_bytes())));
        Some(Self {
            account_name: result.get_attribute(ATTRIBUTE_ACCOUNT_NAME),
            account_type: result.get_attribute(ATTRIBUTE_ACCOUNT_TYPE),
            last_logon_raw,
            last_logon,
            fingerprint,
        })
    }
}


/// 0 and `i64::MAX` both mean "never".
pub fn filetime_to_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let ticks: i64 = raw.trim().parse().ok()?;
    if ticks <= 0 || ticks == i64::MAX {
        return None;
    }
    let secs = ticks / FILETIME_TICKS_PER_SEC - FILETIME_UNIX_OFFSET_SECS;
    let nanos = u32::try_from((ticks % FILETIME_TICKS_PER_SEC) * 100).ok()?;
    DateTime::from_timestamp(secs, nanos)
}
