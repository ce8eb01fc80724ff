//! Customer identity normalisation and schema-less identity bags
//!
//! Identifiers arrive from report rows, uploaded files and manual entry, each typed
//! slightly differently. Only the output of [`normalize`] is ever compared across
//! sources.
use std::collections::{BTreeMap, BTreeSet};

/// Field names that may carry the customer identifier, in priority order.
pub const CUSTOMER_ID_FIELDS: &[&str] = &[
    "username",
    "user_name",
    "user_id",
    "userid",
    "customer_id",
    "customerid",
    "id_customer",
    "member_id",
    "id_member",
    "player_id",
    "account",
    "login",
    "id",
];

/// Field names that may carry the legacy customer name, in priority order.
pub const CUSTOMER_NAME_FIELDS: &[&str] = &[
    "name",
    "nama",
    "customer_name",
    "nama_customer",
    "full_name",
    "nama_lengkap",
];

/// Lowercase, trim and drop everything outside `[a-z0-9_-]`.
///
/// An empty result is never a usable identity key.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect()
}

// "User ID", "user-id" and "USER_ID" all name the same column
fn field_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// A loosely typed bag of customer fields, as uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(array)]
pub struct CustomerIdentity(#[n(0)] BTreeMap<String, String>);

/// The customer a reservation points at. Historical reservations populated only one side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl CustomerIdentity {
    pub fn from_row(row: BTreeMap<String, String>) -> Self {
        Self(row)
    }
    pub fn with_field(mut self, field: &str, value: &str) -> Self {
        self.0.insert(field.to_string(), value.to_string());
        self
    }
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }
    /// Value of `field`, matched by normalised field name. Blank values count as absent.
    pub fn field(&self, field: &str) -> Option<&str> {
        let wanted = field_key(field);
        self.0
            .iter()
            .find(|(k, v)| field_key(k) == wanted && !v.trim().is_empty())
            .map(|(_, v)| v.as_str())
    }
    fn first_of(&self, candidates: &[&str]) -> Option<&str> {
        candidates.iter().find_map(|f| self.field(f))
    }
    /// First non-empty identifier from [`CUSTOMER_ID_FIELDS`].
    pub fn customer_id(&self) -> Option<&str> {
        self.first_of(CUSTOMER_ID_FIELDS)
    }
    pub fn customer_name(&self) -> Option<&str> {
        self.first_of(CUSTOMER_NAME_FIELDS)
    }
    /// Normalised key for this bag: the id when present, else the name.
    pub fn primary_key(&self) -> Option<String> {
        self.customer_id()
            .or_else(|| self.customer_name())
            .map(normalize)
            .filter(|k| !k.is_empty())
    }
    /// True when the resolved id or the resolved legacy name normalises to one of the
    /// customer's keys. Lower-priority fields (an upload's row `id`, say) never match
    /// once a higher-priority field holds a value.
    pub fn matches(&self, customer: &CustomerRef) -> bool {
        let wanted = customer.keys();
        [self.customer_id(), self.customer_name()]
            .into_iter()
            .flatten()
            .map(normalize)
            .any(|k| !k.is_empty() && wanted.contains(&k))
    }
}

impl CustomerRef {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: None,
        }
    }
    pub fn by_name(name: &str) -> Self {
        Self {
            id: None,
            name: Some(name.to_string()),
        }
    }
    /// Every non-empty normalised key (id and name).
    pub fn keys(&self) -> BTreeSet<String> {
        [self.id.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(normalize)
            .filter(|k| !k.is_empty())
            .collect()
    }
    pub fn primary_key(&self) -> Option<String> {
        [self.id.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(normalize)
            .find(|k| !k.is_empty())
    }
    pub fn overlaps(&self, other: &CustomerRef) -> bool {
        !self.keys().is_disjoint(&other.keys())
    }
    pub fn label(&self) -> String {
        self.id
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_default()
    }
}
