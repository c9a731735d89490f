use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One canonical output column: record key, header label, and the header
/// names (matched case-insensitively) that legacy files used for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub key: &'static str,
    pub header: &'static str,
    pub aliases: &'static [&'static str],
}

/// Fixed, totally ordered canonical column sequence. `Email` is never part of it.
pub static CANONICAL_COLUMNS: [ColumnDescriptor; 8] = [
    ColumnDescriptor {
        key: "name",
        header: "Full Name",
        aliases: &["Full Name", "Name", "full_name", "Contact Name"],
    },
    ColumnDescriptor {
        key: "first_name",
        header: "First Name",
        aliases: &["First Name", "first_name", "FirstName", "Given Name"],
    },
    ColumnDescriptor {
        key: "last_name",
        header: "Last Name",
        aliases: &["Last Name", "last_name", "LastName", "Surname", "Family Name"],
    },
    ColumnDescriptor {
        key: "title",
        header: "Title",
        aliases: &["Title", "Job Title", "Headline", "Position"],
    },
    ColumnDescriptor {
        key: "company",
        header: "Company",
        aliases: &["Company", "Company Name", "Organization", "Employer"],
    },
    ColumnDescriptor {
        key: "person_location",
        header: "Person Location",
        aliases: &["Person Location", "person_location", "Location"],
    },
    ColumnDescriptor {
        key: "person_title",
        header: "LinkedIn URL",
        aliases: &[
            "LinkedIn URL",
            "person_title",
            "LinkedIn",
            "LinkedIn Profile",
            "Profile URL",
        ],
    },
    ColumnDescriptor {
        key: "domain",
        header: "Website",
        aliases: &["Website", "domain", "Company Website", "Company Domain"],
    },
];

/// Header label that is dropped wherever it appears.
pub const EMAIL_HEADER: &str = "email";

/// The two column sets a file may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSet {
    /// Every canonical column except Website.
    Base,
    WithWebsite,
}

impl ColumnSet {
    pub fn columns(self) -> &'static [ColumnDescriptor] {
        match self {
            ColumnSet::Base => &CANONICAL_COLUMNS[..CANONICAL_COLUMNS.len() - 1],
            ColumnSet::WithWebsite => &CANONICAL_COLUMNS[..],
        }
    }

    pub fn headers(self) -> impl Iterator<Item = &'static str> {
        self.columns().iter().map(|c| c.header)
    }

    /// Pick the set an existing header line was written with.
    pub fn infer(header_line: &str) -> Self {
        let lower = header_line.to_ascii_lowercase();
        if lower.contains("website") || lower.contains("domain") {
            ColumnSet::WithWebsite
        } else {
            ColumnSet::Base
        }
    }
}

/// One scraped contact keyed by canonical attribute name. Absent fields
/// export as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_location: Option<String>,
    /// LinkedIn profile URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_title: Option<String>,
    /// Company website.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl ProfileRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        let field = match key {
            "name" => &self.name,
            "first_name" => &self.first_name,
            "last_name" => &self.last_name,
            "title" => &self.title,
            "company" => &self.company,
            "person_location" => &self.person_location,
            "person_title" => &self.person_title,
            "domain" => &self.domain,
            _ => return None,
        };
        field.as_deref()
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        Some(match key {
            "name" => &mut self.name,
            "first_name" => &mut self.first_name,
            "last_name" => &mut self.last_name,
            "title" => &mut self.title,
            "company" => &mut self.company,
            "person_location" => &mut self.person_location,
            "person_title" => &mut self.person_title,
            "domain" => &mut self.domain,
            _ => return None,
        })
    }

    /// Build a record from loosely typed extractor output. `null` counts as
    /// absent; other non-string values are rendered as text.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let mut record = ProfileRecord::default();
        for column in CANONICAL_COLUMNS.iter() {
            let text = match map.get(column.key) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            if let Some(slot) = record.slot_mut(column.key) {
                *slot = text;
            }
        }
        record
    }
}
