//! Which fields of a person record are sealed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields sealed by `encrypt_record`.
pub const SENSITIVE_FIELDS: [&str; 5] = ["identification_number", "full_name", "phone", "address", "personal_email"];

/// Fields that must stay searchable in plaintext. Login lookup matches on these.
pub const PLAINTEXT_FIELDS: [&str; 1] = ["institutional_email"];

/// A record whose sensitive fields can be read and replaced by name.
pub trait SensitiveRecord {
    /// Current string value of `field`, if it holds one.
    fn sensitive_field(&self, field: &str) -> Option<&str>;

    fn set_sensitive_field(&mut self, field: &str, value: String);
}

impl SensitiveRecord for Map<String, Value> {
    fn sensitive_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    fn set_sensitive_field(&mut self, field: &str, value: String) {
        self.insert(field.to_string(), Value::String(value));
    }
}

/// Personal data of a party to a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: Option<String>,
    pub identification_number: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub personal_email: Option<String>,
    pub institutional_email: Option<String>,
}

impl PersonRecord {
    fn slot(&self, field: &str) -> Option<&Option<String>> {
        match field {
            "identification_number" => Some(&self.identification_number),
            "full_name" => Some(&self.full_name),
            "phone" => Some(&self.phone),
            "address" => Some(&self.address),
            "personal_email" => Some(&self.personal_email),
            _ => None,
        }
    }

    fn slot_mut(&mut self, field: &str) -> Option<&mut Option<String>> {
        match field {
            "identification_number" => Some(&mut self.identification_number),
            "full_name" => Some(&mut self.full_name),
            "phone" => Some(&mut self.phone),
            "address" => Some(&mut self.address),
            "personal_email" => Some(&mut self.personal_email),
            _ => None,
        }
    }
}

impl SensitiveRecord for PersonRecord {
    fn sensitive_field(&self, field: &str) -> Option<&str> {
        self.slot(field)?.as_deref()
    }

    fn set_sensitive_field(&mut self, field: &str, value: String) {
        if let Some(slot) = self.slot_mut(field) {
            *slot = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plaintext_fields_are_never_sensitive() {
        for field in PLAINTEXT_FIELDS {
            assert!(!SENSITIVE_FIELDS.contains(&field));
        }
    }

    #[test]
    fn test_person_record_ignores_plaintext_slots() {
        let mut person = PersonRecord {
            institutional_email: Some("juez@rama.gov".into()),
            ..Default::default()
        };
        person.set_sensitive_field("institutional_email", "ENC:x".into());
        assert_eq!(person.institutional_email.as_deref(), Some("juez@rama.gov"));
        assert_eq!(person.sensitive_field("institutional_email"), None);
    }

    #[test]
    fn test_map_only_exposes_strings() {
        let map = json!({ "phone": 3001234567u64, "full_name": "Ana" });
        let map = map.as_object().unwrap();
        assert_eq!(map.sensitive_field("phone"), None);
        assert_eq!(map.sensitive_field("full_name"), Some("Ana"));
    }
}
