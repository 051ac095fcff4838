//! Folds a primary contact and its cluster into the response shape.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::db::DbContact;

/// The `contact` object returned for every successful identify call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySummary {
    pub primary_contact_id: i64,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedIdentity {
    pub contact: IdentitySummary,
}

/// Insertion-ordered set of distinct values.
struct OrderedSet<T> {
    seen: HashSet<T>,
    items: Vec<T>,
}

impl<T: Clone + Eq + std::hash::Hash> OrderedSet<T> {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, value: T) {
        if self.seen.insert(value.clone()) {
            self.items.push(value);
        }
    }

    fn into_vec(self) -> Vec<T> {
        self.items
    }
}

/// Build the consolidated view. `cluster` is expected in `(created_at, id)` order
/// and may or may not contain `primary` itself.
pub fn project(primary: &DbContact, cluster: &[DbContact]) -> ConsolidatedIdentity {
    let mut emails = OrderedSet::new();
    let mut phone_numbers = OrderedSet::new();
    let mut secondary_ids = OrderedSet::new();

    // Primary's own values lead regardless of creation order
    if let Some(email) = &primary.email {
        emails.push(email.clone());
    }
    if let Some(phone) = &primary.phone_number {
        phone_numbers.push(phone.clone());
    }

    for contact in cluster {
        if let Some(email) = &contact.email {
            emails.push(email.clone());
        }
        if let Some(phone) = &contact.phone_number {
            phone_numbers.push(phone.clone());
        }
        if contact.id != primary.id {
            secondary_ids.push(contact.id);
        }
    }

    ConsolidatedIdentity {
        contact: IdentitySummary {
            primary_contact_id: primary.id,
            emails: emails.into_vec(),
            phone_numbers: phone_numbers.into_vec(),
            secondary_contact_ids: secondary_ids.into_vec(),
        },
    }
}
