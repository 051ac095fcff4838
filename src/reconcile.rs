//! Identity reconciliation.
//!
//! One observation (an email and/or a phone number) is resolved against the
//! contact graph:
//!
//! 1. No live contact shares either value: a new primary is created.
//! 2. Otherwise the clusters of every matched contact are loaded. Clusters
//!    are one level deep (secondaries link straight to their primary), so
//!    "is one of these primaries or links to one" is the full membership.
//! 3. The oldest primary wins. Every other primary in the loaded set is
//!    demoted under it and its secondaries are re-linked.
//! 4. If the observation carries a value the cluster has never seen, one
//!    secondary row records it.
//!
//! The caller owns the transaction; see `services::identity`.

use std::collections::{BTreeSet, HashSet};

use crate::db::{ContactStore, DbContact, LinkPrecedence};
use crate::error::{IdentityError, MISSING_IDENTIFIER};
use crate::projector::{project, ConsolidatedIdentity};

/// Treat empty strings as absent.
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub fn reconcile<S: ContactStore>(
    store: &S,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<ConsolidatedIdentity, IdentityError> {
    let email = present(email);
    let phone = present(phone);
    if email.is_none() && phone.is_none() {
        return Err(IdentityError::InvalidInput(MISSING_IDENTIFIER.to_string()));
    }

    let direct_matches = store.find_by_exact_match(email, phone)?;
    if direct_matches.is_empty() {
        let created = store.create_contact(email, phone, None, LinkPrecedence::Primary)?;
        log::info!("Created primary contact {}", created.id);
        return Ok(project(&created, &[]));
    }

    let primary_ids: Vec<i64> = direct_matches
        .iter()
        .filter_map(DbContact::owning_primary_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut cluster = store.find_cluster_by_primary_ids(&primary_ids)?;
    if cluster.is_empty() {
        return Err(IdentityError::Consistency(format!(
            "{} direct match(es) resolved to an empty cluster (primary ids {:?})",
            direct_matches.len(),
            primary_ids
        )));
    }

    let primary = canonical_primary(&cluster).clone();

    merge_clusters(store, &mut cluster, primary.id)?;

    if let Some(appended) = append_new_information(store, &cluster, primary.id, email, phone)? {
        cluster.push(appended);
    }

    Ok(project(&primary, &cluster))
}

/// The earliest flagged primary; the earliest contact if none is flagged.
///
/// The fallback contact stays a secondary, so anything appended under it links
/// secondary-to-secondary. That two-level chain is accepted rather than
/// promoting a contact whose own primary was deleted.
fn canonical_primary(cluster: &[DbContact]) -> &DbContact {
    match cluster.iter().find(|c| c.is_primary()) {
        Some(primary) => primary,
        None => {
            log::warn!(
                "Cluster of {} contact(s) has no live primary; treating contact {} as canonical",
                cluster.len(),
                cluster[0].id
            );
            &cluster[0]
        }
    }
}

/// Demote every primary other than `primary_id` and re-link their secondaries,
/// in storage and in the in-memory `cluster`.
fn merge_clusters<S: ContactStore>(
    store: &S,
    cluster: &mut [DbContact],
    primary_id: i64,
) -> Result<(), IdentityError> {
    let demoted: Vec<i64> = cluster
        .iter()
        .filter(|c| c.is_primary() && c.id != primary_id)
        .map(|c| c.id)
        .collect();
    if demoted.is_empty() {
        return Ok(());
    }

    store.demote_primaries(&demoted, primary_id)?;
    store.repoint_secondaries(&demoted, primary_id)?;
    log::info!("Merged primaries {:?} into {}", demoted, primary_id);

    for contact in cluster.iter_mut() {
        if demoted.contains(&contact.id) {
            contact.link_precedence = LinkPrecedence::Secondary;
            contact.linked_id = Some(primary_id);
        } else if contact.linked_id.is_some_and(|id| demoted.contains(&id)) {
            contact.linked_id = Some(primary_id);
        }
    }
    Ok(())
}

/// Record the observation as a secondary when it brings an unseen email or phone.
fn append_new_information<S: ContactStore>(
    store: &S,
    cluster: &[DbContact],
    primary_id: i64,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<Option<DbContact>, IdentityError> {
    let known_emails: HashSet<&str> = cluster.iter().filter_map(|c| c.email.as_deref()).collect();
    let known_phones: HashSet<&str> = cluster
        .iter()
        .filter_map(|c| c.phone_number.as_deref())
        .collect();

    let new_email = email.is_some_and(|e| !known_emails.contains(e));
    let new_phone = phone.is_some_and(|p| !known_phones.contains(p));
    if !new_email && !new_phone {
        return Ok(None);
    }

    let exact_duplicate = cluster
        .iter()
        .any(|c| c.email.as_deref() == email && c.phone_number.as_deref() == phone);
    if exact_duplicate {
        return Ok(None);
    }

    let created = store.create_contact(email, phone, Some(primary_id), LinkPrecedence::Secondary)?;
    log::info!(
        "Created secondary contact {} under primary {}",
        created.id,
        primary_id
    );
    Ok(Some(created))
}
