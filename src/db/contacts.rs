use super::*;

/// The queries the reconciliation engine needs from storage.
///
/// Every call is expected to run inside the caller's transaction; the store
/// never commits on its own.
pub trait ContactStore {
    /// Live contacts whose email equals `email` OR whose phone equals `phone`.
    /// A `None` argument contributes no predicate.
    fn find_by_exact_match(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<DbContact>, DbError>;

    /// Live contacts that are one of `primary_ids` or link to one of them,
    /// ordered by `(created_at, id)`.
    fn find_cluster_by_primary_ids(&self, primary_ids: &[i64]) -> Result<Vec<DbContact>, DbError>;

    fn create_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: Option<i64>,
        link_precedence: LinkPrecedence,
    ) -> Result<DbContact, DbError>;

    /// Flip each of `ids` to secondary under `new_primary_id`.
    fn demote_primaries(&self, ids: &[i64], new_primary_id: i64) -> Result<(), DbError>;

    /// Re-link every contact pointing at one of `old_primary_ids` to `new_primary_id`.
    fn repoint_secondaries(
        &self,
        old_primary_ids: &[i64],
        new_primary_id: i64,
    ) -> Result<(), DbError>;
}

const CONTACT_COLUMNS: &str = "id, email, phone_number, linked_id, link_precedence,
                               created_at, updated_at, deleted_at";

/// `?{start}, ?{start+1}, ...` for an `IN (...)` list.
fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ContactDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Get a contact by ID, including soft-deleted rows.
    pub fn get_contact(&self, id: i64) -> Result<Option<DbContact>, DbError> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_contact_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Number of live primary contacts. Each one is a distinct identity.
    pub fn count_primaries(&self) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM contacts
             WHERE link_precedence = 'primary' AND deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_contact_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbContact> {
        let precedence: String = row.get(4)?;
        let link_precedence = LinkPrecedence::from_db(&precedence).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown link_precedence '{precedence}'").into(),
            )
        })?;
        Ok(DbContact {
            id: row.get(0)?,
            email: row.get(1)?,
            phone_number: row.get(2)?,
            linked_id: row.get(3)?,
            link_precedence,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            deleted_at: row.get(7)?,
        })
    }

    fn query_contacts(
        &self,
        sql: &str,
        params: &[Box<dyn rusqlite::types::ToSql>],
    ) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            Self::map_contact_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl ContactStore for ContactDb {
    fn find_by_exact_match(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<DbContact>, DbError> {
        let mut predicates = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(email) = email {
            params.push(Box::new(email.to_string()));
            predicates.push(format!("email = ?{}", params.len()));
        }
        if let Some(phone) = phone {
            params.push(Box::new(phone.to_string()));
            predicates.push(format!("phone_number = ?{}", params.len()));
        }
        if predicates.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE ({}) AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC",
            predicates.join(" OR ")
        );
        self.query_contacts(&sql, &params)
    }

    fn find_cluster_by_primary_ids(&self, primary_ids: &[i64]) -> Result<Vec<DbContact>, DbError> {
        if primary_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = numbered_placeholders(1, primary_ids.len());
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE (id IN ({placeholders}) OR linked_id IN ({placeholders}))
               AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC"
        );
        let params: Vec<Box<dyn rusqlite::types::ToSql>> = primary_ids
            .iter()
            .map(|id| Box::new(*id) as Box<dyn rusqlite::types::ToSql>)
            .collect();
        self.query_contacts(&sql, &params)
    }

    fn create_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: Option<i64>,
        link_precedence: LinkPrecedence,
    ) -> Result<DbContact, DbError> {
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![email, phone, linked_id, link_precedence.as_str(), now],
        )?;
        Ok(DbContact {
            id: self.conn.last_insert_rowid(),
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            linked_id,
            link_precedence,
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        })
    }

    fn demote_primaries(&self, ids: &[i64], new_primary_id: i64) -> Result<(), DbError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE contacts
             SET link_precedence = 'secondary', linked_id = ?1, updated_at = ?2
             WHERE id IN ({})",
            numbered_placeholders(3, ids.len())
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(new_primary_id), Box::new(now_timestamp())];
        params.extend(ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::types::ToSql>));
        self.conn.execute(
            &sql,
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
        )?;
        Ok(())
    }

    fn repoint_secondaries(
        &self,
        old_primary_ids: &[i64],
        new_primary_id: i64,
    ) -> Result<(), DbError> {
        if old_primary_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE contacts
             SET linked_id = ?1, updated_at = ?2
             WHERE linked_id IN ({})",
            numbered_placeholders(3, old_primary_ids.len())
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(new_primary_id), Box::new(now_timestamp())];
        params.extend(
            old_primary_ids
                .iter()
                .map(|id| Box::new(*id) as Box<dyn rusqlite::types::ToSql>),
        );
        self.conn.execute(
            &sql,
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    #[test]
    fn test_create_primary_and_read_back() {
        let db = test_db();
        let created = db
            .create_contact(Some("doc@hillvalley.edu"), Some("111111"), None, LinkPrecedence::Primary)
            .expect("create");
        let fetched = db.get_contact(created.id).expect("get").expect("exists");
        assert_eq!(fetched, created);
        assert!(fetched.is_primary());
        assert_eq!(fetched.owning_primary_id(), Some(created.id));
    }

    #[test]
    fn test_find_by_exact_match_is_or_and_exact() {
        let db = test_db();
        let a = db
            .create_contact(Some("a@x.io"), Some("100"), None, LinkPrecedence::Primary)
            .unwrap();
        let b = db
            .create_contact(Some("b@x.io"), Some("200"), None, LinkPrecedence::Primary)
            .unwrap();
        db.create_contact(Some("A@x.io"), Some("300"), None, LinkPrecedence::Primary)
            .unwrap();

        let hits = db.find_by_exact_match(Some("a@x.io"), Some("200")).unwrap();
        let ids: Vec<i64> = hits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        // Case-sensitive, untrimmed
        assert!(db.find_by_exact_match(Some(" a@x.io"), None).unwrap().is_empty());
        assert_eq!(db.find_by_exact_match(Some("A@x.io"), None).unwrap().len(), 1);

        // Phone-only lookup ignores the email column entirely
        assert_eq!(db.find_by_exact_match(None, Some("100")).unwrap()[0].id, a.id);
        assert!(db.find_by_exact_match(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_soft_deleted_rows_are_invisible() {
        let db = test_db();
        let a = db
            .create_contact(Some("gone@x.io"), None, None, LinkPrecedence::Primary)
            .unwrap();
        db.conn_ref()
            .execute(
                "UPDATE contacts SET deleted_at = ?1 WHERE id = ?2",
                params![now_timestamp(), a.id],
            )
            .unwrap();

        assert!(db.find_by_exact_match(Some("gone@x.io"), None).unwrap().is_empty());
        assert!(db.find_cluster_by_primary_ids(&[a.id]).unwrap().is_empty());
        assert_eq!(db.count_primaries().unwrap(), 0);
        assert!(db.get_contact(a.id).unwrap().unwrap().deleted_at.is_some());
    }

    #[test]
    fn test_cluster_fetch_is_two_hop_and_ordered() {
        let db = test_db();
        let p1 = db
            .create_contact(Some("p1@x.io"), None, None, LinkPrecedence::Primary)
            .unwrap();
        let p2 = db
            .create_contact(Some("p2@x.io"), None, None, LinkPrecedence::Primary)
            .unwrap();
        let s1 = db
            .create_contact(None, Some("1"), Some(p1.id), LinkPrecedence::Secondary)
            .unwrap();
        let s2 = db
            .create_contact(None, Some("2"), Some(p2.id), LinkPrecedence::Secondary)
            .unwrap();
        let unrelated = db
            .create_contact(Some("other@x.io"), None, None, LinkPrecedence::Primary)
            .unwrap();

        let cluster = db.find_cluster_by_primary_ids(&[p2.id, p1.id]).unwrap();
        let ids: Vec<i64> = cluster.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![p1.id, p2.id, s1.id, s2.id]);
        assert!(!ids.contains(&unrelated.id));
        assert!(db.find_cluster_by_primary_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_cluster_ties_on_created_at_break_by_id() {
        let db = test_db();
        let p = db
            .create_contact(Some("p@x.io"), None, None, LinkPrecedence::Primary)
            .unwrap();
        let s = db
            .create_contact(None, Some("9"), Some(p.id), LinkPrecedence::Secondary)
            .unwrap();
        db.conn_ref()
            .execute(
                "UPDATE contacts SET created_at = '2025-01-01T00:00:00.000000Z'",
                [],
            )
            .unwrap();

        let ids: Vec<i64> = db
            .find_cluster_by_primary_ids(&[p.id])
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![p.id, s.id]);
    }

    #[test]
    fn test_demote_and_repoint() {
        let db = test_db();
        let keep = db
            .create_contact(Some("keep@x.io"), None, None, LinkPrecedence::Primary)
            .unwrap();
        let junior = db
            .create_contact(Some("junior@x.io"), None, None, LinkPrecedence::Primary)
            .unwrap();
        let child = db
            .create_contact(None, Some("555"), Some(junior.id), LinkPrecedence::Secondary)
            .unwrap();

        db.demote_primaries(&[junior.id], keep.id).unwrap();
        db.repoint_secondaries(&[junior.id], keep.id).unwrap();

        let junior = db.get_contact(junior.id).unwrap().unwrap();
        assert_eq!(junior.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(junior.linked_id, Some(keep.id));
        let child = db.get_contact(child.id).unwrap().unwrap();
        assert_eq!(child.linked_id, Some(keep.id));
        assert_eq!(db.count_primaries().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_live_primary_is_a_constraint_violation() {
        let db = test_db();
        db.create_contact(Some("dup@x.io"), Some("42"), None, LinkPrecedence::Primary)
            .unwrap();
        let err = db
            .create_contact(Some("dup@x.io"), Some("42"), None, LinkPrecedence::Primary)
            .expect_err("second live primary with the same pair must be rejected");
        assert!(err.is_constraint_violation());
        assert!(!err.is_busy());
    }

    #[test]
    fn test_contact_without_identifiers_is_rejected() {
        let db = test_db();
        let err = db
            .create_contact(None, None, None, LinkPrecedence::Primary)
            .expect_err("CHECK constraint");
        assert!(err.is_constraint_violation());
    }
}
