//! Recipient management — the second impl block of [`ScheduleStore`].
//!
//! Recipients belong to exactly one schedule; `(schedule_id, email)` is
//! unique at the SQL level and the constraint violation is surfaced as
//! [`StoreError::DuplicateRecipient`].

use rusqlite::ErrorCode;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::schedules::{ts, ScheduleStore};
use crate::types::Recipient;

impl ScheduleStore {
    /// Add an email destination to a schedule.
    pub fn add_recipient(&self, schedule_id: &str, actor: &str, email: &str) -> Result<Recipient> {
        let schedule = self.get(schedule_id)?;
        self.authorize(actor, &schedule.tenant_id)?;
        validate_email(email)?;

        let id = Uuid::new_v4().to_string();
        let now = self.now();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT INTO recipients (id, schedule_id, email, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, schedule_id, email, now.to_rfc3339()],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::DuplicateRecipient {
                    schedule_id: schedule_id.to_string(),
                    email: email.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        info!(schedule_id = %schedule_id, %email, "recipient added");
        Ok(Recipient {
            id,
            schedule_id: schedule_id.to_string(),
            email: email.to_string(),
            created_at: now,
        })
    }

    /// Remove a recipient from a schedule.
    pub fn remove_recipient(&self, schedule_id: &str, actor: &str, recipient_id: &str) -> Result<()> {
        let schedule = self.get(schedule_id)?;
        self.authorize(actor, &schedule.tenant_id)?;

        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM recipients WHERE id = ?1 AND schedule_id = ?2",
            rusqlite::params![recipient_id, schedule_id],
        )?;
        if n == 0 {
            return Err(StoreError::RecipientNotFound {
                id: recipient_id.to_string(),
            });
        }
        info!(schedule_id = %schedule_id, recipient_id = %recipient_id, "recipient removed");
        Ok(())
    }

    /// All recipients of a schedule, in configuration order.
    pub fn recipients_for(&self, schedule_id: &str) -> Result<Vec<Recipient>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, schedule_id, email, created_at FROM recipients
             WHERE schedule_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([schedule_id], row_to_recipient)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_recipient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recipient> {
    Ok(Recipient {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        email: row.get(2)?,
        created_at: ts(row, 3)?,
    })
}

/// Minimal plausibility check: one `@`, non-empty local part and domain,
/// no whitespace. Real verification is the mail gateway's job.
fn validate_email(email: &str) -> Result<()> {
    let invalid = || StoreError::InvalidEmail(email.to_string());
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    match email.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedules::tests::{new_schedule, test_clock, test_store};

    #[test]
    fn add_list_remove_roundtrip() {
        let store = test_store(test_clock());
        let s = store.create(new_schedule("acme")).unwrap();

        let r1 = store.add_recipient(&s.id, "u-1", "ana@acme.com").unwrap();
        store.add_recipient(&s.id, "u-1", "bob@other.org").unwrap();

        let listed = store.recipients_for(&s.id).unwrap();
        assert_eq!(listed.len(), 2);

        store.remove_recipient(&s.id, "u-1", &r1.id).unwrap();
        let listed = store.recipients_for(&s.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].email, "bob@other.org");
    }

    #[test]
    fn duplicate_recipient_is_rejected() {
        let store = test_store(test_clock());
        let s = store.create(new_schedule("acme")).unwrap();
        store.add_recipient(&s.id, "u-1", "ana@acme.com").unwrap();
        assert!(matches!(
            store.add_recipient(&s.id, "u-1", "ana@acme.com"),
            Err(StoreError::DuplicateRecipient { .. })
        ));
    }

    #[test]
    fn same_email_allowed_on_different_schedules() {
        let store = test_store(test_clock());
        let a = store.create(new_schedule("acme")).unwrap();
        let b = store.create(new_schedule("acme")).unwrap();
        store.add_recipient(&a.id, "u-1", "ana@acme.com").unwrap();
        store.add_recipient(&b.id, "u-1", "ana@acme.com").unwrap();
    }

    #[test]
    fn implausible_addresses_are_rejected() {
        let store = test_store(test_clock());
        let s = store.create(new_schedule("acme")).unwrap();
        for bad in ["", "no-at-sign", "@acme.com", "ana@", "a b@acme.com"] {
            assert!(
                matches!(
                    store.add_recipient(&s.id, "u-1", bad),
                    Err(StoreError::InvalidEmail(_))
                ),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn missing_recipient_removal_errors() {
        let store = test_store(test_clock());
        let s = store.create(new_schedule("acme")).unwrap();
        assert!(matches!(
            store.remove_recipient(&s.id, "u-1", "nope"),
            Err(StoreError::RecipientNotFound { .. })
        ));
    }
}
