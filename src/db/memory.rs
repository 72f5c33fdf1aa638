use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use futures::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use crate::db::RecordingsTable;
use crate::errors::RecorderError;
use crate::recording::RemoteRecording;

/// A table kept in memory, for tests and offline use.
#[derive(Default)]
pub struct MemoryTable {
    rows: RwLock<Vec<RemoteRecording>>,
    unavailable: AtomicBool,
}

impl MemoryTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_rows(rows: Vec<RemoteRecording>) -> Self {
        MemoryTable {
            rows: RwLock::new(rows),
            ..Default::default()
        }
    }

    /// A snapshot of every row, regardless of owner.
    pub fn rows(&self) -> Vec<RemoteRecording> {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Makes every subsequent call fail with `RemoteUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RecorderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RecorderError::RemoteUnavailable)
        } else {
            Ok(())
        }
    }
}

impl RecordingsTable for MemoryTable {
    fn list(&self, user_id: &Uuid) -> BoxFuture<Result<Vec<RemoteRecording>, RecorderError>> {
        let user_id = *user_id;

        async move {
            self.check()?;

            let mut rows: Vec<_> = self
                .rows()
                .into_iter()
                .filter(|r| r.user_id == user_id)
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            Ok(rows)
        }
        .boxed()
    }

    fn insert(&self, row: RemoteRecording) -> BoxFuture<Result<(), RecorderError>> {
        async move {
            self.check()?;

            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());

            if rows
                .iter()
                .any(|r| r.user_id == row.user_id && r.id == row.id)
            {
                return Err(RecorderError::IdAlreadyExists);
            }

            rows.push(row);
            Ok(())
        }
        .boxed()
    }

    fn update_name(
        &self,
        user_id: &Uuid,
        id: &str,
        name: &str,
    ) -> BoxFuture<Result<(), RecorderError>> {
        let user_id = *user_id;
        let id = id.to_owned();
        let name = name.to_owned();

        async move {
            self.check()?;

            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());

            for row in rows
                .iter_mut()
                .filter(|r| r.user_id == user_id && r.id == id)
            {
                row.name = Some(name.clone());
            }

            Ok(())
        }
        .boxed()
    }

    fn delete(&self, user_id: &Uuid, id: &str) -> BoxFuture<Result<(), RecorderError>> {
        let user_id = *user_id;
        let id = id.to_owned();

        async move {
            self.check()?;

            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
            rows.retain(|r| !(r.user_id == user_id && r.id == id));

            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn row(id: &str, user_id: Uuid, created_at: i64) -> RemoteRecording {
        RemoteRecording::new(
            id.to_owned(),
            user_id,
            format!("{}/{}.m4a", user_id, id),
            None,
            OffsetDateTime::from_unix_timestamp(created_at),
        )
    }

    #[tokio::test]
    async fn scoped_to_owner_and_newest_first() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let table = MemoryTable::with_rows(vec![
            row("1", alice, 1),
            row("2", bob, 2),
            row("3", alice, 3),
        ]);

        let ids: Vec<_> = table
            .list(&alice)
            .await
            .expect("list rows")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["3", "1"]);

        table.delete(&bob, "1").await.expect("delete other user's row");
        assert_eq!(table.rows().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let user = Uuid::new_v4();
        let table = MemoryTable::with_rows(vec![row("1", user, 1)]);

        assert!(matches!(
            table.insert(row("1", user, 2)).await,
            Err(RecorderError::IdAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn ids_are_unique_per_owner_only() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let table = MemoryTable::new();

        table
            .insert(row("1700000000000", alice, 1))
            .await
            .expect("insert first owner's row");
        table
            .insert(row("1700000000000", bob, 1))
            .await
            .expect("insert second owner's row");

        assert_eq!(table.list(&alice).await.expect("list rows").len(), 1);
        assert_eq!(table.list(&bob).await.expect("list rows").len(), 1);
    }
}
