use futures::future::BoxFuture;
use uuid::Uuid;

use crate::errors::RecorderError;
use crate::recording::RemoteRecording;

pub mod memory;

/// The remote `recordings` table, always scoped to a single owner.
pub trait RecordingsTable: Send + Sync {
    /// Lists the user's rows, newest first.
    fn list(&self, user_id: &Uuid) -> BoxFuture<Result<Vec<RemoteRecording>, RecorderError>>;

    fn insert(&self, row: RemoteRecording) -> BoxFuture<Result<(), RecorderError>>;

    /// Sets the name of one row. Missing rows are left alone.
    fn update_name(
        &self,
        user_id: &Uuid,
        id: &str,
        name: &str,
    ) -> BoxFuture<Result<(), RecorderError>>;

    /// Deletes one row. Missing rows are left alone.
    fn delete(&self, user_id: &Uuid, id: &str) -> BoxFuture<Result<(), RecorderError>>;
}

pub use self::postgres::*;

mod postgres {
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use sqlx::{self, postgres::PgPool};
    use uuid::Uuid;

    use crate::errors::RecorderError;
    use crate::recording::RemoteRecording;

    const RECORDINGS_ID_CONSTRAINT: &str = "recordings_primary_key";

    pub struct PgTable {
        pool: PgPool,
    }

    impl PgTable {
        pub fn new(pool: PgPool) -> Self {
            PgTable { pool }
        }

        pub async fn connect(connection_string: &str) -> Result<Self, RecorderError> {
            let pool = PgPool::connect(connection_string)
                .await
                .map_err(map_sqlx_error)?;

            Ok(PgTable::new(pool))
        }
    }

    // these can be simplified once async functions in traits are stabilized
    impl super::RecordingsTable for PgTable {
        fn list(&self, user_id: &Uuid) -> BoxFuture<Result<Vec<RemoteRecording>, RecorderError>> {
            let user_id = *user_id;

            async move {
                let query = sqlx::query_as::<_, RemoteRecording>(include_str!(
                    "queries/list_recordings.sql"
                ));

                let rows = query
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(rows)
            }
            .boxed()
        }

        fn insert(&self, row: RemoteRecording) -> BoxFuture<Result<(), RecorderError>> {
            async move {
                let query = sqlx::query(include_str!("queries/insert_recording.sql"));

                query
                    .bind(&row.id)
                    .bind(row.user_id)
                    .bind(&row.file_path)
                    .bind(&row.name)
                    .bind(row.created_at)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

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
                let query = sqlx::query(include_str!("queries/rename_recording.sql"));

                query
                    .bind(user_id)
                    .bind(id)
                    .bind(name)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(())
            }
            .boxed()
        }

        fn delete(&self, user_id: &Uuid, id: &str) -> BoxFuture<Result<(), RecorderError>> {
            let user_id = *user_id;
            let id = id.to_owned();

            async move {
                let query = sqlx::query(include_str!("queries/delete_recording.sql"));

                query
                    .bind(user_id)
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(())
            }
            .boxed()
        }
    }

    fn map_sqlx_error(error: sqlx::Error) -> RecorderError {
        use sqlx::Error;

        match error {
            Error::Database(ref e) if e.constraint() == Some(RECORDINGS_ID_CONSTRAINT) => {
                RecorderError::IdAlreadyExists
            }
            _ => RecorderError::Sqlx { source: error },
        }
    }
}
