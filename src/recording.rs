use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::errors::RecorderError;
use crate::normalization;

/// The extension of every audio file this application writes.
pub const AUDIO_EXTENSION: &str = "m4a";

/// A single recording on this device.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Recording {
    /// The ID of the recording. Doubles as the file stem and the remote row key.
    id: String,

    /// The local audio file. Never a remote URL.
    uri: PathBuf,

    /// The display name.
    name: String,

    /// The date and time it was created, to the millisecond.
    #[serde(with = "millis")]
    date: OffsetDateTime,
}

impl Recording {
    /// Creates a descriptor. `date` is truncated to whole milliseconds,
    /// the precision the index stores.
    pub fn new(id: String, uri: PathBuf, name: String, date: OffsetDateTime) -> Self {
        Recording {
            id,
            uri,
            name,
            date: truncate_to_millis(date),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uri(&self) -> &Path {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> OffsetDateTime {
        self.date
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

/// A row in the remote `recordings` table.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct RemoteRecording {
    pub(crate) id: String,

    /// The owner. Every remote query filters on this.
    pub(crate) user_id: Uuid,

    /// The blob store key, `<user_id>/<id>.m4a`.
    pub(crate) file_path: String,

    pub(crate) name: Option<String>,

    pub(crate) created_at: OffsetDateTime,
}

impl RemoteRecording {
    pub fn new(
        id: String,
        user_id: Uuid,
        file_path: String,
        name: Option<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        RemoteRecording {
            id,
            user_id,
            file_path,
            name,
            created_at,
        }
    }

    /// Builds the row mirroring a local recording.
    pub fn for_recording(user_id: &Uuid, recording: &Recording) -> Self {
        RemoteRecording {
            id: recording.id.clone(),
            user_id: *user_id,
            file_path: blob_key(user_id, &recording.id),
            name: Some(recording.name.clone()),
            created_at: recording.date,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &Uuid {
        &self.user_id
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}

/// One entry of the `metadata.json` backup sidecar.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SidecarEntry {
    pub(crate) id: String,

    #[serde(deserialize_with = "normalization::deserialize")]
    pub(crate) name: String,

    #[serde(with = "millis")]
    pub(crate) date: OffsetDateTime,
}

impl From<&Recording> for SidecarEntry {
    fn from(recording: &Recording) -> Self {
        SidecarEntry {
            id: recording.id.clone(),
            name: recording.name.clone(),
            date: recording.date,
        }
    }
}

/// Drops everything below the millisecond.
pub fn truncate_to_millis(date: OffsetDateTime) -> OffsetDateTime {
    date - Duration::nanoseconds(i64::from(date.nanosecond() % 1_000_000))
}

/// Unix timestamps in milliseconds, the way the index and the backup
/// sidecar store dates.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::{Duration, OffsetDateTime};

    pub fn serialize<S: Serializer>(date: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(date.unix_timestamp() * 1000 + i64::from(date.millisecond()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let millis = i64::deserialize(deserializer)?;

        Ok(OffsetDateTime::from_unix_timestamp(millis.div_euclid(1000))
            + Duration::milliseconds(millis.rem_euclid(1000)))
    }
}

/// Derives a new ID from the creation time in milliseconds, moving
/// forward one millisecond at a time until it is unused.
pub fn generate_id(now: OffsetDateTime, existing: &[Recording]) -> String {
    let mut millis = now.unix_timestamp() * 1000 + i64::from(now.millisecond());

    loop {
        let id = millis.to_string();

        if !existing.iter().any(|r| r.id == id) {
            return id;
        }

        millis += 1;
    }
}

/// Rejects IDs that cannot safely be used as a file stem or object key.
pub fn validate_id(id: &str) -> Result<(), RecorderError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(RecorderError::InvalidId(id.to_owned()))
    }
}

/// The placeholder name for the recording at the given 1-based position.
pub fn default_name(position: usize) -> String {
    format!("Recording {}", position)
}

/// The file name of a recording's audio, `<id>.m4a`.
pub fn audio_file_name(id: &str) -> String {
    format!("{}.{}", id, AUDIO_EXTENSION)
}

/// The blob store key for a recording, `<user_id>/<id>.m4a`.
pub fn blob_key(user_id: &Uuid, id: &str) -> String {
    format!("{}/{}", user_id, audio_file_name(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(seconds)
    }

    fn recording(id: &str) -> Recording {
        Recording::new(
            id.to_owned(),
            PathBuf::from(audio_file_name(id)),
            "x".to_owned(),
            at(0),
        )
    }

    #[test]
    fn ids_are_milliseconds() {
        assert_eq!(generate_id(at(1_700_000_000), &[]), "1700000000000");
    }

    #[test]
    fn ids_skip_collisions() {
        let existing = vec![recording("1700000000000"), recording("1700000000001")];

        assert_eq!(generate_id(at(1_700_000_000), &existing), "1700000000002");
    }

    #[test]
    fn keys_and_names() {
        let user = Uuid::nil();

        assert_eq!(
            blob_key(&user, "42"),
            "00000000-0000-0000-0000-000000000000/42.m4a"
        );
        assert_eq!(default_name(3), "Recording 3");
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(validate_id("1700000000000").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id("a/b").is_err());
    }

    #[test]
    fn index_format() {
        let json = serde_json::to_value(&recording("7")).expect("serialize recording");

        assert_eq!(
            json,
            serde_json::json!({"id": "7", "uri": "7.m4a", "name": "x", "date": 0})
        );
    }

    #[test]
    fn dates_keep_milliseconds() {
        let date = at(1_700_000_000) + Duration::nanoseconds(123_456_789);
        let recording = Recording::new("7".to_owned(), PathBuf::from("7.m4a"), "x".to_owned(), date);

        assert_eq!(recording.date(), at(1_700_000_000) + Duration::milliseconds(123));

        let json = serde_json::to_value(&recording).expect("serialize recording");
        assert_eq!(json["date"], serde_json::json!(1_700_000_000_123_i64));

        let parsed: Recording = serde_json::from_value(json).expect("parse recording");
        assert_eq!(parsed, recording);
    }

    #[test]
    fn dates_before_the_epoch() {
        let parsed: SidecarEntry =
            serde_json::from_str(r#"{"id": "1", "name": "x", "date": -1500}"#).expect("parse entry");

        assert_eq!(parsed.date, at(-2) + Duration::milliseconds(500));
    }
}
