use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, error, warn, Logger};

use crate::errors::RecorderError;
use crate::kv::KeyValueStore;
use crate::recording::AUDIO_EXTENSION;

pub const NOTIFICATIONS_KEY: &str = "notifications";
pub const HIGH_QUALITY_KEY: &str = "highQualityRecording";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Settings {
    pub notifications: bool,
    pub high_quality_recording: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            notifications: true,
            high_quality_recording: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

/// The platform's notification permission flow.
pub trait NotificationPermissions: Send + Sync {
    fn status(&self) -> BoxFuture<Result<PermissionStatus, RecorderError>>;

    /// Prompts the user, if the platform still allows it.
    fn request(&self) -> BoxFuture<Result<PermissionStatus, RecorderError>>;

    /// Installs or removes the handler that presents notifications.
    fn set_enabled(&self, enabled: bool) -> BoxFuture<Result<(), RecorderError>>;
}

/// Encoder settings handed to the audio capture layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordingProfile {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_rate: u32,
    pub extension: &'static str,
}

impl RecordingProfile {
    pub const HIGH: RecordingProfile = RecordingProfile {
        sample_rate: 44_100,
        channels: 2,
        bit_rate: 128_000,
        extension: AUDIO_EXTENSION,
    };

    pub const LOW: RecordingProfile = RecordingProfile {
        sample_rate: 22_050,
        channels: 1,
        bit_rate: 64_000,
        extension: AUDIO_EXTENSION,
    };
}

/// Persists the user's toggles and applies them.
pub struct SettingsService {
    logger: Arc<Logger>,
    kv: Arc<dyn KeyValueStore>,
    permissions: Arc<dyn NotificationPermissions>,
    settings: Settings,
}

impl SettingsService {
    pub fn new(
        logger: Arc<Logger>,
        kv: Arc<dyn KeyValueStore>,
        permissions: Arc<dyn NotificationPermissions>,
    ) -> Self {
        SettingsService {
            logger,
            kv,
            permissions,
            settings: Settings::default(),
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Reads stored toggles over the defaults. Notifications are only
    /// re-enabled when the user explicitly turned them on earlier.
    pub async fn load(&mut self) -> Result<Settings, RecorderError> {
        let notifications = read_flag(&*self.kv, NOTIFICATIONS_KEY)?;
        let high_quality = read_flag(&*self.kv, HIGH_QUALITY_KEY)?;

        if let Some(value) = notifications {
            self.settings.notifications = value;
        }

        if let Some(value) = high_quality {
            self.settings.high_quality_recording = value;
        }

        if notifications == Some(true) {
            if let Err(e) = self.enable_notifications().await {
                warn!(self.logger, "Could not enable notifications: {}", e);
            }
        }

        Ok(self.settings)
    }

    /// Turns notifications on or off. Turning them on without permission
    /// stores `false` and fails with `PermissionDenied`.
    pub async fn toggle_notifications(&mut self, value: bool) -> Result<(), RecorderError> {
        self.settings.notifications = value;
        self.kv.set(NOTIFICATIONS_KEY, &value.to_string())?;

        if value {
            self.enable_notifications().await
        } else {
            self.permissions.set_enabled(false).await
        }
    }

    pub fn toggle_high_quality(&mut self, value: bool) -> Result<RecordingProfile, RecorderError> {
        self.settings.high_quality_recording = value;
        self.kv.set(HIGH_QUALITY_KEY, &value.to_string())?;

        debug!(self.logger, "Updated recording quality"; "high_quality" => value);
        Ok(self.recording_profile())
    }

    pub fn recording_profile(&self) -> RecordingProfile {
        if self.settings.high_quality_recording {
            RecordingProfile::HIGH
        } else {
            RecordingProfile::LOW
        }
    }

    async fn enable_notifications(&mut self) -> Result<(), RecorderError> {
        let mut status = self.permissions.status().await?;

        if status != PermissionStatus::Granted {
            status = self.permissions.request().await?;
        }

        if status != PermissionStatus::Granted {
            error!(self.logger, "Notification permission not granted"; "status" => ?status);
            self.settings.notifications = false;
            self.kv.set(NOTIFICATIONS_KEY, "false")?;

            return Err(RecorderError::PermissionDenied {
                what: "notifications",
            });
        }

        self.permissions.set_enabled(true).await
    }
}

fn read_flag(kv: &dyn KeyValueStore, key: &str) -> Result<Option<bool>, RecorderError> {
    Ok(kv.get(key)?.map(|v| v == "true"))
}
