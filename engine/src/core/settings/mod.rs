//! Settings Persistence
//!
//! Application settings stored as `{config_dir}/settings.json`:
//! - tolerant loading (missing or broken files fall back to defaults)
//! - normalization that clamps every value into a usable range
//! - advisory locking plus atomic replace on save
//! - `STYLIZE_*` environment overrides applied on top of the file

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::ffmpeg::EncodingProfile;
use crate::core::fs::atomic_write_json_pretty;
use crate::core::generation::{ApiKey, GenerationConfig, RequestPacing, RetryPolicy};
use crate::core::{CoreError, CoreResult};

/// Settings schema version
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Advisory lock file guarding concurrent writers
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Default chat-completions endpoint
pub const DEFAULT_PROVIDER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default image model
pub const DEFAULT_PROVIDER_MODEL: &str = "google/gemini-2.5-flash-image-preview:free";

const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

// =============================================================================
// Settings Sections
// =============================================================================

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub encoder: EncoderSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            provider: ProviderSettings::default(),
            generation: GenerationSettings::default(),
            encoder: EncoderSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

/// Image provider connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub endpoint: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Requested pause before each call after the first; floored at 2s
    pub request_delay_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PROVIDER_ENDPOINT.to_string(),
            model_id: DEFAULT_PROVIDER_MODEL.to_string(),
            api_key: None,
            request_timeout_secs: 120,
            request_delay_ms: 1200,
        }
    }
}

impl ProviderSettings {
    pub fn api_key(&self) -> Option<ApiKey> {
        self.api_key
            .as_deref()
            .map(ApiKey::new)
            .filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Limits applied to generation requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    pub max_concurrent_requests: usize,
    pub max_slide_count: usize,
    pub default_slide_count: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 3,
            max_slide_count: 20,
            default_slide_count: 2,
        }
    }
}

/// ffmpeg location, output quality and per-invocation timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EncoderSettings {
    pub ffmpeg_path: Option<PathBuf>,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub preset: String,
    pub probe_timeout_secs: u64,
    pub encode_timeout_secs: u64,
    pub mux_timeout_secs: u64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            video_bitrate: "6M".to_string(),
            audio_bitrate: "192k".to_string(),
            preset: "medium".to_string(),
            probe_timeout_secs: 60,
            encode_timeout_secs: 600,
            mux_timeout_secs: 300,
        }
    }
}

impl EncoderSettings {
    pub fn profile(&self) -> EncodingProfile {
        EncodingProfile {
            video_bitrate: self.video_bitrate.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
            preset: self.preset.clone(),
            ..EncodingProfile::default()
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }

    pub fn mux_timeout(&self) -> Duration {
        Duration::from_secs(self.mux_timeout_secs)
    }
}

/// Where media, videos and working directories live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub root_dir: PathBuf,
    /// Keep `temp/task_<id>` after a successful compose
    pub retain_work_dirs: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
            retain_work_dirs: false,
        }
    }
}

fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stylize")
}

// =============================================================================
// Normalization & Overrides
// =============================================================================

impl AppSettings {
    /// Corrects out-of-range values instead of failing
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let provider = &mut self.provider;
        if provider.endpoint.trim().is_empty() {
            provider.endpoint = DEFAULT_PROVIDER_ENDPOINT.to_string();
        }
        if provider.model_id.trim().is_empty() {
            provider.model_id = DEFAULT_PROVIDER_MODEL.to_string();
        }
        provider.request_timeout_secs = provider.request_timeout_secs.clamp(5, 600);
        provider.request_delay_ms = provider.request_delay_ms.min(60_000);

        let generation = &mut self.generation;
        generation.max_concurrent_requests = generation.max_concurrent_requests.clamp(1, 10);
        generation.max_slide_count = generation.max_slide_count.clamp(1, 30);
        generation.default_slide_count = generation
            .default_slide_count
            .clamp(1, generation.max_slide_count);

        let defaults = EncoderSettings::default();
        let encoder = &mut self.encoder;
        if !is_bitrate(&encoder.video_bitrate) {
            encoder.video_bitrate = defaults.video_bitrate;
        }
        if !is_bitrate(&encoder.audio_bitrate) {
            encoder.audio_bitrate = defaults.audio_bitrate;
        }
        encoder.preset = normalize_enum(&encoder.preset, X264_PRESETS, defaults.preset);
        encoder.probe_timeout_secs = encoder.probe_timeout_secs.clamp(5, 600);
        encoder.encode_timeout_secs = encoder.encode_timeout_secs.clamp(30, 7200);
        encoder.mux_timeout_secs = encoder.mux_timeout_secs.clamp(30, 3600);
        if encoder
            .ffmpeg_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            encoder.ffmpeg_path = None;
        }

        if self.storage.root_dir.as_os_str().is_empty() {
            self.storage.root_dir = default_storage_root();
        }
    }

    /// Applies `STYLIZE_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `lookup`; unparseable numbers are ignored
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("STYLIZE_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(path) = get("STYLIZE_FFMPEG_PATH") {
            self.encoder.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = get("STYLIZE_STORAGE_DIR") {
            self.storage.root_dir = PathBuf::from(dir);
        }
        if let Some(model) = get("STYLIZE_MODEL_ID") {
            self.provider.model_id = model;
        }
        if let Some(delay) = get("STYLIZE_REQUEST_DELAY_MS").and_then(|v| parse_or_warn(&v)) {
            self.provider.request_delay_ms = delay;
        }
        if let Some(limit) =
            get("STYLIZE_MAX_CONCURRENT_REQUESTS").and_then(|v| parse_or_warn(&v))
        {
            self.generation.max_concurrent_requests = limit;
        }
        self.normalize();
    }

    /// Generation parameters for one request, clamped to the configured limits
    pub fn generation_config(
        &self,
        requested_styles: Vec<String>,
        style_count: Option<usize>,
        concurrency: Option<usize>,
    ) -> GenerationConfig {
        let max_slides = self.generation.max_slide_count.max(1);
        let max_workers = self.generation.max_concurrent_requests.max(1);
        GenerationConfig {
            requested_styles,
            style_count: style_count
                .unwrap_or(self.generation.default_slide_count)
                .clamp(1, max_slides),
            concurrency_limit: concurrency.unwrap_or(max_workers).clamp(1, max_workers),
            pacing: RequestPacing::from_delay_ms(self.provider.request_delay_ms),
            retry: RetryPolicy::default(),
        }
    }
}

fn parse_or_warn<T: std::str::FromStr>(value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!("Ignoring unparseable environment override: {}", value);
    }
    parsed
}

fn is_bitrate(value: &str) -> bool {
    EncodingProfile {
        video_bitrate: value.to_string(),
        ..EncodingProfile::default()
    }
    .validate()
    .is_ok()
}

fn normalize_enum(value: &str, allowed: &[&str], fallback: String) -> String {
    allowed
        .iter()
        .find(|v| v.eq_ignore_ascii_case(value.trim()))
        .map(|v| v.to_string())
        .unwrap_or(fallback)
}

// =============================================================================
// SettingsManager
// =============================================================================

/// Loads and saves [`AppSettings`] under a config directory
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: config_dir.into().join(SETTINGS_FILE),
        }
    }

    /// `dirs::config_dir()/stylize`
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("stylize")
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path.with_file_name(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }
        result
    }

    /// Loads the file, falling back to defaults when missing or unreadable
    pub fn load(&self) -> AppSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AppSettings::default());
            }
            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings: AppSettings = serde_json::from_str(&content)?;
            settings.normalize();
            Ok(settings)
        });

        result.unwrap_or_else(|e| {
            warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        })
    }

    /// Loads the file and applies environment overrides
    pub fn load_with_env(&self) -> AppSettings {
        let mut settings = self.load();
        settings.apply_env_overrides();
        settings
    }

    /// Normalizes and writes atomically; returns what was written
    pub fn save(&self, settings: &AppSettings) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();
            atomic_write_json_pretty(&self.settings_path, &normalized)?;
            info!("Settings saved to {}", self.settings_path.display());
            Ok(normalized)
        })
    }

    /// Deletes the file and returns defaults
    pub fn reset(&self) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            match fs::remove_file(&self.settings_path) {
                Ok(()) => info!("Settings file deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CoreError::IoError(e)),
            }
            Ok(AppSettings::default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.provider.request_timeout_secs, 120);
        assert_eq!(settings.provider.request_delay_ms, 1200);
        assert_eq!(settings.generation.max_concurrent_requests, 3);
        assert_eq!(settings.generation.max_slide_count, 20);
        assert_eq!(settings.generation.default_slide_count, 2);
        assert_eq!(settings.encoder.encode_timeout_secs, 600);
        assert!(!settings.storage.retain_work_dirs);
        assert!(settings.storage.root_dir.ends_with("stylize"));
    }

    #[test]
    fn test_load_missing_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), AppSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        let mut settings = AppSettings::default();
        settings.generation.max_slide_count = 8;
        settings.storage.retain_work_dirs = true;

        manager.save(&settings).unwrap();
        let loaded = manager.load();
        assert_eq!(loaded.generation.max_slide_count, 8);
        assert!(loaded.storage.retain_work_dirs);
        assert!(manager.settings_path().exists());
    }

    #[test]
    fn test_invalid_json_returns_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();
        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), AppSettings::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"generation": {"maxSlideCount": 5}, "encoder": {"preset": "FAST"}}"#,
        )
        .unwrap();
        let loaded = SettingsManager::new(dir.path()).load();
        assert_eq!(loaded.generation.max_slide_count, 5);
        assert_eq!(loaded.generation.max_concurrent_requests, 3);
        assert_eq!(loaded.encoder.preset, "fast");
        assert_eq!(loaded.provider.model_id, DEFAULT_PROVIDER_MODEL);
    }

    #[test]
    fn test_normalize_clamps() {
        let mut settings = AppSettings::default();
        settings.generation.max_concurrent_requests = 0;
        settings.generation.max_slide_count = 500;
        settings.generation.default_slide_count = 0;
        settings.encoder.video_bitrate = "fast".to_string();
        settings.encoder.preset = "bogus".to_string();
        settings.encoder.probe_timeout_secs = 0;
        settings.provider.endpoint = " ".to_string();
        settings.encoder.ffmpeg_path = Some(PathBuf::new());
        settings.normalize();

        assert_eq!(settings.generation.max_concurrent_requests, 1);
        assert_eq!(settings.generation.max_slide_count, 30);
        assert_eq!(settings.generation.default_slide_count, 1);
        assert_eq!(settings.encoder.video_bitrate, "6M");
        assert_eq!(settings.encoder.preset, "medium");
        assert_eq!(settings.encoder.probe_timeout_secs, 5);
        assert_eq!(settings.provider.endpoint, DEFAULT_PROVIDER_ENDPOINT);
        assert_eq!(settings.encoder.ffmpeg_path, None);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STYLIZE_API_KEY", " sk-test "),
            ("STYLIZE_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("STYLIZE_STORAGE_DIR", "/srv/stylize"),
            ("STYLIZE_MODEL_ID", "vendor/model"),
            ("STYLIZE_REQUEST_DELAY_MS", "2500"),
            ("STYLIZE_MAX_CONCURRENT_REQUESTS", "not-a-number"),
        ]);
        let mut settings = AppSettings::default();
        settings.apply_overrides_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.provider.api_key().unwrap().expose(), "sk-test");
        assert_eq!(
            settings.encoder.ffmpeg_path,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert_eq!(settings.storage.root_dir, PathBuf::from("/srv/stylize"));
        assert_eq!(settings.provider.model_id, "vendor/model");
        assert_eq!(settings.provider.request_delay_ms, 2500);
        assert_eq!(settings.generation.max_concurrent_requests, 3);
    }

    #[test]
    fn test_generation_config_clamps_request() {
        let settings = AppSettings::default();
        let config = settings.generation_config(vec![], Some(99), Some(50));
        assert_eq!(config.style_count, 20);
        assert_eq!(config.concurrency_limit, 3);

        let config = settings.generation_config(vec!["Pop Art".into()], None, Some(0));
        assert_eq!(config.style_count, 2);
        assert_eq!(config.concurrency_limit, 1);
        assert_eq!(config.pacing.delay_for(1), Duration::from_secs(2));
    }

    #[test]
    fn test_encoder_profile() {
        let mut encoder = EncoderSettings::default();
        encoder.video_bitrate = "8M".to_string();
        let profile = encoder.profile();
        assert_eq!(profile.video_bitrate, "8M");
        assert_eq!(profile.video_codec, "libx264");
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_reset_deletes_file() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        manager.save(&AppSettings::default()).unwrap();
        manager.reset().unwrap();
        assert!(!manager.settings_path().exists());
        manager.reset().unwrap();
    }
}
