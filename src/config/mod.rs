use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Which object store backs the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// S3-compatible remote store (MinIO, AWS, GCS interop)
    S3,
    /// In-process store, for local development and tests
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" | "minio" => Ok(Self::S3),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Where a panorama run reads its input images from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanoramaInputSource {
    /// Re-download every asset under the uploads prefix into a per-run directory
    Remote,
    /// Hand an existing local directory to the stitcher as-is
    LocalDirectory(PathBuf),
}

impl FromStr for PanoramaInputSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("remote") {
            return Ok(Self::Remote);
        }
        if s.eq_ignore_ascii_case("local") {
            return Ok(Self::LocalDirectory(PathBuf::from("uploads")));
        }
        match s.split_once(':') {
            Some((kind, dir)) if kind.eq_ignore_ascii_case("local") && !dir.is_empty() => {
                Ok(Self::LocalDirectory(PathBuf::from(dir)))
            }
            _ => Err(format!("unknown panorama input source '{}'", s)),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Object store backend (default: s3)
    pub storage_backend: StorageBackend,

    /// Bucket holding every asset (default: "cg-project-bucket")
    pub bucket: String,

    /// Base of public asset URLs (default: "https://storage.googleapis.com")
    pub public_base_url: String,

    /// Key namespace for uploaded images (default: "uploads/")
    pub uploads_prefix: String,

    /// Key namespace for generated panoramas (default: "panorama/")
    pub panorama_prefix: String,

    /// File name of the stitched result (default: "panorama.jpg")
    pub panorama_filename: String,

    /// Root of the local staging area
    pub staging_dir: PathBuf,

    /// Staging entries older than this are swept (default: 24)
    pub staging_cleanup_age_hours: u64,

    /// Stitcher executable (default: "python")
    pub stitch_command: String,

    /// Arguments placed before the input directory and output path (default: ["stitch.py"])
    pub stitch_args: Vec<String>,

    /// Stitcher timeout in seconds (default: 300)
    pub stitch_timeout_secs: u64,

    pub input_source: PanoramaInputSource,

    /// Serialize panorama runs writing to the same output key (default: true)
    pub single_flight: bool,

    /// Give every panorama run its own output key (default: false)
    pub unique_output_keys: bool,

    /// Maximum upload size in bytes (default: 64 MB)
    pub max_file_size: usize,

    /// Directory served for unmatched GET requests (default: "public")
    pub static_dir: PathBuf,

    /// Allowed CORS origins (comma separated, "*" for any)
    pub allowed_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::S3,
            bucket: "cg-project-bucket".to_string(),
            public_base_url: "https://storage.googleapis.com".to_string(),
            uploads_prefix: "uploads/".to_string(),
            panorama_prefix: "panorama/".to_string(),
            panorama_filename: "panorama.jpg".to_string(),
            staging_dir: env::temp_dir().join("panorama-gateway"),
            staging_cleanup_age_hours: 24,
            stitch_command: "python".to_string(),
            stitch_args: vec!["stitch.py".to_string()],
            stitch_timeout_secs: 300,
            input_source: PanoramaInputSource::Remote,
            single_flight: true,
            unique_output_keys: false,
            max_file_size: 64 * 1024 * 1024, // 64 MB
            static_dir: PathBuf::from("public"),
            allowed_origins: vec![
                "http://localhost:4000".to_string(),
                "http://127.0.0.1:4000".to_string(),
            ],
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn flag_env(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

/// Makes sure a key namespace ends with exactly one '/'
fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let input_source = match env::var("PANORAMA_INPUT_SOURCE") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!("{}, falling back to remote inputs", e);
                PanoramaInputSource::Remote
            }),
            Err(_) => default.input_source,
        };

        Self {
            storage_backend: env::var("STORAGE_BACKEND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.storage_backend),

            bucket: env::var("MINIO_BUCKET").unwrap_or(default.bucket),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default.public_base_url),

            uploads_prefix: normalize_prefix(
                env::var("UPLOADS_PREFIX").unwrap_or(default.uploads_prefix),
            ),

            panorama_prefix: normalize_prefix(
                env::var("PANORAMA_PREFIX").unwrap_or(default.panorama_prefix),
            ),

            panorama_filename: env::var("PANORAMA_FILENAME").unwrap_or(default.panorama_filename),

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            staging_cleanup_age_hours: parse_env(
                "STAGING_CLEANUP_AGE_HOURS",
                default.staging_cleanup_age_hours,
            ),

            stitch_command: env::var("STITCH_COMMAND").unwrap_or(default.stitch_command),

            stitch_args: env::var("STITCH_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(default.stitch_args),

            stitch_timeout_secs: parse_env("STITCH_TIMEOUT_SECS", default.stitch_timeout_secs),

            input_source,

            single_flight: flag_env("PANORAMA_SINGLE_FLIGHT", default.single_flight),

            unique_output_keys: flag_env("PANORAMA_UNIQUE_KEYS", default.unique_output_keys),

            max_file_size: parse_env("MAX_FILE_SIZE", default.max_file_size),

            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.static_dir),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (in-memory store, permissive CORS)
    pub fn development() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            bucket: "dev-bucket".to_string(),
            public_base_url: "http://localhost:4000/static".to_string(),
            stitch_timeout_secs: 60,
            allowed_origins: vec!["*".to_string()],
            ..Self::default()
        }
    }

    pub fn stitch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stitch_timeout_secs)
    }
}
