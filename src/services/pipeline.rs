use crate::config::{GatewayConfig, PanoramaInputSource};
use crate::models::{Asset, AssetLocator};
use crate::services::executor::{ExecutorError, ProcessExecutor, ProcessInvocation};
use crate::services::staging::{StagePurpose, StagedFile, StagingArea, StagingError};
use crate::services::storage::{StorageService, StoreError};
use crate::utils::keyed_mutex::KeyedMutex;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Concurrent input downloads per run
const INPUT_FETCH_CONCURRENCY: usize = 4;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to stage pipeline files: {0}")]
    Staging(#[from] StagingError),

    #[error("Failed to fetch input images: {0}")]
    Inputs(#[source] StoreError),

    #[error("Failed to start stitcher: {0}")]
    Spawn(#[from] ExecutorError),

    #[error("Stitcher exited with status {code:?}: {diagnostics}")]
    ProcessFailed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Stitcher timed out after {timeout_secs}s")]
    TimedOut {
        timeout_secs: u64,
        diagnostics: String,
    },

    #[error("Stitcher produced no output file: {diagnostics}")]
    MissingOutput { diagnostics: String },

    #[error("Failed to publish panorama: {0}")]
    Publish(#[source] StoreError),
}

impl PipelineError {
    /// What the stitcher said, for failures it caused.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            PipelineError::ProcessFailed { diagnostics, .. }
            | PipelineError::TimedOut { diagnostics, .. }
            | PipelineError::MissingOutput { diagnostics } => Some(diagnostics),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One panorama generation attempt. Never reused.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub output_key: String,
    pub input_directory: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub invocation: Option<ProcessInvocation>,
    pub result_asset: Option<Asset>,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    fn new(id: Uuid, output_key: String) -> Self {
        Self {
            id,
            status: RunStatus::Pending,
            output_key,
            input_directory: None,
            output_path: None,
            invocation: None,
            result_asset: None,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    fn start(&mut self) {
        debug_assert_eq!(self.status, RunStatus::Pending);
        self.status = RunStatus::Running;
    }

    fn succeed(&mut self, asset: Asset) {
        self.status = RunStatus::Succeeded;
        self.result_asset = Some(asset);
        self.finished_at = Some(Utc::now());
    }

    fn fail(&mut self, error: &PipelineError) {
        self.status = RunStatus::Failed;
        self.failure = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }
}

/// A run that ended in failure, with the run record in its terminal state.
#[derive(Error, Debug)]
#[error("panorama run {} failed: {error}", .run.id)]
pub struct PipelineFailure {
    pub run: PipelineRun,
    #[source]
    pub error: PipelineError,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub uploads_prefix: String,
    pub panorama_prefix: String,
    pub panorama_filename: String,
    pub stitch_command: String,
    pub stitch_args: Vec<String>,
    pub stitch_timeout: Duration,
    pub input_source: PanoramaInputSource,
    pub single_flight: bool,
    pub unique_output_keys: bool,
}

impl From<&GatewayConfig> for PipelineSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            uploads_prefix: config.uploads_prefix.clone(),
            panorama_prefix: config.panorama_prefix.clone(),
            panorama_filename: config.panorama_filename.clone(),
            stitch_command: config.stitch_command.clone(),
            stitch_args: config.stitch_args.clone(),
            stitch_timeout: config.stitch_timeout(),
            input_source: config.input_source.clone(),
            single_flight: config.single_flight,
            unique_output_keys: config.unique_output_keys,
        }
    }
}

/// Orchestrates panorama runs: stage inputs, run the stitcher, publish the
/// result, and release every staged file whatever the outcome.
///
/// Runs that share an output key race on the final object unless
/// `single_flight` is on (the default), in which case they queue on a
/// per-key lock. With `unique_output_keys` each run publishes to its own key.
pub struct PanoramaPipeline {
    storage: Arc<dyn StorageService>,
    staging: Arc<StagingArea>,
    executor: Arc<dyn ProcessExecutor>,
    settings: PipelineSettings,
    in_flight: KeyedMutex,
}

impl PanoramaPipeline {
    pub fn new(
        storage: Arc<dyn StorageService>,
        staging: Arc<StagingArea>,
        executor: Arc<dyn ProcessExecutor>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            storage,
            staging,
            executor,
            settings,
            in_flight: KeyedMutex::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Handle to the per-output-key lock table, shared with the sweeper.
    pub fn in_flight(&self) -> KeyedMutex {
        self.in_flight.clone()
    }

    fn output_key(&self, run_id: Uuid) -> String {
        let name = if self.settings.unique_output_keys {
            format!("{}-{}", run_id, self.settings.panorama_filename)
        } else {
            self.settings.panorama_filename.clone()
        };
        AssetLocator::remote_key(&self.settings.panorama_prefix, &name)
    }

    pub async fn run(&self) -> Result<PipelineRun, PipelineFailure> {
        let id = Uuid::new_v4();
        let mut run = PipelineRun::new(id, self.output_key(id));

        let _guard = if self.settings.single_flight {
            if self.in_flight.is_contended(&run.output_key) {
                tracing::info!("⏳ Run {} waiting for in-flight run on {}", id, run.output_key);
            }
            Some(self.in_flight.lock(&run.output_key).await)
        } else {
            None
        };

        run.start();
        tracing::info!("🧵 Panorama run {} started -> {}", id, run.output_key);

        let mut staged = Vec::new();
        let result = self.execute(&mut run, &mut staged).await;

        for file in staged {
            file.release().await;
        }

        match result {
            Ok(asset) => {
                tracing::info!("✅ Panorama run {} published {}", id, asset.public_url);
                run.succeed(asset);
                Ok(run)
            }
            Err(error) => {
                tracing::error!("❌ Panorama run {} failed: {}", id, error);
                run.fail(&error);
                Err(PipelineFailure { run, error })
            }
        }
    }

    async fn execute(
        &self,
        run: &mut PipelineRun,
        staged: &mut Vec<StagedFile>,
    ) -> Result<Asset, PipelineError> {
        let owner = format!("run-{}", run.id);

        let input_dir = match &self.settings.input_source {
            PanoramaInputSource::Remote => {
                let dir = self
                    .staging
                    .stage_directory(StagePurpose::PipelineInput, &owner)
                    .await?;
                let path = dir.local_path().to_path_buf();
                staged.push(dir);
                let fetched = self.fetch_inputs(&path).await?;
                tracing::info!("📥 Run {} staged {} input image(s)", run.id, fetched);
                path
            }
            PanoramaInputSource::LocalDirectory(dir) => dir.clone(),
        };
        run.input_directory = Some(input_dir.clone());

        let output = self
            .staging
            .stage(
                StagePurpose::PipelineOutput,
                &owner,
                &self.settings.panorama_filename,
            )
            .await?;
        let output_path = output.local_path().to_path_buf();
        staged.push(output);
        run.output_path = Some(output_path.clone());

        let mut args = self.settings.stitch_args.clone();
        args.push(input_dir.to_string_lossy().into_owned());
        args.push(output_path.to_string_lossy().into_owned());

        let invocation = self
            .executor
            .run(
                &self.settings.stitch_command,
                &args,
                self.settings.stitch_timeout,
            )
            .await?;
        let diagnostics = invocation.diagnostics().to_string();
        let timed_out = invocation.timed_out;
        let exit_status = invocation.exit_status;
        run.invocation = Some(invocation);

        if timed_out {
            return Err(PipelineError::TimedOut {
                timeout_secs: self.settings.stitch_timeout.as_secs(),
                diagnostics,
            });
        }
        if exit_status != Some(0) {
            return Err(PipelineError::ProcessFailed {
                code: exit_status,
                diagnostics,
            });
        }
        match tokio::fs::metadata(&output_path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(PipelineError::MissingOutput { diagnostics }),
        }

        self.storage
            .put(&output_path, &run.output_key)
            .await
            .map_err(PipelineError::Publish)
    }

    /// Downloads every uploaded asset into `dir`; returns how many landed.
    async fn fetch_inputs(&self, dir: &Path) -> Result<usize, PipelineError> {
        let assets = self
            .storage
            .list(&self.settings.uploads_prefix)
            .await
            .map_err(PipelineError::Inputs)?;

        let names = input_file_names(&assets, &self.settings.uploads_prefix);
        let storage = &self.storage;
        let results: Vec<bool> = futures::stream::iter(assets.into_iter().zip(names))
            .map(|(asset, name)| async move {
                match storage.download_to(&asset.remote_key, &dir.join(&name)).await {
                    Ok(()) => Ok(true),
                    // Deleted between listing and download
                    Err(e) if e.is_not_found() => {
                        tracing::warn!("Input {} vanished before download", asset.remote_key);
                        Ok(false)
                    }
                    Err(e) => Err(PipelineError::Inputs(e)),
                }
            })
            .buffer_unordered(INPUT_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(results.into_iter().filter(|fetched| *fetched).count())
    }
}

/// Local file names for the staged inputs, one per asset and all distinct.
/// Keys nested below `prefix` are flattened with `_`, so `uploads/a/x.jpg`
/// and `uploads/b/x.jpg` become `a_x.jpg` and `b_x.jpg`.
fn input_file_names(assets: &[Asset], prefix: &str) -> Vec<String> {
    let mut taken = HashSet::new();
    assets
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let relative = asset
                .remote_key
                .strip_prefix(prefix)
                .unwrap_or(&asset.remote_key);
            let flat = relative.trim_matches('/').replace('/', "_");
            let mut name = match flat.as_str() {
                "" | "." | ".." => format!("input-{}", i),
                _ => flat,
            };
            while !taken.insert(name.clone()) {
                name = format!("{}-{}", i, name);
            }
            name
        })
        .collect()
}
