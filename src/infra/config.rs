use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::scoring::ScoringWeights;
use crate::core::task::TaskType;

/// Config file names searched in priority order
const CONFIG_FILES: [&str; 4] = ["taskctx.toml", "taskctx.yaml", "taskctx.json", ".taskctx.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Context collection pipeline settings
    pub collector: CollectorConfig,

    /// Persistence settings
    pub store: StoreConfig,
}

/// Every knob of the collection pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig
{
    /// Allowed root; every file read must resolve inside it
    pub root: PathBuf,

    /// Hard cap on contexts returned per task
    pub max_contexts_per_task: usize,

    /// Sections scoring below this are dropped
    pub relevance_threshold: f32,

    /// Files above this many bytes are skipped, never partially read
    pub max_file_size: u64,

    /// Directory names (or path fragments containing '/') never read
    pub exclude_patterns: Vec<String>,

    /// Source extensions considered by scans (without the dot)
    pub include_extensions: Vec<String>,

    /// Result cache time-to-live
    pub cache_expiry_hours: f64,

    /// Result cache entry cap
    pub cache_max_entries: usize,

    pub enable_pattern_matching: bool,
    pub enable_dependency_analysis: bool,
    pub enable_deduplication: bool,
    pub enable_summarization: bool,

    /// Global per-task token ceiling, used when no per-type limit is set
    pub max_tokens_per_task: usize,

    /// Contexts above this estimate are summarized
    pub max_tokens_per_context: usize,

    /// Per task-type token ceilings
    pub token_limits: TokenLimits,

    /// Relevance weight vector
    pub weights: ScoringWeights,

    /// Lines of padding around grouped keyword/entity hits
    pub context_size: usize,

    /// Lines read on each side of a stack frame
    pub stack_frame_window: usize,

    /// Minimum similarity for similar-section matches
    pub similarity_threshold: f32,

    /// Definition matches kept per entity
    pub max_patterns_per_entity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenLimits
{
    pub bug: Option<usize>,
    pub feature: Option<usize>,
    pub improvement: Option<usize>,
}

impl Default for TokenLimits
{
    fn default() -> Self
    {
        Self {
            bug: Some(8000),
            feature: Some(6000),
            improvement: Some(5000),
        }
    }
}

impl TokenLimits
{
    /// Per-type ceiling, if one is configured
    pub fn for_task(
        &self,
        task_type: TaskType,
    ) -> Option<usize>
    {
        match task_type
        {
            TaskType::Bug => self.bug,
            TaskType::Feature => self.feature,
            TaskType::Improvement => self.improvement,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig
{
    /// JSON-lines file holding persisted contexts
    pub path: PathBuf,

    /// Contexts older than this are reported stale
    pub freshness_hours: i64,
}

impl Default for StoreConfig
{
    fn default() -> Self
    {
        Self {
            path: PathBuf::from(".taskctx/contexts.jsonl"),
            freshness_hours: 24,
        }
    }
}

impl Default for CollectorConfig
{
    fn default() -> Self
    {
        Self {
            root: PathBuf::from("."),
            max_contexts_per_task: 20,
            relevance_threshold: 0.3,
            max_file_size: 1024 * 1024,
            exclude_patterns: [
                "node_modules",
                ".git",
                "dist",
                "build",
                "target",
                "__pycache__",
                ".next",
                "coverage",
                "vendor",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            include_extensions: [
                "rs", "py", "js", "jsx", "ts", "tsx", "java", "go", "c", "h", "cpp", "hpp", "cs", "rb",
                "php", "kt", "swift", "scala",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            cache_expiry_hours: 1.0,
            cache_max_entries: 100,
            enable_pattern_matching: true,
            enable_dependency_analysis: true,
            enable_deduplication: true,
            enable_summarization: true,
            max_tokens_per_task: 6000,
            max_tokens_per_context: 1500,
            token_limits: TokenLimits::default(),
            weights: ScoringWeights::default(),
            context_size: 3,
            stack_frame_window: 10,
            similarity_threshold: 0.3,
            max_patterns_per_entity: 5,
        }
    }
}

impl CollectorConfig
{
    /// Token ceiling for a task type, falling back to the global ceiling
    pub fn token_ceiling(
        &self,
        task_type: TaskType,
    ) -> usize
    {
        self.token_limits
            .for_task(task_type)
            .unwrap_or(self.max_tokens_per_task)
    }

    /// Clamp ratios into [0, 1] and reject unusable ceilings
    pub fn validate(&mut self) -> Result<()>
    {
        fn unit(x: f32) -> f32
        {
            if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
        }

        self.relevance_threshold = unit(self.relevance_threshold);
        self.similarity_threshold = unit(self.similarity_threshold);
        self.weights.keyword = unit(self.weights.keyword);
        self.weights.entity = unit(self.weights.entity);
        self.weights.intent = unit(self.weights.intent);
        self.weights.proximity = unit(self.weights.proximity);

        if self.max_tokens_per_task == 0 || self.max_tokens_per_context == 0
        {
            bail!("token ceilings must be greater than zero");
        }
        if [
            self.token_limits.bug,
            self.token_limits.feature,
            self.token_limits.improvement,
        ]
        .contains(&Some(0))
        {
            bail!("per task-type token limits must be greater than zero");
        }
        if !self.cache_expiry_hours.is_finite() || self.cache_expiry_hours < 0.0
        {
            bail!("cache_expiry_hours must be a non-negative number");
        }

        // Extensions are matched without the leading dot
        for ext in &mut self.include_extensions
        {
            *ext = ext
                .trim_start_matches('.')
                .to_ascii_lowercase();
        }

        Ok(())
    }
}

pub fn load_config() -> Result<Config>
{
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    for path in &CONFIG_FILES
    {
        if Path::new(path).exists()
        {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // Add environment variables with TASKCTX_ prefix (TASKCTX_COLLECTOR__ROOT=...)
    builder = builder.add_source(
        config::Environment::with_prefix("TASKCTX")
            .prefix_separator("_")
            .separator("__"),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let mut parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    parsed
        .collector
        .validate()?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join("taskctx.toml");

    if config_path.exists() && !args.force
    {
        bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn ceiling_falls_back_to_global()
    {
        let mut cfg = CollectorConfig::default();
        cfg.token_limits
            .feature = None;
        cfg.max_tokens_per_task = 4321;

        assert_eq!(cfg.token_ceiling(TaskType::Feature), 4321);
        assert_eq!(cfg.token_ceiling(TaskType::Bug), 8000);
    }

    #[test]
    fn validate_clamps_ratios_and_normalizes_extensions() -> Result<()>
    {
        let mut cfg = CollectorConfig {
            relevance_threshold: 1.7,
            include_extensions: vec![".RS".into(), "py".into()],
            ..Default::default()
        };
        cfg.weights
            .entity = -2.0;
        cfg.validate()?;

        assert_eq!(cfg.relevance_threshold, 1.0);
        assert_eq!(
            cfg.weights
                .entity,
            0.0
        );
        assert_eq!(cfg.include_extensions, vec!["rs".to_string(), "py".to_string()]);
        Ok(())
    }

    #[test]
    fn validate_rejects_zero_ceiling()
    {
        let mut cfg = CollectorConfig {
            max_tokens_per_context: 0,
            ..Default::default()
        };
        assert!(
            cfg.validate()
                .is_err()
        );
    }

    #[test]
    fn default_config_round_trips_through_toml() -> Result<()>
    {
        let text = toml::to_string_pretty(&Config::default())?;
        let back: Config = toml::from_str(&text)?;
        assert_eq!(
            back.collector
                .max_contexts_per_task,
            20
        );
        assert_eq!(
            back.store
                .freshness_hours,
            24
        );
        Ok(())
    }
}
