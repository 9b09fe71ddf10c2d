use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub segmenting: SegmentingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

/// Batch provider selection and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub endpoint: String,
    pub api_key: String,
}

/// Streaming endpoint and session negotiation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    /// "pcm16" is the only input format the encoder currently produces.
    pub input_format: String,
    pub noise_reduction: String,
    /// "automatic" (server-side VAD) or "explicit" (caller commits turns).
    pub turn_detection: String,
    /// How long to wait for the negotiation acknowledgement.
    pub negotiation_timeout_ms: u64,
}

/// Segment sealing cadence for the batch path.
///
/// Each segment spans `duration_ms` of audio and a new one starts every
/// `step_ms`, so adjacent segments overlap by `duration_ms - step_ms`.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentingConfig {
    pub step_ms: u64,
    pub duration_ms: u64,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    pub interval_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            endpoint: String::new(),
            api_key: String::new(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            model: "transcribe-1".to_string(),
            input_format: "pcm16".to_string(),
            noise_reduction: "near_field".to_string(),
            turn_detection: "automatic".to_string(),
            negotiation_timeout_ms: 10_000,
        }
    }
}

impl Default for SegmentingConfig {
    fn default() -> Self {
        Self {
            step_ms: 30_000,
            duration_ms: 33_000,
            sample_rate: 16_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_500,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl PipelineConfig {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl StreamingConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn automatic_turns(&self) -> bool {
        self.turn_detection == "automatic"
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl SummaryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
