use std::time::Duration;

/// Environment-governed knobs. Loaded once at startup into a plain struct,
/// not a dynamically typed configuration blob.
#[derive(Debug, Clone)]
pub struct ReelcutConfig {
    pub max_clip_count: usize,
    pub max_file_size_bytes: u64,
    pub max_attempts: u32,
    pub visibility_timeout: Duration,
    pub visibility_slack: Duration,
    pub n_clip: usize,
    pub retry_base_delay: Duration,
    pub retry_cap_delay: Duration,
    pub tool_grace_period: Duration,
    pub reaper_interval: Duration,
    pub terminal_retention: Duration,
    pub abandoned_retention: Duration,
    pub stage_timeouts: StageTimeouts,
}

#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub audio_slice: Duration,
    pub beats: Duration,
    pub plan: Duration,
    pub normalize: Duration,
    pub cut_and_concat: Duration,
    pub style_grade: Duration,
    pub mux: Duration,
    pub quality_gate: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            audio_slice: Duration::from_secs(30),
            beats: Duration::from_secs(60),
            plan: Duration::from_secs(5),
            normalize: Duration::from_secs(180),
            cut_and_concat: Duration::from_secs(240),
            style_grade: Duration::from_secs(120),
            mux: Duration::from_secs(60),
            quality_gate: Duration::from_secs(30),
        }
    }
}

impl Default for ReelcutConfig {
    fn default() -> Self {
        Self {
            max_clip_count: 5,
            max_file_size_bytes: 100 * 1024 * 1024,
            max_attempts: 2,
            visibility_timeout: Duration::from_secs(15 * 60),
            visibility_slack: Duration::from_secs(2 * 60),
            n_clip: 2,
            retry_base_delay: Duration::from_secs(30),
            retry_cap_delay: Duration::from_secs(10 * 60),
            tool_grace_period: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(10 * 60),
            terminal_retention: Duration::from_secs(60 * 60),
            abandoned_retention: Duration::from_secs(24 * 60 * 60),
            stage_timeouts: StageTimeouts::default(),
        }
    }
}

impl ReelcutConfig {
    /// Loads overrides from the environment, falling back to spec defaults
    /// for any variable that is unset or fails to parse.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = parse_env("MAX_CLIP_COUNT") {
            cfg.max_clip_count = v;
        }
        if let Some(v) = parse_env::<u64>("MAX_FILE_SIZE") {
            cfg.max_file_size_bytes = v;
        }
        if let Some(v) = parse_env("MAX_ATTEMPTS") {
            cfg.max_attempts = v;
        }
        if let Some(v) = parse_env::<u64>("T_VIS_SECS") {
            cfg.visibility_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_env("N_CLIP") {
            cfg.n_clip = v;
        }
        cfg
    }

    /// Backoff delay for the `attempt_count`'th NACK (1-indexed), per the
    /// formula `min(T_base * 2^(attempt_count-1), T_cap)`.
    pub fn retry_backoff(&self, attempt_count: u32) -> Duration {
        let exp = attempt_count.saturating_sub(1).min(32);
        let scaled = self.retry_base_delay.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        scaled.min(self.retry_cap_delay)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_doubles_then_caps() {
        let cfg = ReelcutConfig::default();
        assert_eq!(cfg.retry_backoff(1), Duration::from_secs(30));
        assert_eq!(cfg.retry_backoff(2), Duration::from_secs(60));
        assert_eq!(cfg.retry_backoff(3), Duration::from_secs(120));
        assert_eq!(cfg.retry_backoff(10), cfg.retry_cap_delay);
    }
}
