#[derive(Debug, Clone, PartialEq)]
pub struct BktParams {
    pub p_init: f64,
    pub p_learn: f64,
    pub p_guess: f64,
    pub p_slip: f64,
    /// Scores at or above this count as a correct response.
    pub correct_score: f64,
    pub epsilon: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            p_init: 0.3,
            p_learn: 0.1,
            p_guess: 0.2,
            p_slip: 0.1,
            correct_score: 0.8,
            epsilon: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeAdjustParams {
    pub slow_ratio: f64,
    pub fast_ratio: f64,
    pub slow_factor: f64,
    pub fast_factor: f64,
}

impl Default for TimeAdjustParams {
    fn default() -> Self {
        Self {
            slow_ratio: 1.2,
            fast_ratio: 0.8,
            slow_factor: 0.9,
            fast_factor: 1.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingParams {
    pub mastery_threshold: f64,
    pub top_n: usize,
}

impl Default for RankingParams {
    fn default() -> Self {
        Self {
            mastery_threshold: 0.9,
            top_n: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasteryConfig {
    pub bkt: BktParams,
    pub time_adjust: TimeAdjustParams,
    pub ranking: RankingParams,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a finite number in [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("epsilon must be in (0, 0.5), got {0}")]
    Epsilon(f64),
    #[error("{name} must be a positive finite number, got {value}")]
    Positive { name: &'static str, value: f64 },
    #[error("top_n must be at least 1")]
    ZeroTopN,
    #[error("fast ratio {fast} must not exceed slow ratio {slow}")]
    RatioOrder { fast: f64, slow: f64 },
}

impl MasteryConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_override("BKT_P_INIT", &mut config.bkt.p_init);
        env_override("BKT_P_LEARN", &mut config.bkt.p_learn);
        env_override("BKT_P_GUESS", &mut config.bkt.p_guess);
        env_override("BKT_P_SLIP", &mut config.bkt.p_slip);
        env_override("BKT_CORRECT_SCORE", &mut config.bkt.correct_score);
        env_override("BKT_EPSILON", &mut config.bkt.epsilon);
        env_override("MASTERY_THRESHOLD", &mut config.ranking.mastery_threshold);
        env_override("RECOMMEND_TOP_N", &mut config.ranking.top_n);
        env_override("TIME_SLOW_RATIO", &mut config.time_adjust.slow_ratio);
        env_override("TIME_FAST_RATIO", &mut config.time_adjust.fast_ratio);
        env_override("TIME_SLOW_FACTOR", &mut config.time_adjust.slow_factor);
        env_override("TIME_FAST_FACTOR", &mut config.time_adjust.fast_factor);

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bkt = &self.bkt;
        for (name, value) in [
            ("p_init", bkt.p_init),
            ("p_learn", bkt.p_learn),
            ("p_guess", bkt.p_guess),
            ("p_slip", bkt.p_slip),
            ("correct_score", bkt.correct_score),
            ("mastery_threshold", self.ranking.mastery_threshold),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }

        if !bkt.epsilon.is_finite() || bkt.epsilon <= 0.0 || bkt.epsilon >= 0.5 {
            return Err(ConfigError::Epsilon(bkt.epsilon));
        }

        let time = &self.time_adjust;
        for (name, value) in [
            ("slow_ratio", time.slow_ratio),
            ("fast_ratio", time.fast_ratio),
            ("slow_factor", time.slow_factor),
            ("fast_factor", time.fast_factor),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Positive { name, value });
            }
        }
        if time.fast_ratio > time.slow_ratio {
            return Err(ConfigError::RatioOrder {
                fast: time.fast_ratio,
                slow: time.slow_ratio,
            });
        }

        if self.ranking.top_n == 0 {
            return Err(ConfigError::ZeroTopN);
        }

        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(key: &str, target: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config value"),
    }
}
