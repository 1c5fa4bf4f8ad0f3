//! 环境变量配置

use crate::error::Error;
use crate::logging::Level;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PROJECT_ID: &str = "GOOGLE_CLOUD_PROJECT";
pub const ENV_TOPIC_ID: &str = "PUBSUB_TOPIC_ID";
pub const ENV_PORT: &str = "PORT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_TRACE_SAMPLE_RATIO: &str = "TRACE_SAMPLE_RATIO";
pub const ENV_SHUTDOWN_GRACE_SECS: &str = "SHUTDOWN_GRACE_SECS";
pub const ENV_EVENT_TIMEOUT_SECS: &str = "EVENT_TIMEOUT_SECS";
pub const ENV_TRACE_EXPORTER: &str = "TRACE_EXPORTER";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TRACE_SAMPLE_RATIO: f64 = 0.1;
/// 短于托管平台的终止宽限期
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// span 的导出目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceExporter {
    /// OTLP/HTTP，端点由 `OTEL_EXPORTER_OTLP_*` 环境变量决定
    #[default]
    Otlp,
    /// 只在本地开启 span，不导出
    None,
}

impl FromStr for TraceExporter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "otlp" => Ok(Self::Otlp),
            "none" => Ok(Self::None),
            other => Err(format!("unknown trace exporter {other:?}, expected otlp or none")),
        }
    }
}

impl std::fmt::Display for TraceExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Otlp => f.write_str("otlp"),
            Self::None => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub project_id: String,
    pub topic_id: String,
    pub port: u16,
    pub log_level: Level,
    pub trace_sample_ratio: f64,
    pub trace_exporter: TraceExporter,
    pub grace_period: Duration,
    pub event_timeout: Option<Duration>,
}

impl Config {
    /// 从进程环境变量读取配置
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源读取配置
    ///
    /// 空字符串视为未设置。必填项缺失或取值无法解析时返回错误。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let required =
            |key: &str| lookup(key).ok_or_else(|| Error::MissingEnv(key.to_string()));

        let config = Self {
            project_id: required(ENV_PROJECT_ID)?,
            topic_id: required(ENV_TOPIC_ID)?,
            port: parse(&lookup, ENV_PORT)?.unwrap_or(DEFAULT_PORT),
            log_level: parse(&lookup, ENV_LOG_LEVEL)?.unwrap_or(Level::Info),
            trace_sample_ratio: parse(&lookup, ENV_TRACE_SAMPLE_RATIO)?
                .unwrap_or(DEFAULT_TRACE_SAMPLE_RATIO),
            trace_exporter: parse(&lookup, ENV_TRACE_EXPORTER)?.unwrap_or_default(),
            grace_period: parse(&lookup, ENV_SHUTDOWN_GRACE_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_GRACE_PERIOD),
            event_timeout: parse(&lookup, ENV_EVENT_TIMEOUT_SECS)?.map(Duration::from_secs),
        };

        // 全量采样时导出请求本身也会被追踪
        if !(0.0..1.0).contains(&config.trace_sample_ratio) {
            return Err(Error::InvalidSampleRatio(config.trace_sample_ratio));
        }
        Ok(config)
    }

    /// 记录读取到的配置，须在日志初始化之后调用
    pub fn log_detected(&self) {
        for (key, value) in [(ENV_PROJECT_ID, &self.project_id), (ENV_TOPIC_ID, &self.topic_id)] {
            tracing::info!(key, value = %value, "detected value from environment");
        }
        tracing::info!(
            port = self.port,
            log_level = %self.log_level,
            trace_sample_ratio = self.trace_sample_ratio,
            trace_exporter = %self.trace_exporter,
            grace_period_secs = self.grace_period.as_secs(),
            event_timeout_secs = self.event_timeout.map(|timeout| timeout.as_secs()),
            "loaded configuration"
        );
        if self.trace_sample_ratio >= 0.5 {
            tracing::warn!(
                trace_sample_ratio = self.trace_sample_ratio,
                "sample ratio is 0.5 or higher, exporting traces may become expensive"
            );
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.parse().map_err(|err: T::Err| Error::InvalidEnv {
                key: key.to_string(),
                value: value.clone(),
                reason: err.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| env.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "my-project"),
            (ENV_TOPIC_ID, "events"),
        ]))
        .unwrap();

        assert_eq!(config.project_id, "my-project");
        assert_eq!(config.topic_id, "events");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, Level::Info);
        assert_eq!(config.trace_sample_ratio, 0.1);
        assert_eq!(config.trace_exporter, TraceExporter::Otlp);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.event_timeout, None);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "my-project"),
            (ENV_TOPIC_ID, "events"),
            (ENV_PORT, "9090"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_TRACE_SAMPLE_RATIO, "0.5"),
            (ENV_TRACE_EXPORTER, "NONE"),
            (ENV_SHUTDOWN_GRACE_SECS, "2"),
            (ENV_EVENT_TIMEOUT_SECS, "30"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.log_level, Level::Debug);
        assert_eq!(config.trace_sample_ratio, 0.5);
        assert_eq!(config.trace_exporter, TraceExporter::None);
        assert_eq!(config.grace_period, Duration::from_secs(2));
        assert_eq!(config.event_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_missing_required_value() {
        let err = Config::from_lookup(lookup(&[(ENV_PROJECT_ID, "my-project")])).unwrap_err();
        assert_eq!(err.to_string(), "missing env: PUBSUB_TOPIC_ID");

        let err = Config::from_lookup(lookup(&[(ENV_PROJECT_ID, ""), (ENV_TOPIC_ID, "events")]))
            .unwrap_err();
        assert!(matches!(err, Error::MissingEnv(key) if key == ENV_PROJECT_ID));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "my-project"),
            (ENV_TOPIC_ID, "events"),
            (ENV_PORT, "http"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { ref key, .. } if key == ENV_PORT));

        let err = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "my-project"),
            (ENV_TOPIC_ID, "events"),
            (ENV_TRACE_SAMPLE_RATIO, "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSampleRatio(_)));

        let err = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "my-project"),
            (ENV_TOPIC_ID, "events"),
            (ENV_TRACE_EXPORTER, "zipkin"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { ref key, .. } if key == ENV_TRACE_EXPORTER));
    }

    #[test]
    fn test_full_sampling_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            (ENV_PROJECT_ID, "my-project"),
            (ENV_TOPIC_ID, "events"),
            (ENV_TRACE_SAMPLE_RATIO, "1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSampleRatio(ratio) if ratio == 1.0));
        assert_eq!(err.to_string(), "sample ratio must be within [0, 1), got 1");
    }
}
