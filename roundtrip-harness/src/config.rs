use std::{ffi::OsString, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use roundtrip_utilities::{SendableError, logger::parse_level};
use uuid::Uuid;

pub const DEFAULT_BROKERS: &str = "localhost:9092";
pub const DEFAULT_TOPIC: &str = "my-test-topic";
pub const DEFAULT_GROUP_ID: &str = "my-test-group";
pub const DEFAULT_MESSAGE_KEY: &str = "testKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Kafka,
    InMemory,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Raw comma-separated broker list; validated when the run starts.
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub client_id: String,
    pub auto_commit: bool,
    pub auto_commit_interval: Duration,
    pub from_beginning: bool,
    pub grace_period: Duration,
    pub message_key: String,
    /// Records to receive before stopping; `0` runs until cancelled.
    pub max_messages: usize,
    pub queue_capacity: usize,
    pub backend: Backend,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl HarnessConfig {
    pub fn new(
        brokers: impl Into<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            group_id: group_id.into(),
            client_id: generated_client_id(),
            auto_commit: true,
            auto_commit_interval: Duration::from_millis(5000),
            from_beginning: true,
            grace_period: Duration::from_millis(2000),
            message_key: DEFAULT_MESSAGE_KEY.to_string(),
            max_messages: 1,
            queue_capacity: 16,
            backend: Backend::Kafka,
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Produce one record to a broker and read it back", long_about = None)]
struct CliArgs {
    /// Comma-separated bootstrap servers.
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", default_value = DEFAULT_BROKERS)]
    brokers: String,

    #[arg(long, env = "ROUNDTRIP_TOPIC", default_value = DEFAULT_TOPIC)]
    topic: String,

    #[arg(long, env = "ROUNDTRIP_GROUP_ID", default_value = DEFAULT_GROUP_ID)]
    group_id: String,

    #[arg(long, env = "ROUNDTRIP_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    auto_commit: bool,

    #[arg(long, default_value_t = 5000)]
    auto_commit_interval_ms: u64,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    from_beginning: bool,

    #[arg(long, default_value_t = 2000)]
    grace_period_ms: u64,

    #[arg(long, default_value = DEFAULT_MESSAGE_KEY)]
    message_key: String,

    /// Stop after this many records; 0 keeps consuming until Ctrl+C.
    #[arg(long, default_value_t = 1)]
    max_messages: usize,

    #[arg(long, default_value_t = 16)]
    queue_capacity: usize,

    #[arg(long, value_enum, default_value_t = Backend::Kafka)]
    backend: Backend,

    #[arg(long, env = "ROUNDTRIP_LOG", default_value = "info")]
    log_level: String,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

pub fn parse_config() -> Result<HarnessConfig, SendableError> {
    into_config(CliArgs::parse())
}

pub fn parse_config_from<I, T>(args: I) -> Result<HarnessConfig, SendableError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = CliArgs::try_parse_from(args).map_err(|err| -> SendableError { Box::new(err) })?;
    into_config(args)
}

fn into_config(args: CliArgs) -> Result<HarnessConfig, SendableError> {
    let client_id = match args.client_id {
        Some(ref value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => generated_client_id(),
    };

    Ok(HarnessConfig {
        brokers: args.brokers,
        topic: args.topic,
        group_id: args.group_id,
        client_id,
        auto_commit: args.auto_commit,
        auto_commit_interval: Duration::from_millis(args.auto_commit_interval_ms),
        from_beginning: args.from_beginning,
        grace_period: Duration::from_millis(args.grace_period_ms),
        message_key: args.message_key,
        max_messages: args.max_messages,
        queue_capacity: args.queue_capacity,
        backend: args.backend,
        log_level: parse_level(&args.log_level)?,
        log_file: args.log_file,
    })
}

fn generated_client_id() -> String {
    format!("roundtrip-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_override_defaults() {
        let config = parse_config_from([
            "roundtrip",
            "--brokers",
            "kafka-1:9092,kafka-2:9092",
            "--topic",
            "t1",
            "--group-id",
            "g1",
            "--client-id",
            "smoke",
            "--auto-commit",
            "false",
            "--from-beginning",
            "false",
            "--grace-period-ms",
            "250",
            "--max-messages",
            "0",
            "--backend",
            "in-memory",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(config.brokers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.topic, "t1");
        assert_eq!(config.group_id, "g1");
        assert_eq!(config.client_id, "smoke");
        assert!(!config.auto_commit);
        assert!(!config.from_beginning);
        assert_eq!(config.grace_period, Duration::from_millis(250));
        assert_eq!(config.max_messages, 0);
        assert_eq!(config.backend, Backend::InMemory);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn blank_client_id_is_generated() {
        let config =
            parse_config_from(["roundtrip", "--brokers", "b:9092", "--client-id", " "]).unwrap();
        assert!(config.client_id.starts_with("roundtrip-"));
        assert_eq!(config.message_key, DEFAULT_MESSAGE_KEY);
        assert_eq!(config.auto_commit_interval, Duration::from_millis(5000));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let result = parse_config_from(["roundtrip", "--brokers", "b:9092", "--log-level", "loud"]);
        assert!(result.is_err());
    }

    #[test]
    fn generated_client_ids_differ() {
        let first = HarnessConfig::new("b:9092", "t", "g");
        let second = HarnessConfig::new("b:9092", "t", "g");
        assert_ne!(first.client_id, second.client_id);
        assert_eq!(first.grace_period, Duration::from_millis(2000));
    }
}
