//! 观测性初始化脚手架。

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

pub mod events;

const LOG_FILE_PREFIX: &str = "wardling-core.log";

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false);
    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber).expect("failed to set global subscriber");
}

/// 初始化控制台输出并追加 JSON 事件文件（按天滚动)。
///
/// 返回的 guard 必须在进程生命周期内持有，否则缓冲日志会丢失。
pub fn init_tracing_with_file(log_dir: &Path) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (subscriber, guard) = file_subscriber(log_dir, env_filter);

    tracing::subscriber::set_global_default(subscriber).expect("failed to set global subscriber");
    guard
}

fn file_subscriber(
    log_dir: &Path,
    env_filter: EnvFilter,
) -> (impl tracing::Subscriber + Send + Sync, WorkerGuard) {
    let fmt_layer = fmt::layer().with_target(false);

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().json().with_writer(writer);

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer);

    (subscriber, guard)
}
