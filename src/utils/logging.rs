//! # 日志初始化
//!
//! 安装 `tracing` 全局订阅器，输出到 stderr，避免与表格和报告混在一起。
//!
//! ## 级别
//! - 未指定 `-v`: 读取 `RUST_LOG`，缺省 `warn`
//! - `-v`: `info`
//! - `-vv` 及以上: `debug`
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `tracing-subscriber`

use std::io::IsTerminal;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// 由 `-v` 次数得到过滤器
fn filter_for(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    }
}

/// 初始化全局订阅器；重复调用时静默忽略
pub fn init_tracing(verbosity: u8) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(verbosity > 1)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    let _ = Registry::default()
        .with(filter_for(verbosity))
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(filter_for(1).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(filter_for(2).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(filter_for(5).max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_tracing(0);
        init_tracing(2);
    }
}
