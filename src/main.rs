//! # phasematch 可执行文件入口
//!
//! 解析命令行、初始化日志并分派子命令：
//! - `identify` - 多物相鉴定（分解 + Le Bail 精修）
//! - `refine` - 指定物相的 Le Bail 精修
//! - `synthesize` - 由候选峰集合合成图谱

use clap::Parser;
use phasematch::cli::Cli;
use phasematch::{commands, utils};

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();
    utils::logging::init_tracing(cli.verbose);

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
