//! # 批量执行器
//!
//! 在固定大小的 rayon 线程池中逐文件执行分析，统计成功、跳过与失败。
//!
//! ## 依赖关系
//! - 被 `commands/identify.rs`, `commands/refine.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条
//! - 使用 `rayon` 进行并行计算

use crate::error::{PhaseMatchError, Result};
use crate::utils::progress;

use rayon::prelude::*;
use std::path::PathBuf;

/// 单个文件处理结果
#[derive(Debug, Clone)]
pub enum ProcessResult {
    /// (文件, 摘要)
    Success(String, String),
    /// (文件, 原因)
    Skipped(String, String),
    /// (文件, 错误信息)
    Failed(String, String),
}

/// 批量处理结果统计
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<(String, String)>,
    pub skipped: Vec<(String, String)>,
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    pub fn merge(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Success(path, summary) => self.succeeded.push((path, summary)),
            ProcessResult::Skipped(path, reason) => self.skipped.push((path, reason)),
            ProcessResult::Failed(path, err) => self.failures.push((path, err)),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failures.len()
    }
}

/// 批量执行器
pub struct BatchRunner {
    jobs: usize,
}

impl BatchRunner {
    /// `jobs == 0` 时使用全部 CPU
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self { jobs }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// 并行处理文件列表；结果顺序与输入一致
    pub fn run<F>(&self, files: &[PathBuf], processor: F) -> Result<BatchResult>
    where
        F: Fn(&PathBuf) -> ProcessResult + Sync + Send,
    {
        let pb = progress::create_progress_bar(files.len() as u64, "Analyzing");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| PhaseMatchError::Other(format!("failed to build thread pool: {}", e)))?;

        let results: Vec<ProcessResult> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    let result = processor(file);
                    pb.inc(1);
                    result
                })
                .collect()
        });

        pb.finish_and_clear();

        let mut batch = BatchResult::default();
        for result in results {
            batch.merge(result);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_tally() {
        let files: Vec<PathBuf> = ["a.xy", "b.xy", "c.xy"].iter().map(PathBuf::from).collect();
        let runner = BatchRunner::new(2);
        let result = runner
            .run(&files, |path| {
                let name = path.display().to_string();
                match name.as_str() {
                    "a.xy" => ProcessResult::Success(name, "1 phase".to_string()),
                    "b.xy" => ProcessResult::Skipped(name, "empty".to_string()),
                    _ => ProcessResult::Failed(name, "bad".to_string()),
                }
            })
            .unwrap();

        assert_eq!(result.total(), 3);
        assert_eq!(result.succeeded, vec![("a.xy".to_string(), "1 phase".to_string())]);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.failures[0].1, "bad");
    }

    #[test]
    fn test_zero_jobs_uses_all_cpus() {
        assert_eq!(BatchRunner::new(0).jobs(), num_cpus::get());
    }
}
