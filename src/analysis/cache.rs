//! # 精修物相缓存
//!
//! 显式持有的对象，记录已精修物相的峰位与搜索优先级，供后续检索优先使用。
//! 生命周期由调用方决定（单次会话或跨运行持久化为 JSON），没有进程级全局状态。
//!
//! ## 依赖关系
//! - 被 `analysis/pipeline.rs`, `commands/identify.rs` 使用
//! - 使用 `analysis/lebail.rs`

use super::lebail::RefinedPhase;
use crate::models::CandidatePhase;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 以物相 ID 为键的精修结果缓存
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinedPhaseCache {
    entries: BTreeMap<String, RefinedPhase>,
}

/// 排序后的候选
#[derive(Debug, Clone)]
pub struct PrioritizedCandidate {
    /// 候选物相（命中缓存时峰位已替换为精修值）
    pub phase: CandidatePhase,
    pub refined: bool,
    pub search_priority: f64,
}

impl RefinedPhaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录精修结果，覆盖同 ID 的旧值
    pub fn store(&mut self, refined: RefinedPhase) {
        if refined.phase.id.is_empty() {
            return;
        }
        self.entries.insert(refined.phase.id.clone(), refined);
    }

    pub fn get(&self, id: &str) -> Option<&RefinedPhase> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按搜索优先级降序列出
    pub fn ranked(&self) -> Vec<&RefinedPhase> {
        let mut ranked: Vec<&RefinedPhase> = self.entries.values().collect();
        ranked.sort_by(|a, b| b.search_priority.total_cmp(&a.search_priority));
        ranked
    }

    /// 用缓存更新候选列表
    ///
    /// 命中的候选替换为精修后的峰集合并排在前面（按优先级降序），
    /// 其余保持原有顺序。
    pub fn prioritize(&self, candidates: Vec<CandidatePhase>) -> Vec<PrioritizedCandidate> {
        let mut updated: Vec<PrioritizedCandidate> = candidates
            .into_iter()
            .map(|mut phase| match self.entries.get(&phase.id) {
                Some(refined) => {
                    tracing::debug!("Using refined peaks for {}", phase.display_name());
                    phase.peaks = refined.peaks.clone();
                    PrioritizedCandidate {
                        phase,
                        refined: true,
                        search_priority: refined.search_priority,
                    }
                }
                None => PrioritizedCandidate {
                    phase,
                    refined: false,
                    search_priority: 0.0,
                },
            })
            .collect();

        // sort_by 是稳定排序
        updated.sort_by(|a, b| {
            b.refined
                .cmp(&a.refined)
                .then(b.search_priority.total_cmp(&a.search_priority))
        });
        updated
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
