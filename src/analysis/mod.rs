//! # 分析引擎
//!
//! 多物相鉴定与 Le Bail 精修的核心。引擎不做任何文件读写。
//!
//! ## 子模块
//! - `optimizer`: argmin 封装（有界 L-BFGS 与一维 Brent）
//! - `matcher`: 残差与候选图谱的相关性评分
//! - `decomposition`: 顺序分解状态机
//! - `statistics`: Rp / Rwp / Rexp / GoF
//! - `lebail`: Le Bail 精修控制器
//! - `report`: 文本报告与质量评级
//! - `cache`: 精修物相缓存
//! - `pipeline`: 分解 → 精修 → 报告
//!
//! ## 依赖关系
//! - 被 `commands/` 使用
//! - 使用 `models/`, `xrd/profile.rs`, `xrd/synthesizer.rs`

pub mod cache;
pub mod decomposition;
pub mod lebail;
pub mod matcher;
pub mod optimizer;
pub mod pipeline;
pub mod report;
pub mod statistics;

pub use cache::RefinedPhaseCache;
pub use decomposition::{
    run_sequential_decomposition, CandidatePool, DecompositionConfig, DecompositionResult,
    IdentifiedPhase, StopReason,
};
pub use lebail::{
    run_le_bail_refinement, RefinementConfig, RefinementOutcome, RefinementParameters,
    RefinementPhase,
};
pub use pipeline::{analyze, AnalysisConfig, AnalysisResult};
pub use statistics::AgreementStatistics;
