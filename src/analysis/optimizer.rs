//! # 有界优化器
//!
//! 封装 `argmin`：
//! - `minimize_scalar`: 区间 [lo, hi] 上的一维 Brent 极小化（标度拟合）
//! - `LbfgsbOptimizer`: 带箱约束的 L-BFGS（Le Bail 逐相拟合）
//!
//! 箱约束通过参数钳位 + 投影梯度实现：代价函数总在钳位后的参数上求值，
//! 位于边界且梯度指向外侧的分量置零。
//!
//! ## 依赖关系
//! - 被 `analysis/matcher.rs`, `analysis/decomposition.rs`, `analysis/lebail.rs` 调用
//! - 使用 `argmin`, `argmin-math`

use crate::error::{PhaseMatchError, Result};

use argmin::core::{
    CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::brent::BrentOpt;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// L-BFGS 配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 最大迭代次数
    pub max_iter: u64,
    /// 收敛容差（投影梯度范数 / 相对代价变化）
    pub tol: f64,
    /// L-BFGS 历史长度
    pub memory: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_iter: 50,
            tol: 1e-5,
            memory: 10,
        }
    }
}

/// 多维优化结果
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// 最优参数（已钳位到边界内）
    pub parameters: Vec<f64>,
    /// 最优代价
    pub fval: f64,
    /// 迭代次数
    pub n_iter: u64,
    /// 是否由收敛准则终止
    pub converged: bool,
    /// 终止信息
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6e}, n_iter={}, converged={})",
            self.fval, self.n_iter, self.converged
        )
    }
}

/// 目标函数
pub trait ObjectiveFunction {
    /// 在给定参数处求值
    fn eval(&self, params: &[f64]) -> f64;

    /// 梯度（默认中心差分）
    fn gradient(&self, params: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; params.len()];
        let mut probe = params.to_vec();

        for i in 0..params.len() {
            let eps = 1e-6 * params[i].abs().max(1e-3);

            probe[i] = params[i] + eps;
            let f_plus = self.eval(&probe);
            probe[i] = params[i] - eps;
            let f_minus = self.eval(&probe);
            probe[i] = params[i];

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        grad
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params
        .iter()
        .zip(bounds.iter())
        .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
        .collect()
}

/// argmin 适配器
struct BoundedProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        let value = self.objective.eval(&clamp_params(params, self.bounds));
        if value.is_finite() {
            Ok(value)
        } else {
            Err(argmin::core::Error::msg("non-finite objective"))
        }
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut g = self.objective.gradient(&clamped);

        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if (x <= lo + EPS && g[i] > 0.0) || (x >= hi - EPS && g[i] < 0.0) {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// 带箱约束的 L-BFGS 优化器
#[derive(Debug, Clone, Default)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        LbfgsbOptimizer { config }
    }

    /// 在边界内极小化目标函数
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(PhaseMatchError::InvalidInput(format!(
                "parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init = clamp_params(init_params, bounds);
        if init.is_empty() {
            return Ok(OptimizationResult {
                fval: objective.eval(&init),
                parameters: init,
                n_iter: 0,
                converged: true,
                message: "no free parameters".to_string(),
            });
        }

        let problem = BoundedProblem { objective, bounds };

        // 代价容差按初值量级缩放，χ² 可达 1e6 量级
        let scale = objective.eval(&init).abs().max(1.0);
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.memory)
            .with_tolerance_grad(self.config.tol * scale.sqrt())
            .map_err(|e| PhaseMatchError::numeric("L-BFGS setup", e.to_string()))?
            .with_tolerance_cost(self.config.tol * 1e-3 * scale)
            .map_err(|e| PhaseMatchError::numeric("L-BFGS setup", e.to_string()))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| PhaseMatchError::numeric("L-BFGS", e.to_string()))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| PhaseMatchError::numeric("L-BFGS", "no best parameters found"))?;
        let parameters = clamp_params(best, bounds);
        let fval = state.get_best_cost();

        if !fval.is_finite() {
            return Err(PhaseMatchError::numeric("L-BFGS", "non-finite best cost"));
        }

        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters,
            fval,
            n_iter: state.get_iter(),
            converged,
            message: termination.to_string(),
        })
    }
}

/// 一维代价函数适配器
struct ScalarProblem<'a, F> {
    f: &'a F,
}

impl<F> CostFunction for ScalarProblem<'_, F>
where
    F: Fn(f64) -> f64,
{
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &f64) -> std::result::Result<f64, argmin::core::Error> {
        Ok((self.f)(*x))
    }
}

/// 区间 [lo, hi] 上的一维有界极小化
///
/// 返回 (x*, f(x*))。两端点也参与比较，保证边界解不被内部搜索漏掉。
pub fn minimize_scalar<F>(f: F, lo: f64, hi: f64) -> Result<(f64, f64)>
where
    F: Fn(f64) -> f64,
{
    if !(lo < hi) {
        return Err(PhaseMatchError::InvalidInput(format!(
            "invalid scalar bounds [{}, {}]",
            lo, hi
        )));
    }

    let problem = ScalarProblem { f: &f };
    let res = Executor::new(problem, BrentOpt::new(lo, hi))
        .configure(|state| state.max_iters(200))
        .run()
        .map_err(|e| PhaseMatchError::numeric("Brent", e.to_string()))?;

    let state = res.state();
    let mut best_x = *state
        .get_best_param()
        .ok_or_else(|| PhaseMatchError::numeric("Brent", "no best parameter found"))?;
    let mut best_f = state.get_best_cost();

    for edge in [lo, hi] {
        let value = f(edge);
        if value < best_f {
            best_x = edge;
            best_f = value;
        }
    }

    if !best_f.is_finite() {
        return Err(PhaseMatchError::numeric("Brent", "non-finite best cost"));
    }

    Ok((best_x.clamp(lo, hi), best_f))
}
