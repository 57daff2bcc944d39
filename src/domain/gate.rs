// ==========================================
// 纸卷加工阶段流程系统 - 闸门判定结果
// ==========================================
// 职责: 审批闸门/质检闸门的输出结构 (不由核心持久化)
// 红线: 所有判定必须输出 reason
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// CheckResult - 单项检查结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub reasons: Vec<String>, // 未通过原因 (通过时为空)
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reasons: vec![],
        }
    }

    /// 由原因列表构造: 无原因即通过
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            passed: reasons.is_empty(),
            reasons,
        }
    }
}

// ==========================================
// GateDecision - 通用闸门判定
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub outcome: bool,
    pub reason: String,
    pub score: Option<f64>,
    pub requires_human_review: bool,
}

// ==========================================
// SmartValidationReport - 智能校验明细
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartValidationReport {
    pub weight_balance: CheckResult,
    pub quality_standards: CheckResult,
    pub timeline: CheckResult,
    pub cost_efficiency: CheckResult,
}

impl SmartValidationReport {
    pub fn passed(&self) -> bool {
        self.weight_balance.passed
            && self.quality_standards.passed
            && self.timeline.passed
            && self.cost_efficiency.passed
    }

    /// 汇总所有未通过原因
    pub fn failure_reasons(&self) -> Vec<String> {
        [
            &self.weight_balance,
            &self.quality_standards,
            &self.timeline,
            &self.cost_efficiency,
        ]
        .iter()
        .flat_map(|c| c.reasons.iter().cloned())
        .collect()
    }
}

// ==========================================
// ApprovalDecision - 审批闸门判定
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub instance_id: String,
    pub approved: bool,
    pub routine: CheckResult,
    pub smart_validation: SmartValidationReport,
    /// 智能审批附加条件 (仅 smart_approve 填充)
    pub advanced_criteria: Option<CheckResult>,
}

impl ApprovalDecision {
    /// 是否满足自动审批 (常规 + 智能校验)
    pub fn eligible(&self) -> bool {
        self.routine.passed && self.smart_validation.passed()
    }

    /// 所有拒绝原因 (按检查顺序)
    pub fn reasons(&self) -> Vec<String> {
        let mut reasons = vec![];
        if let Some(advanced) = &self.advanced_criteria {
            reasons.extend(advanced.reasons.iter().cloned());
        }
        reasons.extend(self.routine.reasons.iter().cloned());
        reasons.extend(self.smart_validation.failure_reasons());
        reasons
    }

    pub fn to_gate_decision(&self) -> GateDecision {
        let reasons = self.reasons();
        GateDecision {
            outcome: self.approved
                || (self.eligible() && self.advanced_criteria.as_ref().map_or(true, |c| c.passed)),
            reason: if reasons.is_empty() {
                "满足自动审批条件".to_string()
            } else {
                reasons.join("; ")
            },
            score: None,
            requires_human_review: false,
        }
    }
}

// ==========================================
// QualityChecks - 质检分项
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityChecks {
    pub dimensions: CheckResult,
    pub weight_balance: CheckResult,
    pub visual: VisualAnalysis,
    pub specifications: CheckResult,
}

// ==========================================
// VisualAnalysis - 外观分析 (启发式)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAnalysis {
    pub issues: Vec<String>,
    pub defect_rate: f64,
}

impl VisualAnalysis {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

// ==========================================
// QualityReport - 质检闸门判定
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub instance_id: String,
    pub score: f64,
    pub quality_grade: i32,
    pub passed: bool,
    pub requires_human_review: bool,
    pub review_reasons: Vec<String>,
    pub cutting_precision: Option<f64>,
    pub checks: QualityChecks,
}

impl QualityReport {
    pub fn to_gate_decision(&self) -> GateDecision {
        GateDecision {
            outcome: self.passed,
            reason: if self.review_reasons.is_empty() {
                format!("质量评分 {:.1}", self.score)
            } else {
                self.review_reasons.join("; ")
            },
            score: Some(self.score),
            requires_human_review: self.requires_human_review,
        }
    }
}

// ==========================================
// QualitySweepSummary - 质检批量巡检汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySweepSummary {
    pub checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub items: Vec<QualitySweepItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySweepItem {
    pub instance_id: String,
    pub order_id: String,
    pub passed: bool,
    pub score: Option<f64>,
    pub requires_human_review: bool,
    pub error: Option<String>,
}
