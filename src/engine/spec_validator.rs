// ==========================================
// 纸卷加工阶段流程系统 - 交付规格校验
// ==========================================
// 职责: 校验订单交付规格的完整性与取值范围
// 红线: 无状态、无副作用、返回全部错误而非首个错误
// ==========================================

use crate::domain::order::DeliverySpec;

/// 质量等级取值范围
pub const QUALITY_GRADE_RANGE: std::ops::RangeInclusive<i32> = 1..=5;

/// 校验交付规格
///
/// # 规则
/// - 宽度、长度必填且为正数
/// - 厚度、克重、重量、数量若填写必须为正数
/// - 品质描述若填写不能为空白
/// - 要求质量等级若填写必须在 1~5 之间
///
/// # 返回
/// 错误列表 (空列表表示通过)
pub fn validate_delivery_spec(spec: &DeliverySpec) -> Vec<String> {
    let mut errors = Vec::new();

    require_positive(&mut errors, "宽度", spec.width_mm);
    require_positive(&mut errors, "长度", spec.length_m);
    optional_positive(&mut errors, "厚度", spec.thickness_mm);
    optional_positive(&mut errors, "克重", spec.grammage_gsm);
    optional_positive(&mut errors, "重量", spec.weight_kg);

    if let Some(quantity) = spec.quantity {
        if quantity <= 0 {
            errors.push(format!("数量必须为正数: {}", quantity));
        }
    }

    if let Some(quality) = &spec.quality {
        if quality.trim().is_empty() {
            errors.push("品质描述不能为空".to_string());
        }
    }

    if let Some(grade) = spec.required_quality_grade {
        if !QUALITY_GRADE_RANGE.contains(&grade) {
            errors.push(format!("要求质量等级超出范围(1~5): {}", grade));
        }
    }

    errors
}

fn require_positive(errors: &mut Vec<String>, name: &str, value: Option<f64>) {
    match value {
        None => errors.push(format!("{}未填写", name)),
        Some(v) if !(v > 0.0) => errors.push(format!("{}必须为正数: {}", name, v)),
        Some(_) => {}
    }
}

fn optional_positive(errors: &mut Vec<String>, name: &str, value: Option<f64>) {
    if let Some(v) = value {
        if !(v > 0.0) {
            errors.push(format!("{}必须为正数: {}", name, v));
        }
    }
}
