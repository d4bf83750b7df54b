//! 诊断分类与干预阶梯
//!
//! 对 diagnose_error 工具输出的纯函数解释：全函数、确定性、可在无传输与
//! 工具依赖的情况下单测。置信度解析接受数字与数字字符串两种形态，
//! 钳制到 [0, 1]，缺失或不可解析时取 0.5。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 诊断分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosisClass {
    /// 识别出了具体错误类别
    Known {
        category: String,
        confidence: f64,
        remediation_hint: Option<String>,
    },
    /// 未能识别，转入引导流程
    Unknown { confidence: f64 },
}

/// 干预直接程度（由弱到强）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionLevel {
    Subtle,
    Moderate,
    Explicit,
    WorkedExample,
}

/// 解析置信度：数字或数字字符串，钳制 [0,1]，缺失/不可解析 → 0.5
fn parse_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.unwrap_or(0.5).clamp(0.0, 1.0)
}

/// 分类诊断载荷：error_identified 为真且置信度达到阈值 → Known，否则 Unknown
pub fn classify_diagnosis(payload: &Value, threshold: f64) -> DiagnosisClass {
    let confidence = parse_confidence(payload.get("confidence"));
    let identified = payload
        .get("error_identified")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if identified && confidence >= threshold {
        DiagnosisClass::Known {
            category: payload
                .get("error_category")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string(),
            confidence,
            remediation_hint: payload
                .get("suggested_approach")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    } else {
        DiagnosisClass::Unknown { confidence }
    }
}

/// 由尝试次数与诊断置信度决定干预级别
///
/// 第 1 次 → Subtle；第 2 次且置信度 > 0.7 → Moderate，否则 Subtle；
/// 第 3 次 → Moderate；第 4 次 → Explicit；第 5 次及以上 → WorkedExample。
pub fn intervention_level(attempt_count: u32, confidence: f64) -> InterventionLevel {
    match attempt_count {
        0 | 1 => InterventionLevel::Subtle,
        2 => {
            if confidence > 0.7 {
                InterventionLevel::Moderate
            } else {
                InterventionLevel::Subtle
            }
        }
        3 => InterventionLevel::Moderate,
        4 => InterventionLevel::Explicit,
        _ => InterventionLevel::WorkedExample,
    }
}

/// 干预升级：单调 Subtle → Moderate → Explicit → WorkedExample → None
pub fn next_intervention_level(level: InterventionLevel) -> Option<InterventionLevel> {
    match level {
        InterventionLevel::Subtle => Some(InterventionLevel::Moderate),
        InterventionLevel::Moderate => Some(InterventionLevel::Explicit),
        InterventionLevel::Explicit => Some(InterventionLevel::WorkedExample),
        InterventionLevel::WorkedExample => None,
    }
}

impl InterventionLevel {
    /// 稳定标签（工具参数与日志用）
    pub fn label(&self) -> &'static str {
        match self {
            InterventionLevel::Subtle => "subtle",
            InterventionLevel::Moderate => "moderate",
            InterventionLevel::Explicit => "explicit",
            InterventionLevel::WorkedExample => "worked_example",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_known() {
        let payload = json!({
            "error_identified": true,
            "confidence": 0.85,
            "error_category": "computational",
            "suggested_approach": "revisit carrying",
        });
        let class = classify_diagnosis(&payload, 0.5);
        assert_eq!(
            class,
            DiagnosisClass::Known {
                category: "computational".to_string(),
                confidence: 0.85,
                remediation_hint: Some("revisit carrying".to_string()),
            }
        );
    }

    #[test]
    fn test_classify_unknown_low_confidence() {
        let payload = json!({"error_identified": true, "confidence": 0.2});
        assert_eq!(
            classify_diagnosis(&payload, 0.5),
            DiagnosisClass::Unknown { confidence: 0.2 }
        );
    }

    #[test]
    fn test_classify_unknown_not_identified() {
        let payload = json!({"error_identified": false, "confidence": 0.9});
        assert_eq!(
            classify_diagnosis(&payload, 0.5),
            DiagnosisClass::Unknown { confidence: 0.9 }
        );
    }

    #[test]
    fn test_missing_confidence_defaults_to_half() {
        // 缺失置信度取 0.5，分类只看 error_identified
        let payload = json!({"error_identified": true});
        match classify_diagnosis(&payload, 0.5) {
            DiagnosisClass::Known { confidence, .. } => assert!((confidence - 0.5).abs() < 1e-9),
            other => panic!("expected Known, got {other:?}"),
        }
    }

    #[test]
    fn test_confidence_string_and_clamp() {
        let payload = json!({"error_identified": true, "confidence": "1.7"});
        match classify_diagnosis(&payload, 0.5) {
            DiagnosisClass::Known { confidence, .. } => assert!((confidence - 1.0).abs() < 1e-9),
            other => panic!("expected Known, got {other:?}"),
        }

        let payload = json!({"error_identified": false, "confidence": "not a number"});
        assert_eq!(
            classify_diagnosis(&payload, 0.5),
            DiagnosisClass::Unknown { confidence: 0.5 }
        );
    }

    #[test]
    fn test_intervention_ladder() {
        assert_eq!(intervention_level(1, 0.9), InterventionLevel::Subtle);
        assert_eq!(intervention_level(2, 0.9), InterventionLevel::Moderate);
        assert_eq!(intervention_level(2, 0.5), InterventionLevel::Subtle);
        assert_eq!(intervention_level(3, 0.1), InterventionLevel::Moderate);
        assert_eq!(intervention_level(4, 0.1), InterventionLevel::Explicit);
        assert_eq!(intervention_level(5, 0.1), InterventionLevel::WorkedExample);
        assert_eq!(intervention_level(9, 0.1), InterventionLevel::WorkedExample);
    }

    #[test]
    fn test_intervention_monotone_in_attempts() {
        for confidence in [0.0, 0.5, 0.71, 1.0] {
            let mut prev = intervention_level(1, confidence);
            for attempt in 2..10 {
                let level = intervention_level(attempt, confidence);
                assert!(level >= prev, "not monotone at attempt {attempt}");
                prev = level;
            }
        }
    }

    #[test]
    fn test_next_level_chain() {
        let mut level = InterventionLevel::Subtle;
        let mut seen = vec![level];
        while let Some(next) = next_intervention_level(level) {
            seen.push(next);
            level = next;
        }
        assert_eq!(
            seen,
            vec![
                InterventionLevel::Subtle,
                InterventionLevel::Moderate,
                InterventionLevel::Explicit,
                InterventionLevel::WorkedExample,
            ]
        );
    }
}
