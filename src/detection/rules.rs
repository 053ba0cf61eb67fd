// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 规则校验: 按 (roi_id, class_name) 计数, 逐条比较

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detection::Detection;

/// 全部规则通过时的提示
pub const PASS_MESSAGE: &str = "all rules passed";

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

impl CompareOp {
    pub fn eval(&self, actual: usize, expected: usize) -> bool {
        match self {
            CompareOp::Eq => actual == expected,
            CompareOp::Ne => actual != expected,
            CompareOp::Gt => actual > expected,
            CompareOp::Lt => actual < expected,
            CompareOp::Ge => actual >= expected,
            CompareOp::Le => actual <= expected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            ">=" => Ok(CompareOp::Ge),
            "<=" => Ok(CompareOp::Le),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

/// 单条计数规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicRule {
    pub roi_id: usize,
    #[serde(rename = "class")]
    pub class_name: String,
    pub operator: CompareOp,
    pub count: usize,
}

impl LogicRule {
    pub fn new(roi_id: usize, class_name: impl Into<String>, operator: CompareOp, count: usize) -> Self {
        Self {
            roi_id,
            class_name: class_name.into(),
            operator,
            count,
        }
    }

    /// 失败描述, 例如 `ROI 1 person >= 2, actual: 1`
    pub fn describe_failure(&self, actual: usize) -> String {
        format!(
            "ROI {} {} {} {}, actual: {}",
            self.roi_id + 1,
            self.class_name,
            self.operator,
            self.count,
            actual
        )
    }
}

/// 命名的规则集, 绑定一个 ROI 配置和一个模型
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    #[serde(rename = "roi_config")]
    pub roi_config_name: String,
    #[serde(rename = "model", default)]
    pub model_name: String,
    #[serde(default)]
    pub rules: Vec<LogicRule>,
}

/// 校验结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub message: String,
}

impl ValidationOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }

    /// 规则集不存在: 软通过, 不算错误
    pub fn missing_rule_set(name: &str) -> Self {
        Self::pass(format!("rule set '{}' not found, nothing to validate", name))
    }

    /// 规则集引用的 ROI 配置不存在: 同样软通过
    pub fn missing_roi_config(rule_set: &str, roi_config: &str) -> Self {
        Self::pass(format!(
            "roi config '{}' referenced by rule set '{}' not found, nothing to validate",
            roi_config, rule_set
        ))
    }
}

/// (roi_id, class_name) → 数量; 没有 roi 或没有类别名的检测不计入
pub fn count_by_roi_class(detections: &[Detection]) -> HashMap<(usize, &str), usize> {
    let mut counts = HashMap::new();
    for det in detections {
        let Some(roi_id) = det.roi_id else {
            continue;
        };
        if det.class_name.is_empty() {
            continue;
        }
        *counts.entry((roi_id, det.class_name.as_str())).or_insert(0) += 1;
    }
    counts
}

/// 所有规则都满足才算通过; 失败信息按规则顺序用 ", " 连接
pub fn validate(detections: &[Detection], rule_set: &RuleSet) -> ValidationOutcome {
    let counts = count_by_roi_class(detections);
    let failures: Vec<String> = rule_set
        .rules
        .iter()
        .filter_map(|rule| {
            let actual = counts
                .get(&(rule.roi_id, rule.class_name.as_str()))
                .copied()
                .unwrap_or(0);
            (!rule.operator.eval(actual, rule.count)).then(|| rule.describe_failure(actual))
        })
        .collect();

    if failures.is_empty() {
        ValidationOutcome::pass(PASS_MESSAGE)
    } else {
        ValidationOutcome::fail(failures.join(", "))
    }
}
