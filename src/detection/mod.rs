// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 检测系统 (Detection System)
///
/// - Detector: 模型快照管理 + 检测流水线
/// - ROI:      检测框中心点 → 区域下标
/// - Rules:    按 (ROI, 类别) 计数校验
pub mod detector;
pub mod roi;
pub mod rules;
pub mod types;

pub use detector::{Detector, EngineLoader, LoadedModel, RuleStore};
pub use roi::{assign_roi, assign_roi_first_match, RoiConfiguration, RoiShape};
pub use rules::{validate, CompareOp, LogicRule, RuleSet, ValidationOutcome};
pub use types::{Detection, DetectionOutput};
