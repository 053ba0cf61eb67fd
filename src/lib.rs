#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 应用配置 / 命令行参数
pub mod detection; // 检测编排、ROI 分配、规则校验
pub mod error;
pub mod geometry;
pub mod models; // 模型类型、预处理、后处理、类别名称
pub mod renderer; // 结果标注
pub mod service; // 服务层
pub mod utils;

pub mod ort_backend;

pub use crate::config::{AppConfig, Args, Command};
pub use crate::detection::{
    Detection, DetectionOutput, Detector, EngineLoader, RoiConfiguration, RoiShape, RuleSet,
    RuleStore, ValidationOutcome,
};
pub use crate::error::{DetectError, PostprocessError, Result};
pub use crate::geometry::{Bbox, Point2};
pub use crate::models::{non_max_suppression, InferenceEngine, ModelMetadata, ModelType};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP, OrtLoader};
pub use crate::service::{DetectionResponse, DetectionService};

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
