// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 检测链路的数据结构定义
/// Data structures for the detection pipeline
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::detection::rules::ValidationOutcome;
use crate::geometry::{Bbox, Point2};

// ========== 数据结构 ==========

/// 单个检测结果 (原图像素坐标)
///
/// 由后处理器创建, ROI 分配阶段补上 `roi_id` / `roi_config_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Bbox,
    pub score: f32,
    pub class_id: usize,
    pub class_name: String,
    /// 所在 ROI 在配置中的下标 (0 对应显示的 "ROI 1")
    pub roi_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi_config_name: Option<String>,
}

impl Detection {
    pub fn new(bbox: Bbox, score: f32, class_id: usize, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            score,
            class_id,
            class_name: class_name.into(),
            roi_id: None,
            roi_config_name: None,
        }
    }

    pub fn center(&self) -> Point2 {
        self.bbox.center()
    }
}

/// 一次 detect 调用的完整结果 (检测模块 → 服务层)
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub detections: Vec<Detection>,
    /// 画好框和 ROI 的图片副本
    pub annotated: RgbImage,
    /// 指定了规则时的校验结论
    pub verdict: Option<ValidationOutcome>,
    /// 实际参与 ROI 分配的配置名称
    pub roi_config_name: Option<String>,
}
