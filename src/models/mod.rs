// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 模型统一接口
///
/// # 架构说明
///
/// ```text
/// 原始图片 → preprocess (letterbox) → NCHW 张量
///          ↓
///     InferenceEngine::run (ONNX Runtime / 测试用的假引擎)
///          ↓
///     原始输出 → Postprocessor → Detection 列表
/// ```
///
/// - `preprocess.rs`: letterbox 预处理与坐标反变换参数
/// - `postprocess.rs`: 三种输出布局的解码 + NMS
/// - `class_names.rs`: 类别名称解析链
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod class_names;
pub mod postprocess;
pub mod preprocess;

pub use class_names::{ClassNames, COCO_CLASSES};
pub use postprocess::{non_max_suppression, Candidates, OutputLayout, Postprocessor};
pub use preprocess::{letterbox_image, preprocess, ChannelOrder, PreprocessParams};

/// 默认置信度阈值
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
/// 默认 NMS IoU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
/// 动态输入尺寸时使用的边长
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// 模型类型枚举（用于自动识别模型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    /// YOLOv8 标准模型
    #[serde(rename = "yolov8")]
    YOLOv8,
    /// YOLOv11, 导出的 ONNX 接口与 v8 相同
    #[serde(rename = "yolov11")]
    YOLOv11,
    /// YOLOv5 模型 (可登记, 但不能检测)
    #[serde(rename = "yolov5")]
    YOLOv5,
    /// 无法识别
    #[serde(rename = "unknown")]
    Unknown,
}

impl ModelType {
    /// 从模型文件名推断模型类型
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let basename = path
            .as_ref()
            .file_name()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if basename.contains("yolov5") {
            ModelType::YOLOv5
        } else if basename.contains("yolov11") || basename.contains("v11") {
            ModelType::YOLOv11
        } else if basename.contains("yolov8") {
            ModelType::YOLOv8
        } else if basename.contains("qr") {
            // QR 码模型通常是 v8 结构
            ModelType::YOLOv8
        } else {
            ModelType::Unknown
        }
    }

    /// 根据模型内嵌元数据的键名推断类型
    pub fn from_metadata_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        const YOLOV8_KEYS: [&str; 4] = ["stride", "task", "batch", "imgsz"];
        const YOLOV5_KEYS: [&str; 3] = ["model_type", "size", "stride"];

        let count = |expected: &[&str]| {
            expected
                .iter()
                .filter(|k| keys.iter().any(|key| key.as_ref() == **k))
                .count()
        };
        let (v8, v5) = (count(&YOLOV8_KEYS), count(&YOLOV5_KEYS));

        if v8 > v5 {
            ModelType::YOLOv8
        } else if v5 > 0 {
            ModelType::YOLOv5
        } else {
            ModelType::Unknown
        }
    }

    /// 是否能走 v8 的检测链路
    pub fn supports_detect(&self) -> bool {
        matches!(self, ModelType::YOLOv8 | ModelType::YOLOv11)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::YOLOv8 => "yolov8",
            ModelType::YOLOv11 => "yolov11",
            ModelType::YOLOv5 => "yolov5",
            ModelType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yolov8" | "v8" => Ok(ModelType::YOLOv8),
            "yolov11" | "v11" => Ok(ModelType::YOLOv11),
            "yolov5" | "v5" => Ok(ModelType::YOLOv5),
            "unknown" => Ok(ModelType::Unknown),
            other => Err(format!("unknown model type '{}'", other)),
        }
    }
}

/// 模型加载时得到的元数据, 模型生命周期内不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetadata {
    pub input_width: u32,
    pub input_height: u32,
    pub class_names: ClassNames,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

impl ModelMetadata {
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }
}

/// 推理引擎接口 (张量进, 张量出)
///
/// 真实实现见 `ort_backend::OrtBackend`; 测试里用内存中的假引擎替代
pub trait InferenceEngine: Send + Sync {
    /// 模型输入尺寸 (width, height)
    fn input_size(&self) -> (u32, u32);

    /// 执行一次前向推理, 输入为 NCHW 张量
    fn run(&self, input: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>>;

    /// 模型内嵌的自定义元数据
    fn metadata_value(&self, _key: &str) -> Option<String> {
        None
    }

    /// 内嵌元数据的全部键名
    fn metadata_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// 第一个输出的通道数 (N, C, anchors 中的 C), 未知时返回 None
    fn output_channels(&self) -> Option<usize> {
        None
    }
}
