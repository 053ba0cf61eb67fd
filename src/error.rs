// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 错误类型定义
// 检测链路中的每一类失败都有独立的变体, 由调用方决定如何呈现

use std::path::PathBuf;

use thiserror::Error;

use crate::models::ModelType;

/// 检测库统一的 Result 类型
pub type Result<T> = std::result::Result<T, DetectError>;

/// 后处理阶段的错误 (模型输出结构不符合预期)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostprocessError {
    /// 输出张量形状不属于任何已知布局
    #[error("unexpected model output shape {shape:?}")]
    UnexpectedShape { shape: Vec<usize> },

    /// 过滤后 boxes / scores / class_ids 长度不一致
    #[error("length mismatch after filtering: boxes={boxes}, scores={scores}, class_ids={class_ids}")]
    LengthMismatch {
        boxes: usize,
        scores: usize,
        class_ids: usize,
    },

    /// 推理引擎没有返回任何输出
    #[error("inference engine returned no output tensor")]
    MissingOutput,
}

/// 配置读写错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no model named '{0}' in the registry")]
    UnknownModel(String),
}

/// 检测链路错误
#[derive(Error, Debug)]
pub enum DetectError {
    /// 模型文件不存在 / 无法读取 / 结构不受支持; 之前加载的模型保持生效
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// 当前模型类型不支持检测, 在推理之前拒绝
    #[error("unsupported model type: {0}")]
    UnsupportedModelType(ModelType),

    /// 尚未加载任何模型
    #[error("no model loaded, load a model first")]
    NoModelLoaded,

    /// 图片无法解码
    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    /// 推理引擎调用失败 (不重试)
    #[error("inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Postprocess(#[from] PostprocessError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 标注图片编码/写出失败
    #[error("failed to encode image {path}: {reason}")]
    ImageEncode { path: PathBuf, reason: String },
}

impl From<ort::Error> for DetectError {
    fn from(e: ort::Error) -> Self {
        tracing::error!(error = %e, "onnxruntime error");
        DetectError::Inference(e.to_string())
    }
}

impl From<image::ImageError> for DetectError {
    fn from(e: image::ImageError) -> Self {
        DetectError::ImageDecode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postprocess_error_converts() {
        let err: DetectError = PostprocessError::UnexpectedShape { shape: vec![1, 3] }.into();
        assert!(matches!(err, DetectError::Postprocess(_)));
        assert!(err.to_string().contains("[1, 3]"));
    }

    #[test]
    fn test_unsupported_model_type_message() {
        let err = DetectError::UnsupportedModelType(ModelType::YOLOv5);
        assert_eq!(err.to_string(), "unsupported model type: yolov5");
    }
}
