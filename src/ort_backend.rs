// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理后端

use std::path::Path;
use std::sync::Arc;

use ndarray::ArrayD;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info, warn};

use crate::detection::EngineLoader;
use crate::error::{DetectError, Result};
use crate::models::{InferenceEngine, DEFAULT_INPUT_SIZE};

/// 执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrtEP {
    #[default]
    CPU,
    CUDA(i32),
    Trt(i32),
}

/// 会话构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub ep: OrtEP,
    pub intra_threads: usize,
    pub trt_fp16: bool,
}

impl Default for OrtConfig {
    fn default() -> Self {
        Self {
            ep: OrtEP::CPU,
            intra_threads: 4,
            trt_fp16: false,
        }
    }
}

impl OrtConfig {
    fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        match self.ep {
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
            OrtEP::CUDA(device_id) => vec![
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::Trt(device_id) => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .with_fp16(self.trt_fp16)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

/// 一个已打开的 ONNX 模型
pub struct OrtBackend {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
    width: u32,
    height: u32,
    output_channels: Option<usize>,
    metadata_keys: Vec<String>,
    ep: OrtEP,
}

impl std::fmt::Debug for OrtBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtBackend")
            .field("input", &self.input_name)
            .field("outputs", &self.output_names)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("ep", &self.ep)
            .finish()
    }
}

impl OrtBackend {
    pub fn build(path: &Path, config: &OrtConfig) -> Result<Self> {
        let load_err = |reason: String| DetectError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        if !path.is_file() {
            return Err(load_err("model file not found".to_string()));
        }

        let session = Session::builder()
            .and_then(|b| b.with_execution_providers(config.execution_providers()))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(config.intra_threads))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| load_err(e.to_string()))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| load_err("model has no inputs".to_string()))?;
        let input_name = input.name.clone();

        // NCHW, -1 表示动态尺寸
        let dims = input.input_type.tensor_dimensions().cloned().unwrap_or_default();
        let dim = |i: usize| match dims.get(i) {
            Some(&d) if d > 0 => d as u32,
            _ => DEFAULT_INPUT_SIZE,
        };
        let (height, width) = (dim(2), dim(3));

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            return Err(load_err("model has no outputs".to_string()));
        }
        let output_channels = session
            .outputs
            .first()
            .and_then(|o| o.output_type.tensor_dimensions())
            .and_then(|d| match d.as_slice() {
                [_, c, _] if *c > 0 => Some(*c as usize),
                _ => None,
            });

        let metadata_keys = session
            .metadata()
            .and_then(|m| m.custom_keys())
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to read model metadata keys");
                Vec::new()
            });

        info!(
            path = %path.display(),
            ep = ?config.ep,
            width,
            height,
            outputs = ?output_names,
            "onnx session created"
        );

        Ok(Self {
            session,
            input_name,
            output_names,
            width,
            height,
            output_channels,
            metadata_keys,
            ep: config.ep,
        })
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }
}

impl InferenceEngine for OrtBackend {
    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn run(&self, input: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input.view()]?)?;

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in self.output_names.iter() {
            let y = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            debug!(output = %name, shape = ?y.shape(), "inference output");
            ys.push(y.into_owned());
        }
        Ok(ys)
    }

    fn metadata_value(&self, key: &str) -> Option<String> {
        match self.session.metadata().and_then(|m| m.custom(key)) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "failed to read model metadata");
                None
            }
        }
    }

    fn metadata_keys(&self) -> Vec<String> {
        self.metadata_keys.clone()
    }

    fn output_channels(&self) -> Option<usize> {
        self.output_channels
    }
}

/// 通过 ONNX Runtime 打开模型
#[derive(Debug, Clone, Default)]
pub struct OrtLoader {
    pub config: OrtConfig,
}

impl OrtLoader {
    pub fn new(config: OrtConfig) -> Self {
        Self { config }
    }
}

impl EngineLoader for OrtLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn InferenceEngine>> {
        let backend = OrtBackend::build(path, &self.config)?;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_load_error() {
        let err = OrtBackend::build(Path::new("/nonexistent/yolov8n.onnx"), &OrtConfig::default())
            .unwrap_err();
        assert!(matches!(err, DetectError::ModelLoad { .. }));
    }
}
