#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayD};

use yolov8_roi_rs::error::{DetectError, Result};
use yolov8_roi_rs::{EngineLoader, InferenceEngine};

/// 固定输出的推理引擎
#[derive(Debug, Clone)]
pub struct MockEngine {
    pub size: (u32, u32),
    pub output: ArrayD<f32>,
    pub metadata: HashMap<String, String>,
}

impl MockEngine {
    pub fn new(output: ArrayD<f32>) -> Self {
        Self {
            size: (640, 640),
            output,
            metadata: HashMap::new(),
        }
    }

    pub fn with_names(mut self, names: &[&str]) -> Self {
        let json = serde_json::to_string(names).unwrap();
        self.metadata.insert("names".to_string(), json);
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }
}

impl InferenceEngine for MockEngine {
    fn input_size(&self) -> (u32, u32) {
        self.size
    }

    fn run(&self, input: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
        let (w, h) = self.size;
        assert_eq!(input.shape(), &[1, 3, h as usize, w as usize]);
        Ok(vec![self.output.clone()])
    }

    fn metadata_value(&self, key: &str) -> Option<String> {
        self.metadata.get(key).cloned()
    }

    fn metadata_keys(&self) -> Vec<String> {
        self.metadata.keys().cloned().collect()
    }
}

/// 按文件名返回预先登记的引擎; 未登记的路径加载失败
#[derive(Default, Clone)]
pub struct MockLoader {
    engines: Arc<Mutex<HashMap<String, Arc<dyn InferenceEngine>>>>,
}

impl MockLoader {
    pub fn register(&self, file_name: &str, engine: MockEngine) {
        self.engines
            .lock()
            .unwrap()
            .insert(file_name.to_string(), Arc::new(engine));
    }
}

impl EngineLoader for MockLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn InferenceEngine>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.engines
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| DetectError::ModelLoad {
                path: PathBuf::from(path),
                reason: "no such mock model".to_string(),
            })
    }
}

/// (1, 4 + 1 + nc, N) 通道优先输出; 每行是 [cx, cy, w, h, obj, cls...]
pub fn channels_first(rows: &[Vec<f32>], anchors: usize) -> ArrayD<f32> {
    let channels = rows.first().map(|r| r.len()).unwrap_or(5);
    let mut out = Array3::<f32>::zeros((1, channels, anchors));
    for (i, row) in rows.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            out[[0, c, i]] = *v;
        }
    }
    out.into_dyn()
}

/// (N, 4 + 1 + nc) 无 batch 维输出
pub fn flat(rows: &[Vec<f32>]) -> ArrayD<f32> {
    let cols = rows.first().map(|r| r.len()).unwrap_or(6);
    let mut out = Array2::<f32>::zeros((rows.len(), cols));
    for (i, row) in rows.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            out[[i, c]] = *v;
        }
    }
    out.into_dyn()
}

pub fn gray_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([114, 114, 114]))
}
