// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 后处理: 原始输出张量 → 过滤、坐标还原、去重后的检测结果
//
// 同一模型族的不同导出配置会给出结构不同的输出, 先按张量形状判定布局,
// 每种布局一个解码函数, 最后汇合到同一条 (xywh, score, class) 流水线

use std::time::Instant;

use ndarray::{s, ArrayD, ArrayView2, Axis, Ix2, Ix3};
use tracing::debug;

use crate::detection::Detection;
use crate::error::PostprocessError;
use crate::geometry::{xywh2xyxy, Bbox};
use crate::models::{ClassNames, PreprocessParams};

const CXYWH_OFFSET: usize = 4;
const OBJ_INDEX: usize = 4;
const CLS_OFFSET: usize = 5;

/// 输出张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// (1, 5, N): cx, cy, w, h, conf, 全部为类别 0
    SingleClass { anchors: usize },
    /// (1, C, N), C > 5: cx, cy, w, h, obj, 各类别分数
    MultiClass { channels: usize, anchors: usize },
    /// (N, 5 + nc), 没有 batch 维
    LegacyFlat { rows: usize, cols: usize },
}

impl OutputLayout {
    /// 根据张量形状判定布局
    pub fn from_shape(shape: &[usize]) -> Result<Self, PostprocessError> {
        let unexpected = || PostprocessError::UnexpectedShape {
            shape: shape.to_vec(),
        };
        match *shape {
            [batch, channels, anchors] if batch >= 1 => match channels {
                5 => Ok(OutputLayout::SingleClass { anchors }),
                c if c > 5 => Ok(OutputLayout::MultiClass {
                    channels: c,
                    anchors,
                }),
                _ => Err(unexpected()),
            },
            [rows, cols] if cols > CLS_OFFSET => Ok(OutputLayout::LegacyFlat { rows, cols }),
            _ => Err(unexpected()),
        }
    }
}

/// 解码后、NMS 之前的候选框 (xywh, 模型输入坐标系)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub class_ids: Vec<usize>,
}

impl Candidates {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty() && self.scores.is_empty() && self.class_ids.is_empty()
    }

    fn push(&mut self, bbox: [f32; 4], score: f32, class_id: usize) {
        self.boxes.push(bbox);
        self.scores.push(score);
        self.class_ids.push(class_id);
    }

    /// 三个数组长度必须一致
    pub fn check(&self) -> Result<(), PostprocessError> {
        let (b, s, c) = (self.boxes.len(), self.scores.len(), self.class_ids.len());
        if b != s || s != c {
            return Err(PostprocessError::LengthMismatch {
                boxes: b,
                scores: s,
                class_ids: c,
            });
        }
        Ok(())
    }
}

fn xywh_of<'a>(row: impl IntoIterator<Item = &'a f32>) -> [f32; 4] {
    let mut b = [0.0; 4];
    for (dst, src) in b.iter_mut().zip(row) {
        *dst = *src;
    }
    b
}

/// argmax, 相等时取靠前的类别
fn argmax<'a>(xs: impl IntoIterator<Item = &'a f32>) -> Option<(usize, f32)> {
    xs.into_iter()
        .copied()
        .enumerate()
        .reduce(|max, x| if x.1 > max.1 { x } else { max })
}

/// (N, C) 视图, 一行一个 anchor
fn rows_of(output: &ArrayD<f32>) -> Result<ArrayView2<'_, f32>, PostprocessError> {
    let unexpected = || PostprocessError::UnexpectedShape {
        shape: output.shape().to_vec(),
    };
    match output.ndim() {
        3 => {
            let batch = output
                .view()
                .into_dimensionality::<Ix3>()
                .map_err(|_| unexpected())?;
            Ok(batch.index_axis_move(Axis(0), 0).reversed_axes())
        }
        2 => output
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| unexpected()),
        _ => Err(unexpected()),
    }
}

/// 单类别布局: conf > 阈值
pub fn decode_single_class(preds: ArrayView2<'_, f32>, conf_threshold: f32) -> Candidates {
    let mut ys = Candidates::default();
    for row in preds.axis_iter(Axis(0)) {
        let confidence = row[OBJ_INDEX];
        if confidence > conf_threshold {
            ys.push(xywh_of(row.slice(s![0..CXYWH_OFFSET])), confidence, 0);
        }
    }
    ys
}

/// 多类别布局: obj > 阈值, 类别分数乘以 obj 后取 argmax, 再次 > 阈值
pub fn decode_multi_class(preds: ArrayView2<'_, f32>, conf_threshold: f32) -> Candidates {
    let mut ys = Candidates::default();
    for row in preds.axis_iter(Axis(0)) {
        let obj = row[OBJ_INDEX];
        if obj <= conf_threshold {
            continue;
        }
        let Some((id, cls)) = argmax(row.slice(s![CLS_OFFSET..]).iter()) else {
            continue;
        };
        let score = cls * obj;
        if score > conf_threshold {
            ys.push(xywh_of(row.slice(s![0..CXYWH_OFFSET])), score, id);
        }
    }
    ys
}

/// 旧版扁平布局: obj >= 阈值, 综合分数 obj * max(cls) >= 阈值
pub fn decode_legacy_flat(preds: ArrayView2<'_, f32>, conf_threshold: f32) -> Candidates {
    let mut ys = Candidates::default();
    for row in preds.axis_iter(Axis(0)) {
        let obj = row[OBJ_INDEX];
        if obj < conf_threshold {
            continue;
        }
        let Some((id, cls)) = argmax(row.slice(s![CLS_OFFSET..]).iter()) else {
            continue;
        };
        let score = obj * cls;
        if score >= conf_threshold {
            ys.push(xywh_of(row.slice(s![0..CXYWH_OFFSET])), score, id);
        }
    }
    ys
}

/// 非极大值抑制 (与类别无关)
///
/// 按分数降序贪心保留, 与已保留框 IoU 超过阈值的丢弃; 排序是稳定的,
/// 分数相同的框保持原有先后顺序。返回保留框的下标, 按分数降序。
pub fn non_max_suppression(boxes: &[Bbox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let n = boxes.len().min(scores.len());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep: Vec<usize> = Vec::with_capacity(n);
    for index in order {
        let drop = keep
            .iter()
            .any(|&prev| boxes[prev].iou(&boxes[index]) > iou_threshold);
        if !drop {
            keep.push(index);
        }
    }
    keep
}

/// 后处理器, 持有当前生效的阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Postprocessor {
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

impl Postprocessor {
    pub fn new(conf_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            conf_threshold,
            iou_threshold,
        }
    }

    /// 按布局解码出候选框
    pub fn decode(&self, output: &ArrayD<f32>) -> Result<Candidates, PostprocessError> {
        let layout = OutputLayout::from_shape(output.shape())?;
        debug!(shape = ?output.shape(), ?layout, "decoding model output");

        let preds = rows_of(output)?;
        let ys = match layout {
            OutputLayout::SingleClass { .. } => decode_single_class(preds, self.conf_threshold),
            OutputLayout::MultiClass { .. } => decode_multi_class(preds, self.conf_threshold),
            OutputLayout::LegacyFlat { .. } => decode_legacy_flat(preds, self.conf_threshold),
        };
        ys.check()?;
        Ok(ys)
    }

    /// 原始输出 → 原图坐标系下的检测结果
    ///
    /// 没有目标时返回空列表; 只有输出结构不对才是错误
    pub fn postprocess(
        &self,
        output: &ArrayD<f32>,
        params: &PreprocessParams,
        names: &ClassNames,
    ) -> Result<Vec<Detection>, PostprocessError> {
        let t = Instant::now();
        let candidates = self.decode(output)?;
        if candidates.is_empty() {
            debug!(conf = self.conf_threshold, "no candidates above threshold");
            return Ok(Vec::new());
        }

        let boxes: Vec<Bbox> = candidates
            .boxes
            .iter()
            .map(|b| Bbox::from_xyxy(params.rescale_box(xywh2xyxy(*b))))
            .collect();
        let keep = non_max_suppression(&boxes, &candidates.scores, self.iou_threshold);

        let ys: Vec<Detection> = keep
            .into_iter()
            .map(|i| {
                let class_id = candidates.class_ids[i];
                Detection::new(
                    boxes[i],
                    candidates.scores[i],
                    class_id,
                    names.name(class_id),
                )
            })
            .collect();

        debug!(
            candidates = candidates.len(),
            kept = ys.len(),
            elapsed = ?t.elapsed(),
            "postprocess done"
        );
        Ok(ys)
    }
}
