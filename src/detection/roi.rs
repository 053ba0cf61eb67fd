// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ROI 分配
// 检测框中心点落在哪个区域, 就归属哪个区域; 按区域在配置中的顺序测试, 先匹配先得

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::Detection;
use crate::geometry::{point_in_polygon, point_in_rect, Point2};

/// 未配置颜色或颜色无法解析时用蓝色
pub const DEFAULT_ROI_COLOR: [u8; 3] = [0, 0, 255];

/// ROI 形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RoiShape {
    Rectangle {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        #[serde(default)]
        color: String,
    },
    Polygon {
        points: Vec<Point2>,
        #[serde(default)]
        color: String,
    },
}

impl RoiShape {
    pub fn rect(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        RoiShape::Rectangle {
            x1,
            y1,
            x2,
            y2,
            color: String::new(),
        }
    }

    pub fn polygon(points: Vec<Point2>) -> Self {
        RoiShape::Polygon {
            points,
            color: String::new(),
        }
    }

    /// 包含测试, 边界上的点算在内
    ///
    /// 矩形按存储的角点测试; 配置加载时已经用 [`RoiShape::normalize`] 排好角点
    pub fn contains(&self, p: Point2) -> bool {
        match self {
            RoiShape::Rectangle { x1, y1, x2, y2, .. } => point_in_rect(p, *x1, *y1, *x2, *y2),
            RoiShape::Polygon { points, .. } => point_in_polygon(p, points),
        }
    }

    /// 把 x1 > x2 或 y1 > y2 的矩形换成有序角点; 返回是否有改动
    pub fn normalize(&mut self) -> bool {
        match self {
            RoiShape::Rectangle { x1, y1, x2, y2, .. } if *x1 > *x2 || *y1 > *y2 => {
                let (l, r) = (x1.min(*x2), x1.max(*x2));
                let (t, b) = (y1.min(*y2), y1.max(*y2));
                (*x1, *y1, *x2, *y2) = (l, t, r, b);
                true
            }
            _ => false,
        }
    }

    pub fn color(&self) -> &str {
        match self {
            RoiShape::Rectangle { color, .. } | RoiShape::Polygon { color, .. } => color,
        }
    }

    /// `#rrggbb` → RGB
    pub fn rgb(&self) -> [u8; 3] {
        parse_hex_color(self.color()).unwrap_or(DEFAULT_ROI_COLOR)
    }
}

fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// 一组命名的 ROI, 下标即 roi_id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoiConfiguration {
    pub name: String,
    /// 参考背景图 (letterbox 过的预览图路径)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default)]
    pub rois: Vec<RoiShape>,
}

impl RoiConfiguration {
    pub fn new(name: impl Into<String>, rois: Vec<RoiShape>) -> Self {
        Self {
            name: name.into(),
            background: None,
            rois,
        }
    }

    /// 归一化所有矩形, 返回被调整的 ROI 下标
    pub fn normalize(&mut self) -> Vec<usize> {
        self.rois
            .iter_mut()
            .enumerate()
            .filter_map(|(i, roi)| roi.normalize().then_some(i))
            .collect()
    }

    /// 第一个包含该点的 ROI 下标
    pub fn locate(&self, p: Point2) -> Option<usize> {
        self.rois.iter().position(|roi| roi.contains(p))
    }
}

/// 给每个检测分配 ROI, 没有命中的保持原状
pub fn assign_roi(detections: &mut [Detection], config: &RoiConfiguration) {
    for det in detections.iter_mut() {
        if let Some(idx) = config.locate(det.center()) {
            det.roi_id = Some(idx);
            det.roi_config_name = Some(config.name.clone());
        }
    }
    debug!(
        config = %config.name,
        assigned = detections.iter().filter(|d| d.roi_id.is_some()).count(),
        total = detections.len(),
        "roi assignment"
    );
}

/// 在多个配置中查找: 按调用方给出的顺序, 每个检测取第一个命中的配置
pub fn assign_roi_first_match<'a, I>(detections: &mut [Detection], configs: I)
where
    I: IntoIterator<Item = &'a RoiConfiguration>,
{
    let configs: Vec<&RoiConfiguration> = configs.into_iter().collect();
    for det in detections.iter_mut() {
        let center = det.center();
        let hit = configs
            .iter()
            .find_map(|cfg| cfg.locate(center).map(|idx| (idx, &cfg.name)));
        if let Some((idx, name)) = hit {
            det.roi_id = Some(idx);
            det.roi_config_name = Some(name.clone());
        }
    }
}
