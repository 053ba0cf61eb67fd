// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 几何工具: 框格式转换、IoU、点是否落在矩形/多边形内
// 全部是无状态的纯函数

use serde::{Deserialize, Serialize};

/// 点到边的距离小于该值即视为落在边上 (像素)
const EDGE_EPS: f32 = 1e-3;

#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point2 {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// 中心点+宽高 (cx, cy, w, h) → 角点 (x1, y1, x2, y2)
pub fn xywh2xyxy(b: [f32; 4]) -> [f32; 4] {
    let [cx, cy, w, h] = b;
    [cx - w / 2., cy - h / 2., cx + w / 2., cy + h / 2.]
}

/// 角点 (x1, y1, x2, y2) → 中心点+宽高 (cx, cy, w, h)
pub fn xyxy2xywh(b: [f32; 4]) -> [f32; 4] {
    let [x1, y1, x2, y2] = b;
    [(x1 + x2) / 2., (y1 + y2) / 2., x2 - x1, y2 - y1]
}

/// 角点格式的边界框, 序列化为 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct Bbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Bbox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xyxy(b: [f32; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    pub fn to_xyxy(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> Point2 {
        Point2::new((self.x1 + self.x2) / 2., (self.y1 + self.y2) / 2.)
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    /// 交并比; 两个零面积框的 IoU 记为 0
    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

impl From<[f32; 4]> for Bbox {
    fn from(b: [f32; 4]) -> Self {
        Self::from_xyxy(b)
    }
}

impl From<Bbox> for [f32; 4] {
    fn from(b: Bbox) -> Self {
        b.to_xyxy()
    }
}

/// 矩形包含测试, 边界算在内
pub fn point_in_rect(p: Point2, x1: f32, y1: f32, x2: f32, y2: f32) -> bool {
    x1 <= p.x && p.x <= x2 && y1 <= p.y && p.y <= y2
}

fn point_on_segment(p: Point2, a: Point2, b: Point2) -> bool {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len = (dx * dx + dy * dy).sqrt();
    if len <= f32::EPSILON {
        return (p.x - a.x).abs() <= EDGE_EPS && (p.y - a.y).abs() <= EDGE_EPS;
    }
    let cross = (p.x - a.x) * dy - (p.y - a.y) * dx;
    if cross.abs() / len > EDGE_EPS {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPS
        && p.x <= a.x.max(b.x) + EDGE_EPS
        && p.y >= a.y.min(b.y) - EDGE_EPS
        && p.y <= a.y.max(b.y) + EDGE_EPS
}

/// 多边形包含测试 (射线法), 落在边上的点算在内
///
/// 点数少于 3 的退化多边形只做边上测试
pub fn point_in_polygon(p: Point2, polygon: &[Point2]) -> bool {
    let n = polygon.len();
    if n == 0 {
        return false;
    }

    for i in 0..n {
        if point_on_segment(p, polygon[i], polygon[(i + 1) % n]) {
            return true;
        }
    }
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x_cross = (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
