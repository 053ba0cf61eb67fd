// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 工具模块
pub mod affine_transform;

pub use affine_transform::AffineMatrix;
