//! 左右反転によるテスト時拡張 (TTA) の検出結果を統合するモジュール

use crate::detection_result::DetectionData;
use crate::nms::nms_process;

/// 左右反転した画像での検出結果を元の画像の座標に戻します。
///
/// # Args
/// * `dets` - 反転画像での検出結果
/// * `img_width` - 画像の幅 (正規化座標なら 1.0)
pub fn flip_detections(dets: &[DetectionData], img_width: f32) -> Vec<DetectionData> {
    dets.iter()
        .map(|d| DetectionData {
            x1: img_width - d.x2,
            x2: img_width - d.x1,
            ..*d
        })
        .collect()
}

/// 元画像と反転画像の検出結果をまとめ、クラスごとに NMS をかけます。
pub fn fuse_flipped(
    dets: &[DetectionData],
    flipped_dets: &[DetectionData],
    img_width: f32,
    nms_threshold: f32,
) -> Vec<DetectionData> {
    let mut all = dets.to_vec();
    all.extend(flip_detections(flipped_dets, img_width));
    nms_process(&all, nms_threshold)
}
