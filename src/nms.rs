//! クラスごとの Non-Maximum Suppression (NMS) を行うモジュール

use std::collections::{BTreeMap, VecDeque};

use log::debug;
use rayon::prelude::*;

use crate::detection_result::DetectionData;

/// IoU の分母に加える値 (ゼロ除算防止)
const IOU_EPS: f32 = 1e-14;
/// 重なりの幅と高さの下限
const MIN_OVERLAP: f32 = 1e-28;

/// 2つのバウンディングボックスの Intersection over Union を計算します。
pub fn iou(a: &DetectionData, b: &DetectionData) -> f32 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(MIN_OVERLAP);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(MIN_OVERLAP);
    let inter = w * h;
    inter / (a.area() + b.area() - inter + IOU_EPS)
}

/// 1クラス分の検出結果に NMS を適用します。
///
/// # Args
/// * `bb` - 同じクラスの検出結果
/// * `nms_threshold` - IoU がこの値を超えるボックスを抑制する
///
/// # Return
/// * 残った検出結果 (コンフィデンスの降順)
///
/// コンフィデンスが同じ場合は入力の順番を保ちます。
pub fn nms(bb: &[DetectionData], nms_threshold: f32) -> Vec<DetectionData> {
    let mut sorted_bb = bb.to_vec();
    sorted_bb.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut remaining = VecDeque::from(sorted_bb);
    let mut keep = Vec::new();
    while let Some(best) = remaining.pop_front() {
        remaining.retain(|d| iou(&best, d) <= nms_threshold);
        keep.push(best);
    }
    keep
}

/// 検出結果をクラス別に分割し、各クラスに NMS を適用します。
///
/// # Args
/// * `bb` - 全クラスの検出結果
/// * `nms_threshold` - NMS の IoU 閾値
///
/// # Return
/// * 各クラスで残った検出結果をクラス番号の昇順に連結したもの
pub fn nms_process(bb: &[DetectionData], nms_threshold: f32) -> Vec<DetectionData> {
    // クラス別に分割
    let mut cls: BTreeMap<usize, Vec<DetectionData>> = BTreeMap::new();
    for &detection in bb {
        cls.entry(detection.class).or_default().push(detection);
    }
    let groups: Vec<Vec<DetectionData>> = cls.into_values().collect();

    let new_box: Vec<DetectionData> = groups
        .par_iter()
        .map(|d| nms(d, nms_threshold))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    debug!(
        "nms kept {} of {} detections over {} classes",
        new_box.len(),
        bb.len(),
        groups.len()
    );
    new_box
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: usize, bbox: [f32; 4], confidence: f32) -> DetectionData {
        DetectionData::new(class, bbox, confidence)
    }

    /// 乱数の代わりの線形合同法
    fn pseudo_random_detections(n: usize, cls_num: usize) -> Vec<DetectionData> {
        let mut state = 12345u32;
        let mut next = move || {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 8) as f32 / (1u32 << 24) as f32
        };
        (0..n)
            .map(|_| {
                let x = next() * 100.;
                let y = next() * 100.;
                let w = 5. + next() * 40.;
                let h = 5. + next() * 40.;
                let class = (next() * cls_num as f32) as usize % cls_num;
                det(class, [x, y, x + w, y + h], next())
            })
            .collect()
    }

    #[test]
    fn iou_of_known_boxes() {
        let a = det(0, [0., 0., 10., 10.], 1.);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &det(0, [0., 0., 10., 9.], 1.)) - 0.9).abs() < 1e-6);
        assert!((iou(&a, &det(0, [5., 0., 15., 10.], 1.)) - 1. / 3.).abs() < 1e-6);
        assert_eq!(iou(&a, &det(0, [20., 20., 30., 30.], 1.)), 0.0);
    }

    #[test]
    fn iou_of_zero_area_boxes_is_finite() {
        let p = det(0, [3., 3., 3., 3.], 1.);
        let v = iou(&p, &p);
        assert!(v.is_finite());
    }

    #[test]
    fn heavy_overlap_keeps_only_the_best() {
        let dets = [
            det(0, [0., 0., 10., 9.], 0.8),
            det(0, [0., 0., 10., 10.], 0.9),
        ];
        let kept = nms_process(&dets, 0.5);
        assert_eq!(kept, vec![dets[1]]);
    }

    #[test]
    fn light_overlap_keeps_both() {
        let dets = [
            det(0, [0., 0., 10., 10.], 0.9),
            det(0, [0., 0., 2., 5.], 0.8),
        ];
        assert!((iou(&dets[0], &dets[1]) - 0.1).abs() < 1e-6);
        assert_eq!(nms_process(&dets, 0.5).len(), 2);
    }

    #[test]
    fn classes_are_suppressed_independently() {
        let dets = [
            det(0, [0., 0., 10., 10.], 0.9),
            det(1, [0., 0., 10., 10.], 0.8),
        ];
        assert_eq!(nms_process(&dets, 0.5).len(), 2);
    }

    #[test]
    fn equal_confidence_keeps_the_earlier_one() {
        let dets = [
            det(0, [0., 0., 10., 10.], 0.7),
            det(0, [1., 0., 10., 10.], 0.7),
        ];
        assert_eq!(nms(&dets, 0.5), vec![dets[0]]);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(nms_process(&[], 0.5).is_empty());
    }

    #[test]
    fn retained_pairs_do_not_overlap_beyond_threshold() {
        let dets = pseudo_random_detections(300, 4);
        let thr = 0.45;
        let kept = nms_process(&dets, thr);
        assert!(kept.len() <= dets.len());
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                if a.class == b.class {
                    assert!(iou(a, b) <= thr);
                }
            }
        }
    }

    #[test]
    fn relabeling_classes_relabels_the_output() {
        let dets = pseudo_random_detections(200, 3);
        let perm = [2usize, 0, 1];
        let relabeled: Vec<_> = dets
            .iter()
            .map(|d| DetectionData {
                class: perm[d.class],
                ..*d
            })
            .collect();

        let key = |d: &DetectionData| (d.class, d.confidence.to_bits(), d.x1.to_bits());
        let mut expected: Vec<_> = nms_process(&dets, 0.5)
            .iter()
            .map(|d| DetectionData {
                class: perm[d.class],
                ..*d
            })
            .collect();
        let mut got = nms_process(&relabeled, 0.5);
        expected.sort_by_key(key);
        got.sort_by_key(key);
        assert_eq!(expected, got);
    }
}
