//! オブジェクトネスとクラス確率からコンフィデンスを計算し、閾値で絞り込むモジュール

use log::debug;
use ndarray::ArrayView1;

use crate::decoder::DecodedOutput;
use crate::detection_result::DetectionData;

/// 最大の確率を持つクラスを返します。同値の場合は小さいクラス番号が優先されます。
/// クラスが1つもなければ `None` を返します。
pub fn argmax_class(probs: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in probs.iter().enumerate() {
        match best {
            Some((_, b)) if !(p > b) => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, _)| i)
}

/// デコード結果を `DetectionData` に変換し、コンフィデンスの閾値で絞り込みます。
///
/// # Args
/// * `decoded` - デコード結果
/// * `conf_threshold` - コンフィデンスの閾値 (この値以上を残す)
///
/// # Return
/// * 閾値以上の検出結果。入力の順番 (スケール、セル、アンカー) を保持します
///
/// 座標かコンフィデンスが有限でない検出は閾値判定の前に捨てます。
pub fn score_filter(decoded: &DecodedOutput, conf_threshold: f32) -> Vec<DetectionData> {
    let mut dropped = 0usize;
    let mut kept = Vec::new();

    let rows = decoded
        .objectness
        .column(0)
        .into_iter()
        .zip(decoded.class_prob.rows())
        .zip(decoded.boxes.rows());

    for ((&obj, probs), b) in rows {
        let Some(class) = argmax_class(probs) else {
            continue;
        };
        let confidence = obj * probs[class];
        let d = DetectionData::new(class, [b[0], b[1], b[2], b[3]], confidence);

        if !d.is_finite() {
            dropped += 1;
            continue;
        }
        if confidence >= conf_threshold {
            kept.push(d);
        }
    }

    if dropped > 0 {
        debug!("dropped {} degenerate predictions", dropped);
    }
    debug!(
        "{} of {} predictions passed conf threshold {}",
        kept.len(),
        decoded.len(),
        conf_threshold
    );
    kept
}

/// 既に作成済みの検出結果をコンフィデンスの閾値で絞り込みます。
pub fn filter_detections(detections: &[DetectionData], conf_threshold: f32) -> Vec<DetectionData> {
    detections
        .iter()
        .filter(|d| d.is_finite() && d.confidence >= conf_threshold)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array2};

    fn decoded() -> DecodedOutput {
        DecodedOutput {
            objectness: arr2(&[[0.9], [0.5], [1.0], [0.8]]),
            class_prob: arr2(&[[0.2, 0.8], [0.5, 0.5], [0.3, 0.7], [0.1, 0.9]]),
            boxes: arr2(&[
                [0., 0., 10., 10.],
                [1., 1., 5., 5.],
                [2., 2., f32::INFINITY, 4.],
                [3., 3., 6., 6.],
            ]),
        }
    }

    #[test]
    fn ties_pick_the_lowest_class() {
        assert_eq!(argmax_class(arr1(&[0.5, 0.5]).view()), Some(0));
        assert_eq!(argmax_class(arr1(&[0.1, 0.4, 0.4, 0.1]).view()), Some(1));
        assert_eq!(argmax_class(arr1(&[f32::NAN, 0.3]).view()), Some(0));
        assert_eq!(argmax_class(arr1::<f32>(&[]).view()), None);
    }

    #[test]
    fn rows_without_classes_yield_nothing() {
        let decoded = DecodedOutput {
            objectness: arr2(&[[0.9], [0.8]]),
            class_prob: Array2::zeros((2, 0)),
            boxes: arr2(&[[0., 0., 1., 1.], [0., 0., 2., 2.]]),
        };
        assert!(score_filter(&decoded, 0.0).is_empty());
    }

    #[test]
    fn keeps_detections_at_or_above_threshold_in_order() {
        let kept = score_filter(&decoded(), 0.25);
        // 0.72, 0.25, (inf box dropped), 0.72
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].class, 1);
        assert!((kept[0].confidence - 0.72).abs() < 1e-6);
        assert_eq!(kept[1].class, 0);
        assert_eq!(kept[1].confidence, 0.25);
        assert_eq!(kept[2].bbox(), [3., 3., 6., 6.]);
    }

    #[test]
    fn nothing_above_threshold_is_empty() {
        assert!(score_filter(&decoded(), 0.99).is_empty());
    }

    #[test]
    fn reapplying_the_threshold_to_detections_changes_nothing() {
        let once = score_filter(&decoded(), 0.3);
        let twice = filter_detections(&once, 0.3);
        assert_eq!(once, twice);
    }

    #[test]
    fn filtering_a_rebuilt_decoded_output_changes_nothing() {
        let once = score_filter(&decoded(), 0.3);

        // オブジェクトネス 1、採用クラスの確率 = コンフィデンスとして組み直す
        let cls_num = 2;
        let rebuilt = DecodedOutput {
            objectness: Array2::ones((once.len(), 1)),
            class_prob: Array2::from_shape_fn((once.len(), cls_num), |(i, c)| {
                if c == once[i].class {
                    once[i].confidence
                } else {
                    0.0
                }
            }),
            boxes: Array2::from_shape_fn((once.len(), 4), |(i, j)| once[i].bbox()[j]),
        };
        let twice = score_filter(&rebuilt, 0.3);
        assert_eq!(once, twice);
    }
}
