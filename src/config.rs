//! YOLOv4 の後処理に必要な設定を扱うモジュール

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// COCO で学習した YOLOv4 のアンカーボックス (w, h)。3スケール x 3個
pub const COCO_ANCHORS: [[f32; 2]; 9] = [
    [12., 16.],
    [19., 36.],
    [40., 28.],
    [36., 75.],
    [76., 55.],
    [72., 146.],
    [142., 110.],
    [192., 243.],
    [459., 401.],
];

/// YOLOv4 の出力スケールのストライド
pub const YOLOV4_STRIDES: [u32; 3] = [8, 16, 32];

/// 1つの出力スケールの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    /// 1グリッドセルあたりのピクセル数
    pub stride: u32,
    /// アンカーボックスの (幅, 高さ) [pixel]
    pub anchors: Vec<[f32; 2]>,
}

/// デコード後のバウンディングボックスの座標系
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxSpace {
    /// 入力画像のピクセル座標
    #[default]
    Pixels,
    /// 画像サイズで割って [0, 1] にクランプした座標
    Normalized,
}

/// 後処理全体の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YoloV4Config {
    /// ネットワーク入力の一辺の長さ (正方形)
    pub img_size: u32,
    /// クラス数
    pub cls_num: usize,
    /// 出力スケールの設定。ストライドの昇順
    pub scales: Vec<ScaleConfig>,
    /// コンフィデンスの閾値
    pub conf_threshold: f32,
    /// NMS の IoU 閾値
    pub nms_threshold: f32,
    #[serde(default)]
    pub box_space: BoxSpace,
}

impl YoloV4Config {
    /// COCO (80クラス) 向けのデフォルト設定を作成します。
    ///
    /// # Args
    /// * `img_size` - ネットワーク入力の一辺の長さ
    pub fn yolov4_coco(img_size: u32) -> Self {
        Self::with_scales(img_size, 80, split_anchors(&YOLOV4_STRIDES, &COCO_ANCHORS))
    }

    /// 全スケール分をまとめたアンカーのリストから設定を作成します。
    /// アンカーは先頭から順にスケール数で等分されます。
    ///
    /// # Args
    /// * `img_size` - ネットワーク入力の一辺の長さ
    /// * `cls_num` - クラス数
    /// * `strides` - 各スケールのストライド
    /// * `anchors` - 全スケールのアンカー (w, h)
    ///
    /// # Return
    /// * 閾値がデフォルト値 (conf 0.001, nms 0.60) の設定。
    ///   アンカー数がスケール数で割り切れなければエラー
    pub fn from_flat_anchors(
        img_size: u32,
        cls_num: usize,
        strides: &[u32],
        anchors: &[[f32; 2]],
    ) -> Result<Self> {
        if strides.is_empty() {
            return Err(Error::InvalidConfig("strides must not be empty".into()));
        }
        if anchors.is_empty() || anchors.len() % strides.len() != 0 {
            return Err(Error::InvalidConfig(format!(
                "{} anchors cannot be split evenly over {} scales",
                anchors.len(),
                strides.len()
            )));
        }
        Ok(Self::with_scales(img_size, cls_num, split_anchors(strides, anchors)))
    }

    fn with_scales(img_size: u32, cls_num: usize, scales: Vec<ScaleConfig>) -> Self {
        Self {
            img_size,
            cls_num,
            scales,
            conf_threshold: 0.001,
            nms_threshold: 0.60,
            box_space: BoxSpace::Pixels,
        }
    }

    /// JSON ファイルから設定を読み込み、検証します。
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// スケールあたりのアンカー数 K
    pub fn anchor_num(&self) -> usize {
        self.scales.first().map_or(0, |s| s.anchors.len())
    }

    /// 1スケールの生出力のチャネル数 K * (1 + C + 4)
    pub fn channel_num(&self) -> usize {
        self.anchor_num() * (1 + self.cls_num + 4)
    }

    /// 設定の整合性を確認します。
    pub fn validate(&self) -> Result<()> {
        if self.img_size == 0 {
            return Err(Error::InvalidConfig("img_size must be positive".into()));
        }
        if self.cls_num == 0 {
            return Err(Error::InvalidConfig("cls_num must be positive".into()));
        }
        validate_scales(&self.scales)?;
        check_threshold("conf_threshold", self.conf_threshold)?;
        check_threshold("nms_threshold", self.nms_threshold)?;
        Ok(())
    }
}

/// アンカーを先頭から `strides.len()` 個に等分します。割り切れることは呼び出し側で確認済み
fn split_anchors(strides: &[u32], anchors: &[[f32; 2]]) -> Vec<ScaleConfig> {
    let per_scale = anchors.len() / strides.len();
    anchors
        .chunks_exact(per_scale)
        .zip(strides)
        .map(|(chunk, &stride)| ScaleConfig {
            stride,
            anchors: chunk.to_vec(),
        })
        .collect()
}

/// ストライドとアンカーの整合性を確認します。
pub(crate) fn validate_scales(scales: &[ScaleConfig]) -> Result<()> {
    let first = scales
        .first()
        .ok_or_else(|| Error::InvalidConfig("at least one scale is required".into()))?;
    let k = first.anchors.len();
    if k == 0 {
        return Err(Error::InvalidConfig("anchors must not be empty".into()));
    }

    for (i, scale) in scales.iter().enumerate() {
        if scale.stride == 0 {
            return Err(Error::InvalidConfig(format!(
                "scale {i}: stride must be positive"
            )));
        }
        if i > 0 && scale.stride <= scales[i - 1].stride {
            return Err(Error::InvalidConfig(format!(
                "scale {i}: strides must be strictly increasing ({} after {})",
                scale.stride,
                scales[i - 1].stride
            )));
        }
        if scale.anchors.len() != k {
            return Err(Error::AnchorCount {
                scale: i,
                expected: k,
                got: scale.anchors.len(),
            });
        }
        if scale.anchors.iter().flatten().any(|&v| !(v > 0.0 && v.is_finite())) {
            return Err(Error::InvalidConfig(format!(
                "scale {i}: anchor sizes must be positive and finite"
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_threshold(name: &'static str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidThreshold { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_config_splits_anchors_per_scale() {
        let cfg = YoloV4Config::yolov4_coco(640);
        assert_eq!(cfg.scales.len(), 3);
        assert_eq!(cfg.anchor_num(), 3);
        assert_eq!(cfg.channel_num(), 3 * 85);
        assert_eq!(cfg.scales[1].stride, 16);
        assert_eq!(cfg.scales[1].anchors[0], [36., 75.]);
        assert_eq!(cfg.scales[2].anchors[2], [459., 401.]);
        cfg.validate().unwrap();
    }

    #[test]
    fn flat_anchors_must_split_evenly() {
        let cfg = YoloV4Config::from_flat_anchors(64, 2, &[8, 16, 32], &COCO_ANCHORS).unwrap();
        assert_eq!(cfg.scales[0].anchors.len(), 3);
        cfg.validate().unwrap();

        // 9 個を 2 スケールには分けられない
        let uneven = YoloV4Config::from_flat_anchors(64, 2, &[8, 16], &COCO_ANCHORS);
        assert!(matches!(uneven, Err(Error::InvalidConfig(_))));
        let no_strides = YoloV4Config::from_flat_anchors(64, 2, &[], &COCO_ANCHORS);
        assert!(matches!(no_strides, Err(Error::InvalidConfig(_))));
        let no_anchors = YoloV4Config::from_flat_anchors(64, 2, &[8], &[]);
        assert!(matches!(no_anchors, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_non_increasing_strides() {
        let mut cfg = YoloV4Config::yolov4_coco(640);
        cfg.scales[2].stride = 16;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_uneven_anchor_counts() {
        let mut cfg = YoloV4Config::yolov4_coco(640);
        cfg.scales[1].anchors.pop();
        assert!(matches!(
            cfg.validate(),
            Err(Error::AnchorCount {
                scale: 1,
                expected: 3,
                got: 2,
            })
        ));
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let mut cfg = YoloV4Config::yolov4_coco(640);
        cfg.nms_threshold = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidThreshold {
                name: "nms_threshold",
                ..
            })
        ));
    }

    #[test]
    fn json_defaults_to_pixel_space() {
        let json = r#"{
            "img_size": 416,
            "cls_num": 2,
            "scales": [{ "stride": 32, "anchors": [[10.0, 20.0]] }],
            "conf_threshold": 0.1,
            "nms_threshold": 0.45
        }"#;
        let cfg: YoloV4Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.box_space, BoxSpace::Pixels);
        cfg.validate().unwrap();
    }

    #[test]
    fn loads_config_from_file() {
        let path = std::env::temp_dir().join("yolo_v4_postprocess_config_test.json");
        let cfg = YoloV4Config::yolov4_coco(320);
        fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();
        let loaded = YoloV4Config::from_json_file(&path).unwrap();
        assert_eq!(loaded, cfg);
        let _ = fs::remove_file(&path);
    }
}
