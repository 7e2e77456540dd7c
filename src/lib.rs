//! # YOLOv4 後処理ライブラリ
//!
//! このクレートは、YOLOv4 のネットワークが出力した生テンソルから物体検出結果を得るための
//! 後処理を行うRustライブラリです。ネットワーク本体は扱いません。
//!
//! ## 主な機能
//!
//! 1. **グリッドとアンカーの前計算**: 画像サイズごとに各スケールのセルのオフセットとアンカーを用意します。
//! 2. **デコード**: 生出力をオブジェクトネス、クラス確率、バウンディングボックスに変換します。
//! 3. **スコアフィルタ**: コンフィデンスを計算し、閾値未満の検出を捨てます。
//! 4. **NMS**: クラスごとに重なったバウンディングボックスを抑制します。
//! 5. **前処理・TTA**: レターボックス変換とその逆変換、左右反転 TTA の統合を行います。
//!
//! ## Example
//! ```no_run
//! # use ndarray::Array3;
//! use yolo_v4_postprocess::config::YoloV4Config;
//! use yolo_v4_postprocess::yolov4::YoloV4;
//!
//! let mut yolo = YoloV4::new(YoloV4Config::yolov4_coco(640))?;
//! # let s = Array3::zeros((80, 80, 255));
//! # let m = Array3::zeros((40, 40, 255));
//! # let l = Array3::zeros((20, 20, 255));
//! let result = yolo.infer(&[s.view(), m.view(), l.view()], 640)?;
//! # Ok::<(), yolo_v4_postprocess::error::Error>(())
//! ```

pub mod anchor_grid;
pub mod config;
pub mod decoder;
pub mod detection_result;
pub mod error;
pub mod img_proc;
pub mod nms;
pub mod score_filter;
pub mod tta;
pub mod yolov4;

pub use error::{Error, Result};
