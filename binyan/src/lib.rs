//! # Binyan
//!
//! Binyanは、ヘブライ語形態素解析のための遷移ベース学習器が使用する
//! 平均化パーセプトロンの素性重みストアです。
//!
//! ## 概要
//!
//! オンライン構造化学習では、パーサーの決定1回ごとに(素性, 遷移)ペアの
//! 重みが更新され、最終モデルとして重みの時間平均が使用されます。
//! このライブラリは、過去のすべての値を保存することなく任意の世代における
//! 生涯平均を復元できる遅延平均スキームと、独立した訓練例を並列に処理する
//! ワーカースレッドからの並行更新を提供します。
//!
//! ## 主な機能
//!
//! - **遅延平均**: 閉区間の積分和による生涯平均の定数時間復元
//! - **2種類の物理レイアウト**: 小さい遷移集合には密な配列、
//!   疎な集合にはハッシュマップ
//! - **並行更新**: 3段階のロック階層による複数ワーカーからの安全な更新
//! - **永続化**: bincodeによる再現性のあるモデルファイルの読み書き
//!
//! ## 使用例
//!
//! ```
//! use binyan::{AveragedWeights, Model, WaitGroup};
//!
//! let weights = AveragedWeights::<String>::new(true);
//! let wg = WaitGroup::new();
//!
//! wg.add(2);
//! weights.add(1, 0, "w=שלום".to_string(), 3, &wg);
//! weights.add(1, 2, "p=NN".to_string(), 1, &wg);
//! wg.wait();
//!
//! assert_eq!(weights.value(0, &"w=שלום".to_string()), 3);
//!
//! // 学習終了後: 積分、平均化、永続化
//! weights.integrate(5);
//! weights.scalar_divide(5);
//!
//! let model = Model::from_weights(&weights, 5);
//! let mut buf = vec![];
//! model.write_model(&mut buf)?;
//!
//! let restored = Model::read_model(&buf[..])?;
//! let weights = restored.into_weights(true);
//! assert_eq!(weights.value(0, &"w=שלום".to_string()), 2);
//! # Ok::<(), binyan::errors::BinyanError>(())
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// 共通の定数とシリアライゼーション設定
pub mod common;

/// エラー型の定義
pub mod errors;

/// モデルの永続化
pub mod model;

/// 並行更新のための同期プリミティブ
pub mod sync;

/// 内部ユーティリティ関数
pub mod utils;

/// 平均化された素性重みテーブル
pub mod weights;

// Re-exports
pub use model::{Model, ModelData};
pub use sync::WaitGroup;
pub use weights::{
    AveragedWeights, Feature, ScoreAccumulator, ScoreVector, Snapshot, TransitionStore, WeightCell,
};

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
