//! クレート共通の定数と設定
//!
//! このモジュールは、モデルファイルの識別子と
//! シリアライゼーションの共通設定を提供します。

use bincode::config::{self, Configuration, Fixint, LittleEndian};

/// モデルファイルのマジックバイトプレフィックス。
///
/// 重みストアを永続化したファイルを識別するためのプレフィックスです。
/// モデルフォーマットの後方互換性を維持するポリシーに基づき、
/// クレートのセマンティックバージョンからは切り離されています。
pub const MODEL_MAGIC: &[u8] = b"BinyanAveragedWeights 0.1\n";

pub(crate) const MODEL_MAGIC_LEN: usize = MODEL_MAGIC.len();

/// シリアライゼーションの共通bincode設定を取得します。
///
/// この関数は、リトルエンディアンと固定長整数エンコーディングを使用する
/// bincode設定を返します。これにより、異なるプラットフォーム間での
/// 一貫したデータシリアライゼーションが保証されます。
///
/// # 戻り値
///
/// リトルエンディアンと固定長整数エンコーディングが設定された
/// bincode設定オブジェクト
pub const fn bincode_config() -> Configuration<LittleEndian, Fixint> {
    config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}
