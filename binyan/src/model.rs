//! モデルの永続化
//!
//! このモジュールは、学習済みの重みテーブルをファイルへ書き出し、
//! 推論時に読み戻すための機能を提供します。

use std::io::{Read, Write};

use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use hashbrown::HashSet;

use crate::common::{self, MODEL_MAGIC, MODEL_MAGIC_LEN};
use crate::errors::{BinyanError, Result};
use crate::weights::{AveragedWeights, Feature, Snapshot};

/// モデルデータ。
///
/// 重みのスナップショットと、それが採取された世代を保持します。
/// 世代をモデルファイルに同梱することで、推論側は復元先の世代を
/// 別経路で受け取る必要がなくなります。
#[derive(Debug)]
pub struct ModelData<F> {
    /// スナップショットが採取された世代
    pub generation: u32,

    /// 重みのスナップショット
    pub snapshot: Snapshot<F>,
}

impl<F: Encode> Encode for ModelData<F> {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.generation.encode(encoder)?;
        self.snapshot.encode(encoder)
    }
}

impl<Context, F: Decode<Context>> Decode<Context> for ModelData<F> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Self {
            generation: u32::decode(decoder)?,
            snapshot: Snapshot::decode(decoder)?,
        })
    }
}

/// 学習済みの重みモデル。
///
/// 学習の静止フェーズで採取したスナップショットをラップし、
/// マジックバイトによる識別付きのファイル入出力を提供します。
#[derive(Debug)]
pub struct Model<F> {
    data: ModelData<F>,
}

impl<F: Feature> Model<F> {
    /// テーブルの現在の重みからモデルを作成します。
    ///
    /// 積分と平均化を終えた静止状態のテーブルに対して
    /// 呼び出すことを想定しています。
    ///
    /// # 引数
    ///
    /// * `weights` - スナップショットを採取するテーブル
    /// * `generation` - 採取時の世代
    #[must_use]
    pub fn from_weights(weights: &AveragedWeights<F>, generation: u32) -> Self {
        Self {
            data: ModelData {
                generation,
                snapshot: weights.snapshot(),
            },
        }
    }

    /// スナップショットが採取された世代を返します。
    pub fn generation(&self) -> u32 {
        self.data.generation
    }

    /// 保持しているスナップショットを返します。
    pub fn snapshot(&self) -> &Snapshot<F> {
        &self.data.snapshot
    }

    /// モデルデータをエクスポートします。
    ///
    /// # 引数
    ///
    /// * `wtr` - 書き込み先
    ///
    /// # 戻り値
    ///
    /// エクスポート成功時は `Ok(())`
    ///
    /// # エラー
    ///
    /// 書き込みまたはシリアライゼーションに失敗した場合、
    /// [`BinyanError`]が返されます。
    pub fn write_model<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        wtr.write_all(MODEL_MAGIC)?;
        bincode::encode_into_std_write(&self.data, &mut wtr, common::bincode_config())?;
        log::debug!(
            "[binyan] wrote model with {} features at generation {}",
            self.data.snapshot.entries().len(),
            self.data.generation
        );
        Ok(())
    }

    /// モデルを読み込みます。
    ///
    /// # 引数
    ///
    /// * `rdr` - モデルファイルのリーダー
    ///
    /// # 戻り値
    ///
    /// 読み込まれたモデル
    ///
    /// # エラー
    ///
    /// 以下の場合に[`BinyanError`]が返されます：
    ///
    /// - マジックバイトが一致しない場合
    /// - ペイロードのデコードに失敗した場合
    /// - ペイロードに重複した素性キーが含まれる場合
    pub fn read_model<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut magic = [0u8; MODEL_MAGIC_LEN];
        rdr.read_exact(&mut magic)?;
        if &magic[..] != MODEL_MAGIC {
            return Err(BinyanError::invalid_argument(
                "rdr",
                "Unrecognized magic bytes. The file is not a binyan model.",
            ));
        }
        let data: ModelData<F> =
            bincode::decode_from_std_read(&mut rdr, common::bincode_config())?;

        // A duplicate key would leave an orphaned store behind the rebuilt
        // index.
        {
            let mut seen = HashSet::with_capacity(data.snapshot.entries().len());
            for (feature, _) in data.snapshot.entries() {
                if !seen.insert(feature) {
                    return Err(BinyanError::invalid_format(
                        "rdr",
                        format!("Duplicate feature key in model payload: {feature}"),
                    ));
                }
            }
        }
        Ok(Self { data })
    }

    /// モデルを消費して重みテーブルを復元します。
    ///
    /// # 引数
    ///
    /// * `dense` - ストアのフレーバー
    ///
    /// # 戻り値
    ///
    /// スナップショット採取時の世代で復元されたテーブル
    #[must_use]
    pub fn into_weights(self, dense: bool) -> AveragedWeights<F> {
        AveragedWeights::from_snapshot(&self.data.snapshot, self.data.generation, dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Seek, SeekFrom};

    use crate::sync::WaitGroup;

    fn build_weights() -> AveragedWeights<String> {
        let weights = AveragedWeights::new(true);
        let wg = WaitGroup::new();
        wg.add(3);
        weights.add(1, 0, "w=בית".to_string(), 4, &wg);
        weights.add(2, 1, "w=בית".to_string(), 2, &wg);
        weights.add(2, 3, "p=VB".to_string(), -6, &wg);
        wg.wait();
        weights.integrate(4);
        weights.scalar_divide(4);
        weights
    }

    #[test]
    fn test_model_round_trip_in_memory() {
        let model = Model::from_weights(&build_weights(), 4);
        let mut buf = vec![];
        model.write_model(&mut buf).unwrap();
        assert!(buf.starts_with(MODEL_MAGIC));

        let restored = Model::read_model(&buf[..]).unwrap();
        assert_eq!(restored.generation(), 4);
        assert_eq!(restored.snapshot(), model.snapshot());

        let weights = restored.into_weights(true);
        assert_eq!(weights.value(0, &"w=בית".to_string()), 3);
        assert_eq!(weights.value(1, &"w=בית".to_string()), 1);
        assert_eq!(weights.value(3, &"p=VB".to_string()), -3);
    }

    #[test]
    fn test_read_model_rejects_unknown_magic() {
        let bogus = vec![b'x'; 64];
        let err = Model::<String>::read_model(&bogus[..]).unwrap_err();
        assert!(matches!(err, BinyanError::InvalidArgument(_)));
    }

    #[test]
    fn test_read_model_rejects_duplicate_feature_keys() {
        let model = Model {
            data: ModelData {
                generation: 1,
                snapshot: Snapshot::from_entries(vec![
                    ("A".to_string(), vec![1]),
                    ("A".to_string(), vec![2]),
                ]),
            },
        };
        let mut buf = vec![];
        model.write_model(&mut buf).unwrap();
        let err = Model::<String>::read_model(&buf[..]).unwrap_err();
        assert!(matches!(err, BinyanError::InvalidFormat(_)));
    }

    #[test]
    fn test_read_model_rejects_truncated_payload() {
        let model = Model::from_weights(&build_weights(), 4);
        let mut buf = vec![];
        model.write_model(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);
        let err = Model::<String>::read_model(&buf[..]).unwrap_err();
        assert!(matches!(err, BinyanError::BincodeDecode(_)));
    }

    #[test]
    fn test_model_file_round_trip() {
        let model = Model::from_weights(&build_weights(), 4);
        let mut file = tempfile::tempfile().unwrap();
        model.write_model(&mut file).unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();
        let restored = Model::read_model(&mut file).unwrap();
        assert_eq!(restored.generation(), 4);
        assert_eq!(restored.snapshot(), model.snapshot());
    }
}
