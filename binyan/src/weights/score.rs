//! デコード時のスコア集計
//!
//! このモジュールは、有効な素性のストアを遷移ごとのスコアベクトルへ
//! 畳み込むための集計器を定義します。

use crate::utils::FromU32;
use crate::weights::store::TransitionStore;

/// スコア集計器の能力を定義するトレイト
///
/// デコーダーは遷移ごとのスコアを保持する集計器を用意し、
/// 有効な素性ごとに
/// [`AveragedWeights::set_scores`](crate::weights::AveragedWeights::set_scores)
/// を通じてストアを畳み込みます。
/// 集計器は自身のインデックス管理に責任を持ち、
/// 遭遇した最大の遷移インデックスに合わせて自動的に拡張される必要があります。
pub trait ScoreAccumulator {
    /// ストア内のすべての設定済みスロットを集計に加算します。
    ///
    /// # 引数
    ///
    /// * `store` - 畳み込む対象のストア
    /// * `integrated` - `true`の場合は積分値を、`false`の場合は現在の重みを加算する
    fn inc_all(&mut self, store: &TransitionStore, integrated: bool);
}

/// 遷移インデックスを添字とするスコアベクトル。
///
/// 積分値の計算に使用する問い合わせ世代を保持します。
pub struct ScoreVector {
    scores: Vec<i64>,
    generation: u32,
}

impl ScoreVector {
    /// 指定された問い合わせ世代を持つ空のベクトルを作成します。
    ///
    /// # 引数
    ///
    /// * `generation` - 積分値の計算に使用する世代
    #[must_use]
    pub fn new(generation: u32) -> Self {
        Self {
            scores: vec![],
            generation,
        }
    }

    /// 遷移`transition`の現在のスコアを返します。
    ///
    /// まだ集計されていない遷移に対しては0を返します。
    pub fn get(&self, transition: u32) -> i64 {
        self.scores
            .get(usize::from_u32(transition))
            .copied()
            .unwrap_or(0)
    }

    /// 集計済みのスコア列を返します。
    pub fn scores(&self) -> &[i64] {
        &self.scores
    }

    /// 問い合わせ世代を返します。
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl ScoreAccumulator for ScoreVector {
    fn inc_all(&mut self, store: &TransitionStore, integrated: bool) {
        store.each(|transition, cell| {
            if !cell.is_set {
                return;
            }
            let idx = usize::from_u32(transition);
            if self.scores.len() <= idx {
                self.scores.resize(idx + 1, 0);
            }
            self.scores[idx] += if integrated {
                cell.integrated_value(self.generation)
            } else {
                cell.value
            };
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_store() -> TransitionStore {
        let store = TransitionStore::for_transition(true, 0);
        store.add(1, 0, 3);
        store.add(1, 2, 5);
        store
    }

    #[test]
    fn test_inc_all_raw_values() {
        let store = build_store();
        let mut scores = ScoreVector::new(4);
        scores.inc_all(&store, false);
        assert_eq!(scores.scores(), &[3, 0, 5]);
    }

    #[test]
    fn test_inc_all_integrated_values() {
        let store = build_store();
        let mut scores = ScoreVector::new(4);
        scores.inc_all(&store, true);
        // each weight held over [1, 4)
        assert_eq!(scores.scores(), &[9, 0, 15]);
    }

    #[test]
    fn test_inc_all_accumulates_across_stores() {
        let other = TransitionStore::for_transition(true, 0);
        other.add(1, 1, 2);
        other.add(1, 5, 1);

        let mut scores = ScoreVector::new(1);
        scores.inc_all(&build_store(), false);
        scores.inc_all(&other, false);
        assert_eq!(scores.scores(), &[3, 2, 5, 0, 0, 1]);
        assert_eq!(scores.get(5), 1);
        assert_eq!(scores.get(100), 0);
    }
}
