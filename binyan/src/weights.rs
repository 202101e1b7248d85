//! 平均化された素性重みテーブル
//!
//! このモジュールは、オンライン構造化学習(大マージン平均化パーセプトロン)の
//! 中核となる重みストアを提供します。テーブルは(素性, 遷移)ペアを添字とする
//! スカラー重みを蓄積し、遅延平均スキームによって任意の世代における
//! 重みの生涯平均を復元できます。
//!
//! # ロック階層
//!
//! ロックは常に上から下の順で取得されます。
//!
//! 1. テーブル外側のリーダー・ライターロック。構造の変更(新しい素性の登録)は
//!    ライター側、それ以外のすべての操作はリーダー側を取得します。
//! 2. ストアごとのリーダー・ライターロック。伸長・挿入はライター側、
//!    既存スロットへの点更新はリーダー側です。
//! 3. スロットごとのミューテックス。更新則のread-modify-writeを直列化します。
//!
//! # ライフサイクル
//!
//! テーブルは空の状態で作成され、学習中は多数の[`AveragedWeights::add`]で
//! 更新されます。学習終了後、[`AveragedWeights::integrate`]で積分値へ変換し、
//! [`AveragedWeights::scalar_divide`]で世代数により平均化したあと、
//! スナップショットとして永続化されます。積分後に学習を再開することは
//! できません。

mod cell;
mod score;
mod store;

use std::fmt;
use std::hash::Hash;
use std::sync::RwLock;

use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;

use crate::sync::WaitGroup;
use crate::utils::FromU32;
pub use crate::weights::cell::WeightCell;
pub use crate::weights::score::{ScoreAccumulator, ScoreVector};
pub use crate::weights::store::{DenseStore, SparseStore, TransitionStore};

/// 素性キーの要件を定義するトレイト
///
/// 素性キーは等価比較とハッシュ化が可能で、シリアライゼーション順序を
/// 決定するための正準文字列形([`fmt::Display`])を持つ必要があります。
/// 要件を満たす型にはブランケット実装が提供されます。
pub trait Feature: Clone + Eq + Hash + fmt::Display + Encode + Decode<()> {}

impl<T> Feature for T where T: Clone + Eq + Hash + fmt::Display + Encode + Decode<()> {}

struct TableInner<F> {
    /// 素性キーからストア列へのオフセットを引くインデックス。
    /// オフセットは追記専用であり、一度割り当てられたら変化しません。
    index: HashMap<F, usize>,

    stores: Vec<TransitionStore>,
}

/// 平均化された素性重みテーブル。
///
/// 素性キーごとに1つの[`TransitionStore`]を所有し、
/// 学習器からの点更新、デコード時のスコア集計、遅延平均の復元、
/// およびスナップショットによる永続化を提供します。
///
/// すべての操作は`&self`で行われ、複数のワーカースレッドから
/// 並行に呼び出すことができます。
pub struct AveragedWeights<F> {
    /// 新しいストアを密(配列)として作成するかどうか
    dense: bool,

    inner: RwLock<TableInner<F>>,
}

impl<F: Feature> AveragedWeights<F> {
    /// 新しい空のテーブルを作成します。
    ///
    /// # 引数
    ///
    /// * `dense` - `true`の場合、素性ごとのストアを密な配列として作成します。
    ///   遷移集合が小さい(おおむね100未満の)場合に適しています。
    ///   `false`の場合は疎なハッシュマップを使用します。
    #[must_use]
    pub fn new(dense: bool) -> Self {
        Self {
            dense,
            inner: RwLock::new(TableInner {
                index: HashMap::with_capacity(100),
                stores: Vec::with_capacity(100),
            }),
        }
    }

    /// ストアが密フレーバーで作成されるかどうかを返します。
    pub fn is_dense(&self) -> bool {
        self.dense
    }

    /// 登録されている素性の数を返します。
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().index.len()
    }

    /// テーブルが空かどうかを返します。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 素性キーに割り当てられたオフセットを返します。
    ///
    /// オフセットは素性の初見時に割り当てられ、以後変化しません。
    /// 未登録の素性に対しては`None`を返します。
    pub fn offset_of(&self, feature: &F) -> Option<usize> {
        self.inner.read().unwrap().index.get(feature).copied()
    }

    /// (素性, 遷移)セルの現在の重みを返します。
    ///
    /// 素性が未登録、遷移が範囲外、またはスロットが未設定の場合は
    /// 0を返します。これらはエラーではなく、疎な素性空間では
    /// 最も頻繁なケースです。
    pub fn value(&self, transition: u32, feature: &F) -> i64 {
        let inner = self.inner.read().unwrap();
        if let Some(&offset) = inner.index.get(feature) {
            if let Some(cell) = inner.stores[offset].get_value(transition) {
                return cell.value;
            }
        }
        0
    }

    /// 世代`generation`における更新として(素性, 遷移)セルに
    /// `amount`を加算します。
    ///
    /// 素性が既知の場合は外側のリードロックの下で既存ストアに
    /// 点更新をディスパッチします。未知の場合はライトロックを取得して
    /// 新しいストアを作成し、オフセットを割り当てます。
    /// どちらの経路でも、完了時に`wg`の[`done`](WaitGroup::done)を
    /// 正確に1回呼び出します。呼び出し側はこの呼び出しの前に
    /// [`add`](WaitGroup::add)でカウントを増やしておく必要があります。
    ///
    /// # 引数
    ///
    /// * `generation` - 更新が発生した世代
    /// * `transition` - 遷移インデックス
    /// * `feature` - 素性キー
    /// * `amount` - 加算量
    /// * `wg` - 更新の一括完了を待ち合わせるバリア
    pub fn add(&self, generation: u32, transition: u32, feature: F, amount: i64, wg: &WaitGroup) {
        {
            let inner = self.inner.read().unwrap();
            if let Some(&offset) = inner.index.get(&feature) {
                inner.stores[offset].add(generation, transition, amount);
                wg.done();
                return;
            }
        }
        let mut inner = self.inner.write().unwrap();
        let TableInner { index, stores } = &mut *inner;
        match index.entry(feature) {
            // Another writer may have registered the feature while the read
            // lock was released.
            Entry::Occupied(e) => {
                stores[*e.get()].add(generation, transition, amount);
            }
            Entry::Vacant(e) => {
                let store = TransitionStore::for_transition(self.dense, transition);
                store.set_value(transition, WeightCell::new(generation, amount));
                e.insert(stores.len());
                stores.push(store);
            }
        }
        wg.done();
    }

    /// すべてのストアの設定済みスロットを積分値へ変換します。
    ///
    /// 学習終了後の静止フェーズで1回だけ呼び出してください。
    /// この操作のあとに[`add`](Self::add)を混在させることはできません。
    ///
    /// # 引数
    ///
    /// * `generation` - 畳み込みの基準となる世代
    pub fn integrate(&self, generation: u32) {
        let inner = self.inner.read().unwrap();
        for store in &inner.stores {
            store.integrate(generation);
        }
    }

    /// 素性のストアを集計器に畳み込みます。
    ///
    /// 未登録の素性に対しては何もしません。
    ///
    /// # 引数
    ///
    /// * `feature` - 素性キー
    /// * `scores` - 集計先
    /// * `integrated` - `true`の場合は積分値を加算します
    pub fn set_scores<S>(&self, feature: &F, scores: &mut S, integrated: bool)
    where
        S: ScoreAccumulator,
    {
        let inner = self.inner.read().unwrap();
        if let Some(&offset) = inner.index.get(feature) {
            scores.inc_all(&inner.stores[offset], integrated);
        }
    }

    /// すべてのスロットの重みを`by`で整数除算します。
    ///
    /// 積分後の`value`を世代数で割り、生涯平均へ変換するための
    /// 最終ステップです。外側のロックはリーダー側のみを取得します。
    /// 外側のロックが保護するのは`index`とストア列の構造だけであり、
    /// スロット内容の排他はスロットミューテックスが担うためです。
    ///
    /// # 引数
    ///
    /// * `by` - 除数
    ///
    /// # パニック
    ///
    /// `by`が0の場合、パニックします。
    pub fn scalar_divide(&self, by: i64) {
        assert!(by != 0, "attempted to divide weights by zero");
        let inner = self.inner.read().unwrap();
        for store in &inner.stores {
            store.update_each(|cell| cell.value /= by);
        }
    }

    /// 現在の重みのスナップショットを作成します。
    ///
    /// 素性キーは正準文字列形でソートされ、再現性のある出力を
    /// 生成します。各素性のベクトルは遷移インデックスを添字とし、
    /// 未設定のスロットは0になります。
    pub fn snapshot(&self) -> Snapshot<F> {
        let inner = self.inner.read().unwrap();
        let mut keys: Vec<(String, &F, usize)> = inner
            .index
            .iter()
            .map(|(feature, &offset)| (feature.to_string(), feature, offset))
            .collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        let mut entries = Vec::with_capacity(keys.len());
        for (_, feature, offset) in keys {
            let store = &inner.stores[offset];
            let len = store.max_transition().map_or(0, |t| usize::from_u32(t) + 1);
            let mut scores = vec![0; len];
            store.each(|transition, cell| {
                if cell.is_set {
                    scores[usize::from_u32(transition)] = cell.value;
                }
            });
            entries.push((feature.clone(), scores));
        }
        Snapshot { entries }
    }

    /// スナップショットから世代`generation`のテーブルを復元します。
    ///
    /// 素性キーは正準文字列形の順で登録され、`index`とストア列は
    /// 一から再構築されます。ベクトルの各位置は世代`generation`で
    /// 作成された設定済みセルになります。
    ///
    /// # 引数
    ///
    /// * `snapshot` - 復元元のスナップショット
    /// * `generation` - 復元先の世代
    /// * `dense` - ストアのフレーバー
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot<F>, generation: u32, dense: bool) -> Self {
        let mut order: Vec<usize> = (0..snapshot.entries.len()).collect();
        order.sort_by_key(|&i| snapshot.entries[i].0.to_string());
        let mut index = HashMap::with_capacity(snapshot.entries.len());
        let mut stores = Vec::with_capacity(snapshot.entries.len());
        for i in order {
            let (feature, scores) = &snapshot.entries[i];
            let store = TransitionStore::with_len(dense, scores.len());
            for (transition, &value) in scores.iter().enumerate() {
                store.set_value(
                    u32::try_from(transition).unwrap(),
                    WeightCell::new(generation, value),
                );
            }
            index.insert(feature.clone(), stores.len());
            stores.push(store);
        }
        Self {
            dense,
            inner: RwLock::new(TableInner { index, stores }),
        }
    }
}

impl<F: Feature> fmt::Display for AveragedWeights<F> {
    /// 登録済みの素性とオフセットを1行ずつ列挙します。デバッグ用です。
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.read().unwrap();
        let mut lines: Vec<String> = inner
            .index
            .iter()
            .map(|(feature, offset)| format!("{feature} {offset}"))
            .collect();
        lines.sort_unstable();
        write!(f, "{}", lines.join("\n"))
    }
}

/// 重みテーブルの可搬なスナップショット。
///
/// 素性キーから遷移ごとの重みベクトルへのマッピングを、
/// 正準文字列形でソートされた順序で保持します。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot<F> {
    entries: Vec<(F, Vec<i64>)>,
}

impl<F> Snapshot<F> {
    /// エントリ列からスナップショットを作成します。
    #[must_use]
    pub fn from_entries(entries: Vec<(F, Vec<i64>)>) -> Self {
        Self { entries }
    }

    /// エントリ列を返します。
    pub fn entries(&self) -> &[(F, Vec<i64>)] {
        &self.entries
    }
}

impl<F: Encode> Encode for Snapshot<F> {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.entries.encode(encoder)
    }
}

impl<Context, F: Decode<Context>> Decode<Context> for Snapshot<F> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Self {
            entries: Vec::decode(decoder)?,
        })
    }
}
