//! 重みセル
//!
//! このモジュールは、1つの(素性, 遷移)ペアに対応する重みと、
//! その生涯平均を遅延計算するための履歴情報を定義します。

/// 遅延平均の履歴情報を持つ重みセル。
///
/// 平均化パーセプトロンでは、最終モデルとして重みの時間平均を使用します。
/// このセルは、過去のすべての値を保存する代わりに、値が一定だった閉区間の
/// 積分和`total`と、現在の値が設定された世代`generation`だけを保持します。
/// 任意の問い合わせ世代`g >= generation`における積分値は
/// `total + (g - generation) * value`で復元できます。
///
/// このセル自体はロックを持ちません。並行更新に対する排他制御は、
/// セルを保持するストア側のスロットミューテックスが担います。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WeightCell {
    /// 現在の重み
    pub value: i64,

    /// 閉区間の積分和
    pub total: i64,

    /// `value`が最後に変化した世代
    pub generation: u32,

    /// 1つ前に`value`が変化した世代
    pub prev_generation: u32,

    /// このセルに一度でも書き込みがあったかどうか
    pub is_set: bool,
}

impl WeightCell {
    /// 指定された世代と初期値を持つ新しいセルを作成します。
    ///
    /// # 引数
    ///
    /// * `generation` - セルが作成された世代
    /// * `value` - 初期の重み
    #[inline(always)]
    pub fn new(generation: u32, value: i64) -> Self {
        Self {
            value,
            total: 0,
            generation,
            prev_generation: 0,
            is_set: true,
        }
    }

    /// 世代`generation`における更新として`amount`を加算します。
    ///
    /// 現在の値が少なくとも1世代のあいだ保持されていた場合のみ
    /// (`prev_generation < generation`)、閉区間を`total`に畳み込みます。
    /// 同一世代内で複数回呼び出された場合に区間を二重計上しないための
    /// 条件であり、この判定は変更してはなりません。
    ///
    /// # 引数
    ///
    /// * `generation` - 更新が発生した世代。セルの現在の世代以上であること
    /// * `amount` - 加算量
    pub fn add(&mut self, generation: u32, amount: i64) {
        if self.prev_generation < self.generation {
            self.total += i64::from(generation - self.generation) * self.value;
        }
        if self.generation < generation {
            self.prev_generation = self.generation;
            self.generation = generation;
        }
        self.value += amount;
    }

    /// 保留中の開区間を畳み込み、`value`を積分値で置き換えます。
    ///
    /// 学習終了後にストアを推論用に変換するための破壊的操作です。
    /// 呼び出し後の`total`と`generation`の内容は未規定であり、
    /// この操作のあとに[`add`](Self::add)を混在させることはできません。
    ///
    /// # 引数
    ///
    /// * `generation` - 畳み込みの基準となる世代
    pub fn integrate(&mut self, generation: u32) {
        self.value = self.integrated_value(generation);
    }

    /// 世代`generation`における積分値を返します。
    ///
    /// セルの状態は変更しません。
    ///
    /// # 引数
    ///
    /// * `generation` - 問い合わせ世代。セルの現在の世代以上であること
    ///
    /// # 戻り値
    ///
    /// `total + (generation - self.generation) * value`
    #[inline(always)]
    pub fn integrated_value(&self, generation: u32) -> i64 {
        self.total + i64::from(generation - self.generation) * self.value
    }
}
