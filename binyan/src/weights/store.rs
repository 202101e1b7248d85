//! 素性ごとの遷移スコアストア
//!
//! このモジュールは、遷移インデックスから重みセルへのマッピングを提供します。
//! 遷移集合が小さく密な場合は配列ベースの[`DenseStore`]を、
//! 疎な場合はハッシュマップベースの[`SparseStore`]を使用します。
//!
//! ロック階層は2段階です。ストア構造(配列の伸長、キーの挿入)は
//! リーダー・ライターロックで保護し、既存スロットへの読み書きは
//! リードロックとスロットごとのミューテックスで直列化します。

use std::sync::{Mutex, RwLock};

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;

use crate::utils::FromU32;
use crate::weights::cell::WeightCell;

/// 密ストアの初期予約容量。
///
/// 遷移集合は通常この値に収まるため、小さいストアの再割り当てを避けます。
const DENSE_INITIAL_CAPACITY: usize = 94;

/// 遷移インデックスを添字とする密な配列ストア。
///
/// 配列は必要に応じて`transition + 1`の長さまで伸長されます。
/// 未書き込みのスロットは`is_set == false`のセルとして存在します。
pub struct DenseStore {
    slots: RwLock<Vec<Mutex<WeightCell>>>,
}

impl DenseStore {
    /// 指定された長さの未設定スロットを持つストアを作成します。
    ///
    /// # 引数
    ///
    /// * `len` - 初期のスロット数
    pub(crate) fn with_len(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len.max(DENSE_INITIAL_CAPACITY));
        slots.resize_with(len, || Mutex::new(WeightCell::default()));
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// 配列を長さ`transition + 1`まで伸長します。ライトロック保持中に呼ぶこと。
    fn extend_for(slots: &mut Vec<Mutex<WeightCell>>, transition: u32) {
        let needed = usize::from_u32(transition) + 1;
        if slots.len() < needed {
            slots.resize_with(needed, || Mutex::new(WeightCell::default()));
        }
    }

    /// 世代`generation`における更新としてスロットに`amount`を加算します。
    ///
    /// スロットが未設定の場合は新しいセルを作成します。
    /// 範囲外の遷移が指定された場合は配列を伸長します。
    pub fn add(&self, generation: u32, transition: u32, amount: i64) {
        let idx = usize::from_u32(transition);
        {
            let slots = self.slots.read().unwrap();
            if let Some(slot) = slots.get(idx) {
                Self::upsert(slot, generation, amount);
                return;
            }
        }
        let mut slots = self.slots.write().unwrap();
        Self::extend_for(&mut slots, transition);
        // The slot may have been created while the read lock was released.
        Self::upsert(&slots[idx], generation, amount);
    }

    fn upsert(slot: &Mutex<WeightCell>, generation: u32, amount: i64) {
        let mut cell = slot.lock().unwrap();
        if cell.is_set {
            cell.add(generation, amount);
        } else {
            *cell = WeightCell::new(generation, amount);
        }
    }

    /// スロットを無条件に上書きします。必要に応じて配列を伸長します。
    pub fn set_value(&self, transition: u32, cell: WeightCell) {
        let mut slots = self.slots.write().unwrap();
        Self::extend_for(&mut slots, transition);
        *slots[usize::from_u32(transition)].lock().unwrap() = cell;
    }

    /// 設定済みスロットのコピーを返します。
    ///
    /// # 戻り値
    ///
    /// スロットが存在して設定済みであれば`Some`、
    /// 範囲外または未設定であれば`None`
    pub fn get_value(&self, transition: u32) -> Option<WeightCell> {
        let slots = self.slots.read().unwrap();
        slots
            .get(usize::from_u32(transition))
            .map(|slot| *slot.lock().unwrap())
            .filter(|cell| cell.is_set)
    }

    /// 現在の配列長を返します。
    pub fn len(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    /// 配列が空かどうかを返します。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 全スロットを添字順に走査します。
    ///
    /// 未設定のスロットも列挙されるため、消費側は`is_set`を確認する
    /// 必要があります。添字を保存したままの走査を可能にするための仕様です。
    pub fn each(&self, mut f: impl FnMut(u32, WeightCell)) {
        let slots = self.slots.read().unwrap();
        for (i, slot) in slots.iter().enumerate() {
            let cell = *slot.lock().unwrap();
            f(u32::try_from(i).unwrap(), cell);
        }
    }

    /// 全スロットをロックしながらその場で変更します。
    pub(crate) fn update_each(&self, mut f: impl FnMut(&mut WeightCell)) {
        let slots = self.slots.read().unwrap();
        for slot in slots.iter() {
            f(&mut slot.lock().unwrap());
        }
    }

    /// 最大の添字を返します。配列が空の場合は`None`を返します。
    pub fn max_transition(&self) -> Option<u32> {
        let len = self.slots.read().unwrap().len();
        if len == 0 {
            None
        } else {
            Some(u32::try_from(len - 1).unwrap())
        }
    }
}

/// 遷移インデックスをキーとする疎なハッシュマップストア。
pub struct SparseStore {
    slots: RwLock<HashMap<u32, Mutex<WeightCell>>>,
}

impl SparseStore {
    /// 指定された容量を予約したストアを作成します。
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// 世代`generation`における更新としてスロットに`amount`を加算します。
    ///
    /// キーが存在しない場合は新しいセルを挿入します。
    pub fn add(&self, generation: u32, transition: u32, amount: i64) {
        {
            let slots = self.slots.read().unwrap();
            if let Some(slot) = slots.get(&transition) {
                slot.lock().unwrap().add(generation, amount);
                return;
            }
        }
        let mut slots = self.slots.write().unwrap();
        match slots.entry(transition) {
            // Another writer may have inserted the key while the read lock
            // was released.
            Entry::Occupied(e) => e.get().lock().unwrap().add(generation, amount),
            Entry::Vacant(e) => {
                e.insert(Mutex::new(WeightCell::new(generation, amount)));
            }
        }
    }

    /// スロットを無条件に上書きします。
    pub fn set_value(&self, transition: u32, cell: WeightCell) {
        self.slots
            .write()
            .unwrap()
            .insert(transition, Mutex::new(cell));
    }

    /// 設定済みスロットのコピーを返します。
    pub fn get_value(&self, transition: u32) -> Option<WeightCell> {
        let slots = self.slots.read().unwrap();
        slots
            .get(&transition)
            .map(|slot| *slot.lock().unwrap())
            .filter(|cell| cell.is_set)
    }

    /// 存在するキーの数を返します。
    pub fn len(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    /// ストアが空かどうかを返します。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 存在するスロットを走査します。順序は不定です。
    pub fn each(&self, mut f: impl FnMut(u32, WeightCell)) {
        let slots = self.slots.read().unwrap();
        for (&transition, slot) in slots.iter() {
            let cell = *slot.lock().unwrap();
            f(transition, cell);
        }
    }

    /// 存在するスロットをロックしながらその場で変更します。
    pub(crate) fn update_each(&self, mut f: impl FnMut(&mut WeightCell)) {
        let slots = self.slots.read().unwrap();
        for slot in slots.values() {
            f(&mut slot.lock().unwrap());
        }
    }

    /// 存在するキーの最大値を返します。空の場合は`None`を返します。
    pub fn max_transition(&self) -> Option<u32> {
        self.slots.read().unwrap().keys().max().copied()
    }
}

/// 遷移スコアストアのラッパー列挙型
///
/// 密・疎どちらの実装も同じ操作群を提供し、
/// 呼び出し側からは区別なく利用できます。
pub enum TransitionStore {
    Dense(DenseStore),
    Sparse(SparseStore),
}

impl TransitionStore {
    /// 遷移`transition`の初回書き込みに適したストアを作成します。
    ///
    /// 密ストアは`transition + 1`の長さで、疎ストアは小さい予約容量で
    /// 作成されます。
    pub(crate) fn for_transition(dense: bool, transition: u32) -> Self {
        if dense {
            Self::Dense(DenseStore::with_len(usize::from_u32(transition) + 1))
        } else {
            Self::Sparse(SparseStore::with_capacity(5))
        }
    }

    /// 既知のサイズを持つ空のストアを作成します。スナップショットの
    /// 復元時に使用されます。
    pub(crate) fn with_len(dense: bool, len: usize) -> Self {
        if dense {
            Self::Dense(DenseStore::with_len(len))
        } else {
            Self::Sparse(SparseStore::with_capacity(len))
        }
    }

    /// 世代`generation`における更新としてスロットに`amount`を加算します。
    pub fn add(&self, generation: u32, transition: u32, amount: i64) {
        match self {
            Self::Dense(s) => s.add(generation, transition, amount),
            Self::Sparse(s) => s.add(generation, transition, amount),
        }
    }

    /// スロットを無条件に上書きします。
    pub fn set_value(&self, transition: u32, cell: WeightCell) {
        match self {
            Self::Dense(s) => s.set_value(transition, cell),
            Self::Sparse(s) => s.set_value(transition, cell),
        }
    }

    /// 設定済みスロットのコピーを返します。
    pub fn get_value(&self, transition: u32) -> Option<WeightCell> {
        match self {
            Self::Dense(s) => s.get_value(transition),
            Self::Sparse(s) => s.get_value(transition),
        }
    }

    /// アドレス可能なスロット数を返します。
    ///
    /// 密ストアでは現在の配列長、疎ストアでは存在するキーの数です。
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(s) => s.len(),
            Self::Sparse(s) => s.len(),
        }
    }

    /// ストアが空かどうかを返します。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// スロットを走査します。
    ///
    /// 密ストアでは未設定のスロットも列挙されるため、
    /// 消費側は`is_set`を確認する必要があります。
    pub fn each(&self, f: impl FnMut(u32, WeightCell)) {
        match self {
            Self::Dense(s) => s.each(f),
            Self::Sparse(s) => s.each(f),
        }
    }

    /// スロットをロックしながらその場で変更します。
    pub(crate) fn update_each(&self, f: impl FnMut(&mut WeightCell)) {
        match self {
            Self::Dense(s) => s.update_each(f),
            Self::Sparse(s) => s.update_each(f),
        }
    }

    /// 設定済みの全スロットに対して
    /// [`WeightCell::integrate`]を適用します。
    ///
    /// # 引数
    ///
    /// * `generation` - 畳み込みの基準となる世代
    pub fn integrate(&self, generation: u32) {
        self.update_each(|cell| {
            if cell.is_set {
                cell.integrate(generation);
            }
        });
    }

    /// 最大の遷移インデックスを返します。空の場合は`None`を返します。
    pub fn max_transition(&self) -> Option<u32> {
        match self {
            Self::Dense(s) => s.max_transition(),
            Self::Sparse(s) => s.max_transition(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_grows_on_demand() {
        let store = TransitionStore::for_transition(true, 0);
        store.add(1, 50, 7);
        assert_eq!(store.len(), 51);
        assert_eq!(store.get_value(50).unwrap().value, 7);
        assert!(store.get_value(10).is_none());
        assert!(store.get_value(100).is_none());
    }

    #[test]
    fn test_dense_each_yields_unset_slots() {
        let store = TransitionStore::for_transition(true, 0);
        store.add(1, 3, 2);
        let mut yielded = 0;
        let mut set = 0;
        store.each(|_, cell| {
            yielded += 1;
            if cell.is_set {
                set += 1;
            }
        });
        assert_eq!(yielded, 4);
        assert_eq!(set, 1);
    }

    #[test]
    fn test_dense_upsert_merges_into_existing_cell() {
        let store = TransitionStore::for_transition(true, 2);
        store.add(1, 2, 3);
        store.add(3, 2, 2);
        let cell = store.get_value(2).unwrap();
        assert_eq!(cell.value, 5);
        assert_eq!(cell.integrated_value(5), 16);
    }

    #[test]
    fn test_dense_set_value_extends() {
        let store = DenseStore::with_len(0);
        store.set_value(2, WeightCell::new(10, 5));
        assert_eq!(store.len(), 3);
        assert_eq!(store.get_value(2).unwrap().value, 5);
        assert_eq!(store.max_transition(), Some(2));
    }

    #[test]
    fn test_sparse_upsert_and_len() {
        let store = TransitionStore::for_transition(false, 0);
        store.add(1, 50, 7);
        store.add(1, 3, 1);
        store.add(2, 50, -2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_value(50).unwrap().value, 5);
        assert_eq!(store.get_value(3).unwrap().value, 1);
        assert!(store.get_value(0).is_none());
        assert_eq!(store.max_transition(), Some(50));
    }

    #[test]
    fn test_sparse_each_visits_present_keys_only() {
        let store = TransitionStore::for_transition(false, 0);
        store.add(1, 9, 4);
        store.add(1, 1, 2);
        let mut seen = vec![];
        store.each(|transition, cell| {
            assert!(cell.is_set);
            seen.push((transition, cell.value));
        });
        seen.sort_unstable();
        assert_eq!(seen, vec![(1, 2), (9, 4)]);
    }

    #[test]
    fn test_integrate_touches_set_slots_only() {
        let store = TransitionStore::for_transition(true, 4);
        store.add(1, 4, 3);
        store.integrate(5);
        assert_eq!(store.get_value(4).unwrap().value, 12);
        let mut unset_values = vec![];
        store.each(|_, cell| {
            if !cell.is_set {
                unset_values.push(cell.value);
            }
        });
        assert!(unset_values.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_empty_store() {
        let store = TransitionStore::with_len(true, 0);
        assert!(store.is_empty());
        assert_eq!(store.max_transition(), None);
    }
}
