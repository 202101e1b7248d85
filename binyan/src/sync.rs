//! 並行更新のための同期プリミティブ
//!
//! このモジュールは、複数のワーカースレッドから発行される更新の完了を
//! 待ち合わせるためのカウンティングバリアを提供します。

use std::sync::{Condvar, Mutex};

/// カウンティングバリア。
///
/// 呼び出し側は作業を発行する前に[`add`](Self::add)でカウントを増やし、
/// 各作業の完了時に[`done`](Self::done)でカウントを減らします。
/// [`wait`](Self::wait)はカウントがゼロに戻るまでブロックします。
///
/// 学習ループが世代を進める前に、その世代で発行した更新の一括完了を
/// 待ち合わせる用途を想定しています。
/// [`AveragedWeights::add`](crate::weights::AveragedWeights::add)は
/// 呼び出し1回につき正確に1回[`done`](Self::done)を呼び出します。
pub struct WaitGroup {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WaitGroup {
    /// カウントが0の新しいバリアを作成します。
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            zero: Condvar::new(),
        }
    }

    /// 保留中の作業数を`n`だけ増やします。
    ///
    /// # 引数
    ///
    /// * `n` - 追加する作業数
    pub fn add(&self, n: usize) {
        *self.count.lock().unwrap() += n;
    }

    /// 作業1件の完了を通知します。
    ///
    /// # パニック
    ///
    /// カウントがすでに0の場合、パニックします。
    pub fn done(&self) {
        let mut count = self.count.lock().unwrap();
        if *count == 0 {
            panic!("done() called on a zero counter");
        }
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// カウントが0になるまで現在のスレッドをブロックします。
    ///
    /// カウントがすでに0の場合は即座に戻ります。
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.zero.wait(count).unwrap();
        }
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_wait_for_workers() {
        let wg = WaitGroup::new();
        let finished = AtomicUsize::new(0);
        wg.add(4);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    finished.fetch_add(1, Ordering::SeqCst);
                    wg.done();
                });
            }
            wg.wait();
            assert_eq!(finished.load(Ordering::SeqCst), 4);
        });
    }

    #[test]
    fn test_wait_on_idle_barrier() {
        let wg = WaitGroup::new();
        wg.wait();
    }

    #[test]
    #[should_panic]
    fn test_done_without_add() {
        let wg = WaitGroup::new();
        wg.done();
    }
}
