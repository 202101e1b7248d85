//! 内部ユーティリティ
//!
//! このモジュールは、遷移インデックスの型変換に使用される
//! ヘルパートレイトを提供します。

/// u32から他の型への変換を提供するトレイト
///
/// このトレイトは、u32値を実装型に変換する機能を定義します。
/// 標準ライブラリのFromトレイトとは異なり、
/// プラットフォーム固有の仮定に基づく最適化を行うことができます。
pub trait FromU32 {
    /// u32値から実装型を生成する
    ///
    /// # 引数
    ///
    /// * `src` - 変換元のu32値
    ///
    /// # 戻り値
    ///
    /// 変換された実装型の値
    fn from_u32(src: u32) -> Self;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl FromU32 for usize {
    /// u32値をusizeに変換する
    ///
    /// ポインタ幅が32ビットまたは64ビットであることが保証されているため、
    /// この変換は常に成功します。
    #[inline(always)]
    fn from_u32(src: u32) -> Self {
        // Since the pointer width is guaranteed to be 32 or 64,
        // the following process always succeeds.
        unsafe { Self::try_from(src).unwrap_unchecked() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u32() {
        assert_eq!(usize::from_u32(0), 0);
        assert_eq!(usize::from_u32(94), 94);
        assert_eq!(usize::from_u32(u32::MAX), u32::MAX as usize);
    }
}
