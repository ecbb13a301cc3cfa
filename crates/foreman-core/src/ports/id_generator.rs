//! IdGenerator port - ID 生成の抽象化
//!
//! 自前で ID を作る必要がある adapter（in-memory の provisioner / delegator）
//! だけが使う。実際の provisioning 層は自分の ID を返す。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（時刻は `Clock` から取得）

use crate::domain::ContainerId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は container と task の ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（orchestrator の sub-cycle 間で共有）
pub trait IdGenerator: Send + Sync {
    fn generate_container_id(&self) -> ContainerId;

    /// 起動済み container に渡す task の ID を生成
    fn generate_task_id(&self) -> String;
}

/// ULID ベースの IdGenerator
///
/// # ULID の特性
/// - 時刻部分は注入された `Clock` から取る
/// - FixedClock でも prefix が同じになるだけで、ランダム部分で区別できる
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_container_id(&self) -> ContainerId {
        ContainerId::new(format!("ctr-{}", self.next().to_string().to_lowercase()))
    }

    fn generate_task_id(&self) -> String {
        format!("task-{}", self.next().to_string().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_container_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_container_id();
        let id2 = id_gen.generate_container_id();

        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("ctr-"));
        assert!(id_gen.generate_task_id().starts_with("task-"));
    }

    #[test]
    fn fixed_clock_fixes_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let a = id_gen.next();
        let b = id_gen.next();

        assert_ne!(a, b);
        assert_eq!(a.timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(b.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
