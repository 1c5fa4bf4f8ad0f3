//! 追踪标识符生成器
//!
//! 高64位为毫秒时间戳与机器ID，便于按时间排查；低64位完全随机。
//! 比例采样器按 trace-id 的低64位做判定，所以低位必须均匀分布。

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use opentelemetry::trace::{SpanId, TraceId};
use opentelemetry_sdk::trace::IdGenerator;

/// 机器ID，基于进程ID和启动时间戳生成，确保不同实例的ID不冲突
static MACHINE_ID: LazyLock<u16> = LazyLock::new(|| {
    let pid = std::process::id();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    ((pid ^ timestamp) & 0xFFFF) as u16
});

/// 基于 fastrand 的 ID 生成器
#[derive(Debug, Clone, Copy, Default)]
pub struct FastRandIdGenerator;

impl FastRandIdGenerator {
    /// 组合方式：timestamp(48位) + machine_id(16位) + random(64位)
    #[inline]
    fn trace_id_bits() -> u128 {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let high_64 = ((timestamp & 0xFFFF_FFFF_FFFF) << 16) | (*MACHINE_ID as u64);
        let low_64 = fastrand::u64(..);

        // 时钟异常时高位可能为零，低位兜底保证非全零
        let low_64 = if high_64 == 0 && low_64 == 0 { 1 } else { low_64 };
        ((high_64 as u128) << 64) | low_64 as u128
    }
}

impl IdGenerator for FastRandIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        TraceId::from_bytes(Self::trace_id_bits().to_be_bytes())
    }

    fn new_span_id(&self) -> SpanId {
        SpanId::from_bytes(fastrand::u64(1..).to_be_bytes())
    }
}
