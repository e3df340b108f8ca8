use std::time::Duration;

// 带宽占用 95% 时，额外等待时长是传输时长的 (100-95)/95 倍。
pub(crate) fn multiplier_from_percent(percent: u32) -> f64 {
    let percent = percent.clamp(1, 100) as f64;
    (100.0 - percent) / percent
}

/// 按带宽占用百分比推迟下一次读写
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacer {
    multiplier: f64,
}

impl Pacer {
    pub(crate) fn new(percent: u32) -> Self {
        Self {
            multiplier: multiplier_from_percent(percent),
        }
    }

    pub(crate) fn delay_for(&self, io_duration: Duration) -> Duration {
        if self.multiplier <= 0.0 {
            Duration::ZERO
        } else {
            io_duration.mul_f64(self.multiplier)
        }
    }
}
