use std::{
    collections::VecDeque,
    fmt::Debug,
    sync::Mutex,
    time::{Duration, Instant},
};

/// 带宽统计接口
///
/// 引擎在每次网络读写完成后上报字节数及其传输区间。
/// 统计不影响传输行为，限速由带宽占用百分比控制。
pub trait BandwidthMeter: Debug + Send + Sync {
    /// 上报收到的字节
    fn record_incoming(&self, bytes: u64, start: Instant, end: Instant);

    /// 上报发出的字节
    fn record_outgoing(&self, bytes: u64, start: Instant, end: Instant);
}

const RATE_WINDOW: Duration = Duration::from_secs(10);

/// 滑动窗口带宽统计
///
/// 保留最近十秒的上报记录，据此计算平均速率。
#[derive(Debug, Default)]
pub struct SimpleBandwidthMeter {
    incoming: Mutex<Window>,
    outgoing: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<(Instant, u64)>,
    total_bytes: u64,
}

impl Window {
    fn record(&mut self, bytes: u64, end: Instant) {
        self.samples.push_back((end, bytes));
        self.total_bytes += bytes;
        self.prune(end);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.duration_since(at) <= RATE_WINDOW {
                break;
            }
            self.total_bytes -= bytes;
            self.samples.pop_front();
        }
    }

    fn rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.total_bytes as f64 / RATE_WINDOW.as_secs_f64()
    }
}

impl SimpleBandwidthMeter {
    /// 创建带宽统计
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 最近窗口内的平均下行速率，单位字节每秒
    pub fn incoming_rate(&self) -> f64 {
        self.incoming.lock().unwrap().rate(Instant::now())
    }

    /// 最近窗口内的平均上行速率，单位字节每秒
    pub fn outgoing_rate(&self) -> f64 {
        self.outgoing.lock().unwrap().rate(Instant::now())
    }
}

impl BandwidthMeter for SimpleBandwidthMeter {
    fn record_incoming(&self, bytes: u64, _start: Instant, end: Instant) {
        self.incoming.lock().unwrap().record(bytes, end);
    }

    fn record_outgoing(&self, bytes: u64, _start: Instant, end: Instant) {
        self.outgoing.lock().unwrap().record(bytes, end);
    }
}
