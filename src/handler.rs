use crate::csvlog::CsvSink;
use crate::protocol::{self, DecodeError, FrameFormat, GloveFrame, LiveFrame};
use crate::session::SessionFlags;
use log::{debug, error};

/// What happened to a single notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Printed,
    /// Decoded fine, but the session wasn't listening yet.
    Suppressed,
    Logged,
    Rejected,
    WriteFailed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandlerStats {
    pub received: u64,
    pub rejected: u64,
    pub displayed: u64,
    pub logged: u64,
    pub write_failures: u64,
}

enum Route {
    Console,
    Csv(CsvSink),
}

pub struct NotificationHandler {
    route: Route,
    stats: HandlerStats,
}

impl NotificationHandler {
    /// Prints live frames to the console.
    pub fn live() -> Self {
        Self {
            route: Route::Console,
            stats: HandlerStats::default(),
        }
    }

    /// Appends every glove frame to `sink`.
    pub fn logger(sink: CsvSink) -> Self {
        Self {
            route: Route::Csv(sink),
            stats: HandlerStats::default(),
        }
    }

    pub fn format(&self) -> FrameFormat {
        match self.route {
            Route::Console => FrameFormat::Live,
            Route::Csv(_) => FrameFormat::Glove,
        }
    }

    pub fn stats(&self) -> HandlerStats {
        self.stats
    }

    pub async fn on_notify(&mut self, payload: &[u8], flags: &SessionFlags) -> Delivery {
        self.stats.received += 1;
        debug!("Received BLE payload: {}", hex::encode(payload));

        let delivery = match &self.route {
            Route::Console => match protocol::decode_live(payload) {
                Ok(frame) if flags.listening => {
                    println!("{}", format_live(&frame));
                    Delivery::Printed
                }
                Ok(_) => Delivery::Suppressed,
                Err(e) => reject(payload, e),
            },
            Route::Csv(sink) => match protocol::decode_glove(payload) {
                Ok(frame) => log_frame(sink, &frame).await,
                Err(e) => reject(payload, e),
            },
        };

        match delivery {
            Delivery::Printed => self.stats.displayed += 1,
            Delivery::Logged => self.stats.logged += 1,
            Delivery::Rejected => self.stats.rejected += 1,
            Delivery::WriteFailed => self.stats.write_failures += 1,
            Delivery::Suppressed => {}
        }
        delivery
    }
}

fn reject(payload: &[u8], e: DecodeError) -> Delivery {
    debug!("{e}");
    println!("{}", format_rejected(payload));
    Delivery::Rejected
}

async fn log_frame(sink: &CsvSink, frame: &GloveFrame) -> Delivery {
    match sink.append_row(frame).await {
        Ok(()) => {
            println!("Logged frame t={} s", frame.t_s);
            Delivery::Logged
        }
        Err(e) => {
            error!("Writing to {} failed: {e}", sink.path().display());
            eprintln!("Could not write frame t={} s: {e}", frame.t_s);
            Delivery::WriteFailed
        }
    }
}

pub fn format_live(frame: &LiveFrame) -> String {
    let [s0, s1, s2] = frame.samples;
    format!("t={:>4} s | s0={s0:>6} s1={s1:>6} s2={s2:>6}", frame.t_s)
}

pub fn format_glove(frame: &GloveFrame) -> String {
    format!(
        "t={:>4} s | flex={:?} accel={:?} gyro={:?} pitch={} roll={} yaw={}",
        frame.t_s, frame.flex, frame.accel, frame.gyro, frame.pitch, frame.roll, frame.yaw
    )
}

pub fn format_rejected(payload: &[u8]) -> String {
    format!("Notify ({}B): {}", payload.len(), hex::encode(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::GLOVE_FRAME_LEN;
    use std::path::PathBuf;

    const LISTENING: SessionFlags = SessionFlags {
        listening: true,
        disconnected: false,
    };

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("aslglove-{tag}-{:016x}.csv", rand::random::<u64>()))
    }

    #[test]
    fn test_format_live() {
        let frame = LiveFrame {
            t_s: 10,
            samples: [1, 2, -256],
        };
        assert_eq!(
            format_live(&frame),
            "t=  10 s | s0=     1 s1=     2 s2=  -256"
        );
    }

    #[test]
    fn test_format_rejected() {
        assert_eq!(format_rejected(&[0xde, 0xad, 0x01]), "Notify (3B): dead01");
    }

    #[tokio::test]
    async fn test_live_waits_for_listening() {
        let payload = [0x0a, 0, 0, 0, 1, 0, 2, 0, 0xff, 0];
        let mut handler = NotificationHandler::live();

        let idle = SessionFlags::default();
        assert_eq!(handler.on_notify(&payload, &idle).await, Delivery::Suppressed);
        assert_eq!(handler.on_notify(&payload, &LISTENING).await, Delivery::Printed);

        let stats = handler.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.displayed, 1);
    }

    #[tokio::test]
    async fn test_live_rejects_short_frames() {
        let mut handler = NotificationHandler::live();
        assert_eq!(handler.on_notify(&[1, 2, 3], &LISTENING).await, Delivery::Rejected);
        assert_eq!(handler.on_notify(&[], &LISTENING).await, Delivery::Rejected);
        assert_eq!(handler.stats().rejected, 2);
    }

    #[tokio::test]
    async fn test_logger_writes_only_valid_frames() {
        let path = scratch_path("handler");
        let sink = CsvSink::new(&path);
        sink.ensure_header().await.unwrap();
        let mut handler = NotificationHandler::logger(sink);

        // The logger doesn't care whether the session is listening yet.
        let idle = SessionFlags::default();
        let mut good = [0u8; GLOVE_FRAME_LEN];
        good[0] = 42;
        assert_eq!(handler.on_notify(&good, &idle).await, Delivery::Logged);
        assert_eq!(handler.on_notify(&good[..59], &idle).await, Delivery::Rejected);
        assert_eq!(handler.on_notify(&[0u8; 61], &idle).await, Delivery::Rejected);
        assert_eq!(handler.on_notify(&[0u8; GLOVE_FRAME_LEN], &idle).await, Delivery::Logged);

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "42,0,0,0,0,0,0,0,0,0,0,0,0,0,0");
        assert_eq!(lines[2], "0,0,0,0,0,0,0,0,0,0,0,0,0,0,0");

        let stats = handler.stats();
        assert_eq!((stats.logged, stats.rejected), (2, 2));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn test_route_picks_frame_format() {
        assert_eq!(NotificationHandler::live().format(), FrameFormat::Live);
        let logger = NotificationHandler::logger(CsvSink::new(scratch_path("format")));
        assert_eq!(logger.format(), FrameFormat::Glove);
    }

    #[tokio::test]
    async fn test_live_accepts_longer_frames() {
        // A 60-byte glove frame still carries a valid live prefix.
        let mut handler = NotificationHandler::live();
        let frame = [0u8; GLOVE_FRAME_LEN];
        assert_eq!(handler.on_notify(&frame, &LISTENING).await, Delivery::Printed);
        assert_eq!(handler.stats().displayed, 1);
    }

    #[tokio::test]
    async fn test_logger_survives_write_failure() {
        let dir = std::env::temp_dir()
            .join(format!("aslglove-missing-{:016x}", rand::random::<u64>()));
        let mut handler = NotificationHandler::logger(CsvSink::new(dir.join("log.csv")));
        let frame = [0u8; GLOVE_FRAME_LEN];
        assert_eq!(handler.on_notify(&frame, &LISTENING).await, Delivery::WriteFailed);
        assert_eq!(handler.on_notify(&frame, &LISTENING).await, Delivery::WriteFailed);
        assert_eq!(handler.stats().write_failures, 2);
    }
}
