// Frame layouts. Keep these in sync with the glove firmware's sensor_frame.

use thiserror::Error;

pub const LIVE_FRAME_LEN: usize = 10;
pub const GLOVE_FRAME_LEN: usize = 60;
pub const GLOVE_FIELD_COUNT: usize = GLOVE_FRAME_LEN / 4;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: got {len} bytes, need at least {expected}")]
    TooShort { len: usize, expected: usize },

    #[error("frame length mismatch: got {len} bytes, expected {expected}")]
    LengthMismatch { len: usize, expected: usize },
}

/// Which frame layout the peripheral is sending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    /// Uptime followed by three signed 16-bit samples. Trailing bytes are ignored.
    Live,
    /// Uptime followed by fourteen unsigned 32-bit channels, exactly.
    Glove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorFrame {
    Live(LiveFrame),
    Glove(GloveFrame),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveFrame {
    pub t_s: u32,
    pub samples: [i16; 3],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GloveFrame {
    pub t_s: u32,
    pub flex: [u32; 5],
    pub accel: [u32; 3],
    pub gyro: [u32; 3],
    pub pitch: u32,
    pub roll: u32,
    pub yaw: u32,
}

impl FrameFormat {
    pub fn expected_len(&self) -> usize {
        match self {
            FrameFormat::Live => LIVE_FRAME_LEN,
            FrameFormat::Glove => GLOVE_FRAME_LEN,
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<SensorFrame, DecodeError> {
        match self {
            FrameFormat::Live => decode_live(payload).map(SensorFrame::Live),
            FrameFormat::Glove => decode_glove(payload).map(SensorFrame::Glove),
        }
    }
}

pub fn decode_live(payload: &[u8]) -> Result<LiveFrame, DecodeError> {
    let Some(frame) = payload.get(..LIVE_FRAME_LEN) else {
        return Err(DecodeError::TooShort {
            len: payload.len(),
            expected: LIVE_FRAME_LEN,
        });
    };
    let sample = |offset: usize| i16::from_le_bytes([frame[offset], frame[offset + 1]]);
    Ok(LiveFrame {
        t_s: u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]),
        samples: [sample(4), sample(6), sample(8)],
    })
}

pub fn decode_glove(payload: &[u8]) -> Result<GloveFrame, DecodeError> {
    if payload.len() != GLOVE_FRAME_LEN {
        return Err(DecodeError::LengthMismatch {
            len: payload.len(),
            expected: GLOVE_FRAME_LEN,
        });
    }
    let mut fields = [0u32; GLOVE_FIELD_COUNT];
    for (field, chunk) in fields.iter_mut().zip(payload.chunks_exact(4)) {
        *field = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(GloveFrame::from_fields(fields))
}

impl GloveFrame {
    pub fn from_fields(f: [u32; GLOVE_FIELD_COUNT]) -> Self {
        Self {
            t_s: f[0],
            flex: [f[1], f[2], f[3], f[4], f[5]],
            accel: [f[6], f[7], f[8]],
            gyro: [f[9], f[10], f[11]],
            pitch: f[12],
            roll: f[13],
            yaw: f[14],
        }
    }

    /// All fields in wire order, timestamp first.
    pub fn fields(&self) -> [u32; GLOVE_FIELD_COUNT] {
        let [f1, f2, f3, f4, f5] = self.flex;
        let [ax, ay, az] = self.accel;
        let [gx, gy, gz] = self.gyro;
        [
            self.t_s, f1, f2, f3, f4, f5, ax, ay, az, gx, gy, gz, self.pitch, self.roll, self.yaw,
        ]
    }
}
