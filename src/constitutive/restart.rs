use super::cap_pressure::{HysteresisError, HysteresisMode, HysteresisState, MODES_PER_ELEMENT};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use thiserror::Error;

/// Leading bytes of a hysteresis checkpoint
pub const RESTART_MAGIC: &[u8; 4] = b"HYST";

pub const RESTART_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8 + 4 + 4;

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("unable to access hysteresis checkpoint: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a hysteresis checkpoint (or an unsupported version {0})")]
    BadHeader(u32),
    #[error("hysteresis checkpoint is truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("hysteresis checkpoint header announces {elements} elements with {phases} phases, more than can be addressed")]
    Oversized { elements: u64, phases: u32 },
    #[error("hysteresis checkpoint stores {found} modes per element instead of {expected}")]
    ModeLayout { expected: usize, found: usize },
    #[error(transparent)]
    State(#[from] HysteresisError),
}

impl HysteresisState {
    /// Serialize the modes and historical extrema, big-endian:
    ///
    /// ```text
    /// "HYST" | version: u32 | elements: u64 | phases: u32 | modes per element: u32
    /// modes: i32 x (elements * modes per element)
    /// min historical: f64 x (elements * phases)
    /// max historical: f64 x (elements * phases)
    /// ```
    pub fn to_bytes(&self) -> Bytes {
        let num_values = self.min_historical_vol_fraction.len();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.modes.len() * 4 + num_values * 16);

        buf.put(&RESTART_MAGIC[..]);
        buf.put_u32(RESTART_VERSION);
        buf.put_u64(self.num_elements() as u64);
        buf.put_u32(self.num_phases() as u32);
        buf.put_u32(MODES_PER_ELEMENT as u32);

        for &mode in self.modes.iter() {
            buf.put_i32(mode as i32);
        }
        for &s in self.min_historical_vol_fraction.iter() {
            buf.put_f64(s);
        }
        for &s in self.max_historical_vol_fraction.iter() {
            buf.put_f64(s);
        }

        buf.freeze()
    }

    pub fn from_bytes(mut buf: impl Buf) -> Result<Self, RestartError> {
        check_remaining(&buf, HEADER_LEN)?;

        let mut magic = [0; 4];
        buf.copy_to_slice(&mut magic);
        let version = buf.get_u32();
        if &magic != RESTART_MAGIC || version != RESTART_VERSION {
            return Err(RestartError::BadHeader(version));
        }

        let raw_elements = buf.get_u64();
        let raw_phases = buf.get_u32();
        let modes_per_element = buf.get_u32() as usize;
        if modes_per_element != MODES_PER_ELEMENT {
            return Err(RestartError::ModeLayout {
                expected: MODES_PER_ELEMENT,
                found: modes_per_element,
            });
        }

        let oversized = || RestartError::Oversized {
            elements: raw_elements,
            phases: raw_phases,
        };
        let num_elements = usize::try_from(raw_elements).map_err(|_| oversized())?;
        let num_phases = raw_phases as usize;

        let num_modes = num_elements.checked_mul(MODES_PER_ELEMENT).ok_or_else(oversized)?;
        let num_values = num_elements.checked_mul(num_phases).ok_or_else(oversized)?;
        let num_bytes = num_modes
            .checked_mul(4)
            .zip(num_values.checked_mul(16))
            .and_then(|(modes, values)| modes.checked_add(values))
            .ok_or_else(oversized)?;
        check_remaining(&buf, num_bytes)?;

        let modes = (0..num_modes)
            .map(|_| HysteresisMode::try_from(buf.get_i32()))
            .collect::<Result<Vec<_>, _>>()?;
        let min_historical = (0..num_values).map(|_| buf.get_f64()).collect();
        let max_historical = (0..num_values).map(|_| buf.get_f64()).collect();

        Ok(Self::from_parts(num_phases, modes, min_historical, max_historical)?)
    }

    pub fn write_restart_file(&self, path: impl AsRef<str>) -> Result<(), RestartError> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(self.to_bytes().as_ref())?;
        writer.flush()?;

        log::debug!(
            "Wrote hysteresis state of {} elements to '{}'",
            self.num_elements(),
            path.as_ref()
        );
        Ok(())
    }

    pub fn read_restart_file(path: impl AsRef<str>) -> Result<Self, RestartError> {
        let mut file = File::open(path.as_ref())?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        Self::from_bytes(Bytes::from(contents))
    }
}

fn check_remaining(buf: &impl Buf, expected: usize) -> Result<(), RestartError> {
    if buf.remaining() < expected {
        Err(RestartError::Truncated {
            expected,
            found: buf.remaining(),
        })
    } else {
        Ok(())
    }
}
