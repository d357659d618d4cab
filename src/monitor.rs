use std::fmt;

/// Reference white for SDR content when the OS does not report one.
pub const DEFAULT_SDR_WHITE_LEVEL_NITS: f32 = 80.0;

/// Peak luminance assumed for HDR outputs that do not report one.
pub const DEFAULT_HDR_MAX_NITS: f32 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MonitorKey {
    pub(crate) adapter_luid: u64,
    pub(crate) output_id: u64,
}

impl MonitorKey {
    pub(crate) fn from_device_name(adapter_luid: u64, device_name: &str) -> Self {
        Self {
            adapter_luid,
            output_id: fnv1a_64(device_name.as_bytes()),
        }
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0001_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Identity of a display output: the native monitor handle plus a key
/// that survives handle churn across display reconfiguration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MonitorId {
    key: MonitorKey,
    handle: isize,
    name: String,
    is_primary: bool,
}

impl MonitorId {
    pub fn from_parts(
        adapter_luid: u64,
        output_id: u64,
        raw_handle: isize,
        name: impl Into<String>,
        is_primary: bool,
    ) -> Self {
        Self {
            key: MonitorKey {
                adapter_luid,
                output_id,
            },
            handle: raw_handle,
            name: name.into(),
            is_primary,
        }
    }

    pub fn from_name(raw_handle: isize, name: impl Into<String>, is_primary: bool) -> Self {
        let name = name.into();
        Self {
            key: MonitorKey::from_device_name(0, &name),
            handle: raw_handle,
            name,
            is_primary,
        }
    }

    pub fn raw_handle(&self) -> isize {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn stable_id(&self) -> String {
        format!("{:016x}-{:016x}", self.key.adapter_luid, self.key.output_id)
    }

    /// Same output, even if the native handle was reissued.
    pub fn same_output(&self, other: &Self) -> bool {
        self.handle == other.handle || self.key == other.key
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Geometry and color capability of one output, in desktop coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorInfo {
    pub index: usize,
    pub id: MonitorId,
    pub x: i32,
    pub y: i32,
    pub cx: u32,
    pub cy: u32,
    pub rotation_degrees: i32,
    pub hdr: bool,
    pub sdr_white_level_nits: f32,
    pub max_luminance_nits: f32,
}

impl MonitorInfo {
    pub fn new(index: usize, id: MonitorId, x: i32, y: i32, cx: u32, cy: u32) -> Self {
        Self {
            index,
            id,
            x,
            y,
            cx,
            cy,
            rotation_degrees: 0,
            hdr: false,
            sdr_white_level_nits: DEFAULT_SDR_WHITE_LEVEL_NITS,
            max_luminance_nits: DEFAULT_HDR_MAX_NITS,
        }
    }

    pub fn with_hdr(mut self, sdr_white_level_nits: f32) -> Self {
        self.hdr = true;
        self.sdr_white_level_nits = sdr_white_level_nits;
        self
    }

    /// Dimensions of the captured image; 90/270 degree rotations swap axes.
    pub fn capture_size(&self) -> (u32, u32) {
        if self.rotation_degrees.rem_euclid(180) == 90 {
            (self.cy, self.cx)
        } else {
            (self.cx, self.cy)
        }
    }
}

/// Position of `id` in an enumerated monitor list.
pub fn monitor_index(monitors: &[MonitorInfo], id: &MonitorId) -> Option<usize> {
    monitors
        .iter()
        .find(|info| info.id.raw_handle() == id.raw_handle())
        .or_else(|| monitors.iter().find(|info| info.id.same_output(id)))
        .map(|info| info.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_lookup_falls_back_to_stable_key() {
        let monitors = vec![
            MonitorInfo::new(0, MonitorId::from_name(10, r"\\.\DISPLAY1", true), 0, 0, 1920, 1080),
            MonitorInfo::new(1, MonitorId::from_name(11, r"\\.\DISPLAY2", false), 1920, 0, 2560, 1440),
        ];
        let reissued = MonitorId::from_name(99, r"\\.\DISPLAY2", false);
        assert_eq!(monitor_index(&monitors, &reissued), Some(1));
        assert_eq!(
            monitor_index(&monitors, &MonitorId::from_name(12, "ghost", false)),
            None
        );
    }

    #[test]
    fn rotated_output_swaps_capture_axes() {
        let mut info = MonitorInfo::new(0, MonitorId::from_name(1, "m", true), 0, 0, 1920, 1080);
        info.rotation_degrees = 270;
        assert_eq!(info.capture_size(), (1080, 1920));
        info.rotation_degrees = 180;
        assert_eq!(info.capture_size(), (1920, 1080));
    }

    #[test]
    fn stable_id_encodes_luid_and_output_hash() {
        let a = MonitorId::from_parts(0xabc, 0x1, 0, "a", false);
        assert_eq!(a.stable_id(), "0000000000000abc-0000000000000001");
        let b = MonitorId::from_name(0, "same", false);
        let c = MonitorId::from_name(5, "same", true);
        assert!(b.same_output(&c));
    }
}
