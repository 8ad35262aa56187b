//! Plugin-level types shared by the declaration phase, instances, and the
//! LADSPA descriptor builder.

use std::ffi::c_int;

use crate::ladspa::ffi::{
    LADSPA_PORT_AUDIO, LADSPA_PORT_CONTROL, LADSPA_PORT_INPUT, LADSPA_PORT_OUTPUT,
};

/// One audio sample as exchanged with the host.
pub type Sample = f32;

/// Script API version reported by `ladspa.getVersion()`.
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 2;

/// Upper bound for a declared `portCount`.
pub const MAX_PORTS: usize = 4096;

// ---------------------------------------------------------------------------
// Port direction / kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Control,
    Audio,
}

impl PortKind {
    /// Samples a port exposes to the script during one block.
    #[inline]
    pub fn block_len(&self, sample_count: usize) -> usize {
        match self {
            Self::Control => 1,
            Self::Audio => sample_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Port descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    /// LADSPA range-hint bits.
    pub hint: c_int,
    pub lower_bound: f32,
    pub upper_bound: f32,
    /// False while the port still holds its placeholder values.
    pub declared: bool,
}

impl PortDescriptor {
    /// Placeholder for a port that has not been declared yet.
    pub fn placeholder(index: usize) -> Self {
        Self {
            name: format!("port {}", index + 1),
            direction: PortDirection::Input,
            kind: PortKind::Control,
            hint: 0,
            lower_bound: -1.0,
            upper_bound: 1.0,
            declared: false,
        }
    }

    /// Decode LADSPA descriptor bits.  Exactly one direction and exactly one
    /// kind must be set.
    pub fn decode_flags(bits: c_int) -> Option<(PortDirection, PortKind)> {
        let direction = match (bits & LADSPA_PORT_INPUT != 0, bits & LADSPA_PORT_OUTPUT != 0) {
            (true, false) => PortDirection::Input,
            (false, true) => PortDirection::Output,
            _ => return None,
        };
        let kind = match (bits & LADSPA_PORT_CONTROL != 0, bits & LADSPA_PORT_AUDIO != 0) {
            (true, false) => PortKind::Control,
            (false, true) => PortKind::Audio,
            _ => return None,
        };
        Some((direction, kind))
    }

    /// LADSPA descriptor bits for this port.
    pub fn flags(&self) -> c_int {
        let direction = match self.direction {
            PortDirection::Input => LADSPA_PORT_INPUT,
            PortDirection::Output => LADSPA_PORT_OUTPUT,
        };
        let kind = match self.kind {
            PortKind::Control => LADSPA_PORT_CONTROL,
            PortKind::Audio => LADSPA_PORT_AUDIO,
        };
        direction | kind
    }

    pub fn is_control(&self) -> bool {
        self.kind == PortKind::Control
    }
}

// ---------------------------------------------------------------------------
// Lifecycle hooks a script may define
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Activate,
    Deactivate,
    Run,
}

impl Hook {
    pub const ALL: [Hook; 3] = [Hook::Activate, Hook::Deactivate, Hook::Run];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Run => "run",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == name)
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which hooks a plugin defines, recorded at finalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSet {
    pub activate: bool,
    pub deactivate: bool,
    pub run: bool,
}

impl HookSet {
    pub fn insert(&mut self, hook: Hook) {
        match hook {
            Hook::Activate => self.activate = true,
            Hook::Deactivate => self.deactivate = true,
            Hook::Run => self.run = true,
        }
    }

    pub fn contains(&self, hook: Hook) -> bool {
        match hook {
            Hook::Activate => self.activate,
            Hook::Deactivate => self.deactivate,
            Hook::Run => self.run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip_through_ladspa_bits() {
        let bits = LADSPA_PORT_OUTPUT | LADSPA_PORT_AUDIO;
        let (direction, kind) = PortDescriptor::decode_flags(bits).unwrap();
        assert_eq!(direction, PortDirection::Output);
        assert_eq!(kind, PortKind::Audio);

        let mut port = PortDescriptor::placeholder(0);
        port.direction = direction;
        port.kind = kind;
        assert_eq!(port.flags(), bits);
    }

    #[test]
    fn ambiguous_flags_are_rejected() {
        assert!(PortDescriptor::decode_flags(0).is_none());
        assert!(PortDescriptor::decode_flags(LADSPA_PORT_INPUT | LADSPA_PORT_OUTPUT | LADSPA_PORT_AUDIO).is_none());
        assert!(PortDescriptor::decode_flags(LADSPA_PORT_INPUT | LADSPA_PORT_CONTROL | LADSPA_PORT_AUDIO).is_none());
        assert!(PortDescriptor::decode_flags(LADSPA_PORT_INPUT).is_none());
    }

    #[test]
    fn control_ports_expose_one_sample_per_block() {
        assert_eq!(PortKind::Control.block_len(512), 1);
        assert_eq!(PortKind::Audio.block_len(512), 512);
    }

    #[test]
    fn hook_names() {
        assert_eq!(Hook::from_name("run"), Some(Hook::Run));
        assert_eq!(Hook::from_name("process"), None);
        let mut set = HookSet::default();
        set.insert(Hook::Deactivate);
        assert!(set.contains(Hook::Deactivate));
        assert!(!set.contains(Hook::Run));
    }
}
