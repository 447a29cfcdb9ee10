/// How often an animation repeats after its first playthrough.
///
/// Internally this always follows the GIF convention: `-1` plays once,
/// `0` loops forever, `N` loops `N` extra times.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LoopCount {
    Never,
    #[default]
    Forever,
    Extra(u16),
}

impl LoopCount {
    pub fn from_gif_value(value: i32) -> Self {
        match value {
            v if v < 0 => Self::Never,
            0 => Self::Forever,
            v => Self::Extra(v.min(i32::from(u16::MAX)) as u16),
        }
    }

    pub fn to_gif_value(self) -> i32 {
        match self {
            Self::Never => -1,
            Self::Forever => 0,
            Self::Extra(n) => i32::from(n),
        }
    }

    /// Translates a user-facing setting, where `0` means "play once" and
    /// `-1` means "loop forever". This is the only place the two
    /// conventions meet.
    pub fn from_user_setting(value: i32) -> Self {
        match value {
            0 => Self::Never,
            v if v < 0 => Self::Forever,
            v => Self::from_gif_value(v),
        }
    }

    /// Value stored in a NETSCAPE2.0 application extension, `None` when the
    /// extension must be absent.
    pub fn netscape_value(self) -> Option<u16> {
        match self {
            Self::Never => None,
            Self::Forever => Some(0),
            Self::Extra(0) => None,
            Self::Extra(n) => Some(n),
        }
    }

    pub fn from_netscape_value(value: Option<u16>) -> Self {
        match value {
            None => Self::Never,
            Some(0) => Self::Forever,
            Some(n) => Self::Extra(n),
        }
    }

    pub fn from_repeat(repeat: gif::Repeat) -> Self {
        match repeat {
            gif::Repeat::Infinite => Self::Forever,
            gif::Repeat::Finite(0) => Self::Never,
            gif::Repeat::Finite(n) => Self::Extra(n),
        }
    }

    pub fn to_repeat(self) -> Option<gif::Repeat> {
        match self.netscape_value()? {
            0 => Some(gif::Repeat::Infinite),
            n => Some(gif::Repeat::Finite(n)),
        }
    }
}
