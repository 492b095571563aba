use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

/// Severity of a log message, from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Verbose = 1,
    Info = 2,
    Warning = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Debug,
        Level::Verbose,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Fatal,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "Debug",
            Level::Verbose => "Verbose",
            Level::Info => "Info",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }

    /// Mask bit of this level.
    #[inline]
    pub const fn mask(self) -> VerbosityMask {
        VerbosityMask::from_bits_truncate(1 << self as u8)
    }

    /// Error and Fatal are always written on the calling thread.
    #[inline]
    pub const fn is_critical(self) -> bool {
        matches!(self, Level::Error | Level::Fatal)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `pad` so that width/alignment specifiers apply.
        f.pad(self.as_str())
    }
}

bitflags! {
    /// Set of levels a category or the global filter lets through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VerbosityMask: u32 {
        const DEBUG = 1 << 0;
        const VERBOSE = 1 << 1;
        const INFO = 1 << 2;
        const WARNING = 1 << 3;
        const ERROR = 1 << 4;
        const FATAL = 1 << 5;

        const ALL = Self::DEBUG.bits()
            | Self::VERBOSE.bits()
            | Self::INFO.bits()
            | Self::WARNING.bits()
            | Self::ERROR.bits()
            | Self::FATAL.bits();
        const DEFAULT = Self::ALL.bits() & !Self::DEBUG.bits();
    }
}

impl VerbosityMask {
    /// Every level from `level` up.
    pub const fn at_least(level: Level) -> Self {
        Self::from_bits_truncate(Self::ALL.bits() & !((1u32 << level as u8) - 1))
    }

    #[inline]
    pub const fn allows(self, level: Level) -> bool {
        self.bits() & level.mask().bits() != 0
    }
}

bitflags! {
    /// Behaviour switches attached to a category.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CategoryFlags: u8 {
        /// Never dispatched to the background pool.
        const IMMEDIATE = 1 << 0;
        const BREAK_ON_ERROR = 1 << 1;
        const BREAK_ON_WARNING = 1 << 2;
    }
}

/// A named log channel.
///
/// Categories are created once, live for the whole process and never change,
/// which is why messages only keep a `&'static` to them. Declare them with
/// [`define_log_category!`](crate::define_log_category).
#[derive(Debug)]
pub struct LogCategory {
    name: &'static str,
    verbosity: VerbosityMask,
    flags: CategoryFlags,
}

impl LogCategory {
    pub const fn new(name: &'static str, verbosity: VerbosityMask, flags: CategoryFlags) -> Self {
        Self {
            name,
            verbosity,
            flags,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn verbosity(&self) -> VerbosityMask {
        self.verbosity
    }

    #[inline]
    pub const fn flags(&self) -> CategoryFlags {
        self.flags
    }

    #[inline]
    pub const fn is_immediate(&self) -> bool {
        self.flags.contains(CategoryFlags::IMMEDIATE)
    }

    #[inline]
    pub const fn allows(&self, level: Level) -> bool {
        self.verbosity.allows(level)
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declares a `static` [`LogCategory`].
///
/// ```
/// use slab_logger::{define_log_category, CategoryFlags, VerbosityMask};
///
/// define_log_category!(LOG_RENDER, "Render");
/// define_log_category!(LOG_CRASH, "Crash", VerbosityMask::ALL, CategoryFlags::IMMEDIATE);
///
/// assert_eq!(LOG_RENDER.name(), "Render");
/// assert!(LOG_CRASH.is_immediate());
/// ```
#[macro_export]
macro_rules! define_log_category {
    ($(#[$meta:meta])* $vis:vis $ident:ident, $name:literal) => {
        $crate::define_log_category!(
            $(#[$meta])* $vis $ident,
            $name,
            $crate::VerbosityMask::DEFAULT,
            $crate::CategoryFlags::empty()
        );
    };
    ($(#[$meta:meta])* $vis:vis $ident:ident, $name:literal, $verbosity:expr, $flags:expr) => {
        $(#[$meta])*
        $vis static $ident: $crate::LogCategory = $crate::LogCategory::new($name, $verbosity, $flags);
    };
}

define_log_category!(
    /// Default category for callers that do not declare their own.
    pub LOG_GENERAL, "General"
);

define_log_category!(
    /// Records arriving through the `log` crate facade.
    pub LOG_BRIDGE, "Log", VerbosityMask::ALL, CategoryFlags::empty()
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_least() {
        let mask = VerbosityMask::at_least(Level::Warning);
        assert!(!mask.allows(Level::Info));
        assert!(mask.allows(Level::Warning));
        assert!(mask.allows(Level::Error));
        assert!(mask.allows(Level::Fatal));
        assert_eq!(VerbosityMask::at_least(Level::Debug), VerbosityMask::ALL);
    }

    #[test]
    fn test_default_excludes_debug() {
        assert!(!VerbosityMask::DEFAULT.allows(Level::Debug));
        assert!(VerbosityMask::DEFAULT.allows(Level::Verbose));
        assert!(!LOG_GENERAL.allows(Level::Debug));
        assert!(LOG_BRIDGE.allows(Level::Debug));
    }

    #[test]
    fn test_level_padding() {
        assert_eq!(format!("[{:<9}]", Level::Info), "[Info     ]");
        assert!(Level::Error.is_critical());
        assert!(!Level::Warning.is_critical());
    }
}
