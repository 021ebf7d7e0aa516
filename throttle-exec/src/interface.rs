use std::{ffi::CString, fmt::Debug, num::NonZeroU32};

/// Answers whether a network interface exists and can carry emulation rules.
pub trait InterfaceProbe: Debug + Send + Sync {
    fn is_valid(&self, name: &str) -> bool;
}

/// Resolves interface names against the host with `if_nametoindex(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceProbe for SystemInterfaces {
    fn is_valid(&self, name: &str) -> bool {
        if_nametoindex(name).is_some()
    }
}

/// Returns the index of the interface called `name`, or `None` if there is no such interface.
pub fn if_nametoindex(name: &str) -> Option<NonZeroU32> {
    if name.is_empty() {
        return None;
    }

    // Names with interior NUL bytes can't exist.
    let string = CString::new(name).ok()?;
    let index = unsafe { nix::libc::if_nametoindex(string.as_ptr()) };
    NonZeroU32::new(index)
}

/// A fixed set of interface names, useful when the host shouldn't be consulted.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(Vec<String>);

impl StaticInterfaces {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl InterfaceProbe for StaticInterfaces {
    fn is_valid(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }
}
