use core::fmt;
use core::fmt::Write;

/// Console used when the kernel code runs on a development host, e.g. during `cargo test`.
///
/// With the `std` feature output goes to stderr, otherwise it is discarded.
pub struct HostWriter {}

impl Write for HostWriter {
    #[cfg(feature = "std")]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use std::io::Write as _;
        std::io::stderr()
            .write_all(s.as_bytes())
            .map_err(|_| fmt::Error)
    }

    #[cfg(not(feature = "std"))]
    fn write_str(&mut self, _s: &str) -> fmt::Result {
        Ok(())
    }
}
