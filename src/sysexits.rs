//! Process exit statuses used by the `archup` binary.
//! reference: [SYSEXITS](https://man.freebsd.org/cgi/man.cgi?query=sysexits&apropos=0&sektion=0&manpath=FreeBSD+11.2-stable&arch=default&format=html)

/// value: 66 <br>
/// Nothing was selected for archiving.
pub const EX_NOINPUT: i32 = 66;

/// value: 69 <br>
/// An external program required by the selected format or encryption is not installed.
pub const EX_UNAVAILABLE: i32 = 69;

/// value: 70 <br>
/// An external archiver or encryptor exited with a nonzero status.
pub const EX_SOFTWARE: i32 = 70;

/// value: 73 <br>
/// The output directory cannot be created.
pub const EX_CANTCREAT: i32 = 73;

/// value: 74 <br>
/// An I/O error occurred while reading sources or writing artifacts.
pub const EX_IOERR: i32 = 74;

/// value: 75 <br>
/// The run finished but at least one upload exhausted its retries.
/// Re-running later may succeed.
pub const EX_TEMPFAIL: i32 = 75;

/// value: 78 <br>
/// The effective configuration is invalid (unknown format, unknown upload tool, missing password).
pub const EX_CONFIG: i32 = 78;

/// value: 130 <br>
/// Interrupted by the user (SIGINT), following the shell convention `128 + signal`.
pub const EX_INTERRUPTED: i32 = 130;
