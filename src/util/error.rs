//! Module containing the error type used throughout the tandem crates

use err_derive::Error;

/// Errors of this crate family.
///
/// `MinorInUse` and `PortInUse` are the transient kinds: they mean a
/// host-local resource was lost to a race between allocation and use, and the
/// correct reaction is to allocate a fresh resource and retry. Everything
/// else aborts the operation that produced it.
#[derive(Debug, Error)]
pub enum Error {
	/// The chosen device minor was taken by another mirror between
	/// allocation and attach
	#[error(display = "Device minor {} is already in use", _0)]
	MinorInUse(u32),

	/// The chosen replication port was taken between probe and connect
	#[error(display = "Local replication port {} is already in use", _0)]
	PortInUse(u16),

	/// The two peers run incompatible driver versions
	#[error(display = "Driver version mismatch: ours is {}, peer runs {}", _0, _1)]
	VersionMismatch(String, String),

	/// An external tool exited with a non-zero code
	#[error(display = "{} exited with code {}: {}", program, code, stderr)]
	CommandFailure {
		program: String,
		code: i32,
		stdout: String,
		stderr: String,
	},

	/// An RPC could not be delivered to the peer
	#[error(display = "RPC transport failure: {}", _0)]
	Transport(String),

	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] std::io::Error),

	#[error(display = "JSON error: {}", _0)]
	Json(#[error(source)] serde_json::Error),

	#[error(display = "HTTP error: {}", _0)]
	Http(#[error(source)] hyper::Error),

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	/// Whether retrying with freshly allocated resources can succeed
	pub fn is_transient(&self) -> bool {
		matches!(self, Error::MinorInUse(_) | Error::PortInUse(_))
	}
}

impl From<&str> for Error {
	fn from(v: &str) -> Error {
		Error::Message(v.to_string())
	}
}

impl From<String> for Error {
	fn from(v: String) -> Error {
		Error::Message(v)
	}
}

/// Trait to map error types to our common error type
pub trait ErrorContext<T, E> {
	fn err_context<C: std::borrow::Borrow<str>>(self, context: C) -> Result<T, Error>;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
	E: std::fmt::Display,
{
	#[inline]
	fn err_context<C: std::borrow::Borrow<str>>(self, context: C) -> Result<T, Error> {
		self.map_err(|e| Error::Message(format!("{}\n{}", context.borrow(), e)))
	}
}

/// Trait to map any option type to our common error type
pub trait OkOrMessage {
	type S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<Self::S, Error>;
}

impl<T> OkOrMessage for Option<T> {
	type S = T;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<T, Error> {
		self.ok_or_else(|| Error::Message(message.into()))
	}
}
